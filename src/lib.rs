#![forbid(unsafe_code)]

//! Open-loop HTTP load generation.
//!
//! An [`Attacker`] issues requests from a caller-supplied [`Targeter`] at a
//! constant [`Rate`] for a bounded duration, emitting one [`Outcome`] per
//! request on a stream the caller drains. Slow upstreams grow the worker
//! pool instead of dropping ticks, so the requested rate holds as long as
//! the target can accept connections.
//!
//! ```no_run
//! use std::time::Duration;
//! use volley::{Attacker, Rate, StaticTargeter, Target};
//!
//! # async fn demo() -> volley::Result<()> {
//! let targeter = StaticTargeter::new(vec![Target::get("http://localhost:8080/".parse().unwrap())])?;
//! let attacker = Attacker::builder().build();
//! let results = attacker.attack(targeter, Rate::per_second(100), Duration::from_secs(10), "smoke");
//! while let Ok(outcome) = results.recv_async().await {
//!     println!("#{} {} {:?}", outcome.seq, outcome.code, outcome.latency);
//! }
//! # Ok(())
//! # }
//! ```

pub mod attack;
pub mod error;
pub mod net;
pub mod outcome;
pub mod target;

pub use attack::{
    Attacker, AttackerBuilder, Protocol, Rate, RedirectPolicy, DEFAULT_KEEP_ALIVE_INTERVAL,
    DEFAULT_MAX_IDLE_PER_HOST, DEFAULT_REDIRECTS, DEFAULT_TIMEOUT, DEFAULT_WORKERS,
};
pub use error::{AttackError, Result};
pub use net::{DnsCache, ProxySelector};
pub use outcome::Outcome;
pub use target::{StaticTargeter, Target, Targeter};
