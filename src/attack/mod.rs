pub mod pacer;
pub mod worker;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use pacer::Rate;

use crate::net::dialer::Dialer;
use crate::net::dns::DnsCache;
use crate::net::proxy::ProxySelector;
use crate::net::tls::{alpn_protocols, insecure_client_config};
use crate::net::AttackConnector;
use crate::outcome::Outcome;
use crate::target::Targeter;

pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_MAX_IDLE_PER_HOST: usize = 10_000;
pub const DEFAULT_REDIRECTS: usize = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

pub(crate) type HttpClient = Client<AttackConnector, Full<Bytes>>;

/// Wire protocol spoken with targets. Modes are mutually exclusive for the
/// lifetime of an attacker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Http1,
    /// HTTP/2 negotiated over TLS via ALPN; `http` targets stay on HTTP/1.1.
    Http2,
    /// HTTP/2 with prior knowledge over cleartext TCP.
    H2c,
}

/// What to do with 3xx responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectPolicy {
    /// Return the first response verbatim, whatever its status.
    NoFollow,
    /// Chase up to this many hops; one more fails the hit.
    Follow(usize),
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        RedirectPolicy::Follow(DEFAULT_REDIRECTS)
    }
}

/// Everything a worker needs to execute hits.
pub(crate) struct AttackContext {
    pub(crate) name: String,
    pub(crate) client: HttpClient,
    pub(crate) targeter: Arc<dyn Targeter>,
    pub(crate) redirects: RedirectPolicy,
    pub(crate) timeout: Duration,
    pub(crate) stop: CancellationToken,
}

/// Issues requests against a target stream at a constant rate.
///
/// The attacker owns one pooled client shared by every worker of every
/// attack it runs, and one stop signal observed by all of them.
pub struct Attacker {
    client: HttpClient,
    workers: usize,
    redirects: RedirectPolicy,
    timeout: Duration,
    stop: CancellationToken,
}

impl Attacker {
    pub fn builder() -> AttackerBuilder {
        AttackerBuilder::default()
    }

    /// Start an attack of `rate` for `duration` (zero means until
    /// [`stop`](Self::stop)) and return the result stream immediately.
    ///
    /// Must be called within a tokio runtime. The stream closes once every
    /// dispatched hit has produced an [`Outcome`] and all workers exited.
    pub fn attack<T>(
        &self,
        targeter: T,
        rate: Rate,
        duration: Duration,
        name: &str,
    ) -> flume::Receiver<Outcome>
    where
        T: Targeter + 'static,
    {
        let (results_tx, results_rx) = flume::bounded(0);
        if rate.freq == 0 || rate.per.is_zero() {
            warn!(attack = name, "degenerate rate, nothing to pace");
            return results_rx;
        }
        let (ticks_tx, ticks_rx) = flume::bounded(0);

        let ctx = Arc::new(AttackContext {
            name: name.to_owned(),
            client: self.client.clone(),
            targeter: Arc::new(targeter),
            redirects: self.redirects,
            timeout: self.timeout,
            stop: self.stop.clone(),
        });
        let pace = pacer::Pacer::new(rate, duration);
        info!(
            attack = name,
            freq = rate.freq,
            hits = pace.total_hits(),
            workers = self.workers,
            "starting attack"
        );
        tokio::spawn(pacer::run(ctx, pace, self.workers, ticks_tx, ticks_rx, results_tx));
        results_rx
    }

    /// Fire the stop signal. Idempotent; callable from any thread and from
    /// inside a [`Targeter`]. In-flight requests are not cancelled.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl Default for Attacker {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Configures and builds an [`Attacker`].
///
/// The transport is assembled in [`build`](Self::build), after every option
/// has been applied, so transport options and the protocol switch can be
/// set in any order.
pub struct AttackerBuilder {
    workers: usize,
    max_idle_per_host: usize,
    redirects: RedirectPolicy,
    proxy: ProxySelector,
    timeout: Duration,
    local_addr: Option<IpAddr>,
    keep_alive: bool,
    tls: Option<ClientConfig>,
    protocol: Protocol,
    dns: Option<Arc<DnsCache>>,
}

impl Default for AttackerBuilder {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_idle_per_host: DEFAULT_MAX_IDLE_PER_HOST,
            redirects: RedirectPolicy::default(),
            proxy: ProxySelector::default(),
            timeout: DEFAULT_TIMEOUT,
            local_addr: None,
            keep_alive: true,
            tls: None,
            protocol: Protocol::default(),
            dns: None,
        }
    }
}

impl AttackerBuilder {
    /// Number of workers started with each attack. The pool still grows on
    /// demand; it never shrinks within an attack.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Idle connection cap per host in the shared pool.
    pub fn max_idle_per_host(mut self, max: usize) -> Self {
        self.max_idle_per_host = max;
        self
    }

    pub fn redirects(mut self, policy: RedirectPolicy) -> Self {
        self.redirects = policy;
        self
    }

    pub fn proxy(mut self, proxy: ProxySelector) -> Self {
        self.proxy = proxy;
        self
    }

    /// Bounds connecting and awaiting response headers. Zero disables both
    /// bounds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Local address to bind outgoing connections to.
    pub fn local_addr(mut self, addr: IpAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    /// Disabling keep-alive also disables connection pooling.
    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = enabled;
        self
    }

    /// Replace the default accept-any-certificate TLS config.
    pub fn tls_config(mut self, config: ClientConfig) -> Self {
        self.tls = Some(config);
        self
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Use a private DNS cache instead of the process-wide one.
    pub fn dns_cache(mut self, dns: Arc<DnsCache>) -> Self {
        self.dns = Some(dns);
        self
    }

    pub fn build(self) -> Attacker {
        let dns = self.dns.unwrap_or_else(DnsCache::shared);
        let keep_alive = self.keep_alive.then_some(DEFAULT_KEEP_ALIVE_INTERVAL);
        let dialer = Dialer::new(dns, self.local_addr, self.timeout, keep_alive);

        let tls = match self.protocol {
            Protocol::H2c => None,
            _ => {
                let mut config = self.tls.unwrap_or_else(insecure_client_config);
                if config.alpn_protocols.is_empty() {
                    config.alpn_protocols = alpn_protocols(self.protocol);
                }
                Some(TlsConnector::from(Arc::new(config)))
            }
        };
        let connector = AttackConnector::new(dialer, self.proxy, tls);

        let mut builder = Client::builder(TokioExecutor::new());
        builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(if self.keep_alive { self.max_idle_per_host } else { 0 });
        if self.protocol == Protocol::H2c {
            builder.http2_only(true);
        }
        let client: HttpClient = builder.build(connector);

        Attacker {
            client,
            workers: self.workers,
            redirects: self.redirects,
            timeout: self.timeout,
            stop: CancellationToken::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_match_the_documented_table() {
        let builder = AttackerBuilder::default();
        assert_eq!(builder.workers, 10);
        assert_eq!(builder.max_idle_per_host, 10_000);
        assert_eq!(builder.redirects, RedirectPolicy::Follow(10));
        assert_eq!(builder.timeout, Duration::from_secs(30));
        assert!(builder.keep_alive);
        assert_eq!(builder.protocol, Protocol::Http1);
        assert!(builder.local_addr.is_none());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let attacker = Attacker::default();
        attacker.stop();
        attacker.stop();
        assert!(attacker.stop.is_cancelled());
    }

    #[tokio::test]
    async fn zero_rate_closes_the_stream_immediately() {
        let attacker = Attacker::default();
        let rx = attacker.attack(
            crate::target::StaticTargeter::new(vec![crate::target::Target::get(
                "http://127.0.0.1:1/".parse().expect("uri"),
            )])
            .expect("targeter"),
            Rate { freq: 0, per: Duration::from_secs(1) },
            Duration::from_secs(1),
            "zero-rate",
        );
        assert!(rx.recv_async().await.is_err());
    }
}
