use thiserror::Error;

/// Errors that can occur while driving an attack
#[derive(Error, Debug)]
pub enum AttackError {
    #[error("no targets to attack")]
    NoTargets,

    #[error("target source failed: {0}")]
    TargetSource(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("dns resolution failed for {host}: {reason}")]
    Dns { host: String, reason: String },

    #[error("connection failed: {0}")]
    Connect(std::io::Error),

    #[error("tls handshake failed: {0}")]
    Tls(String),

    #[error("proxy connect failed: {0}")]
    Proxy(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("timed out awaiting response headers")]
    ResponseHeaderTimeout,

    #[error("stopped after {0} redirects")]
    RedirectLimit(usize),

    #[error("reading response body: {0}")]
    Body(String),
}

pub type Result<T> = std::result::Result<T, AttackError>;
