pub mod connector;
pub mod dialer;
pub mod dns;
pub mod proxy;
pub mod tls;

pub use connector::AttackConnector;
pub use dialer::Dialer;
pub use dns::DnsCache;
pub use proxy::{ProxySelector, ProxyServer};
pub use tls::{insecure_client_config, TLS_HANDSHAKE_TIMEOUT};
