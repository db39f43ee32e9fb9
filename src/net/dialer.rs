use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::timeout;
use tracing::trace;

use crate::error::{AttackError, Result};
use crate::net::dns::DnsCache;

/// Opens TCP connections for the transport.
///
/// Hostnames go through the shared [`DnsCache`]; the resolved addresses are
/// attempted in order and the first successful connection wins. When every
/// attempt fails the last error is returned.
#[derive(Debug)]
pub struct Dialer {
    dns: Arc<DnsCache>,
    local_addr: Option<IpAddr>,
    connect_timeout: Duration,
    keep_alive: Option<Duration>,
}

impl Dialer {
    pub fn new(
        dns: Arc<DnsCache>,
        local_addr: Option<IpAddr>,
        connect_timeout: Duration,
        keep_alive: Option<Duration>,
    ) -> Self {
        Self { dns, local_addr, connect_timeout, keep_alive }
    }

    pub async fn dial(&self, host: &str, port: u16) -> Result<TcpStream> {
        let addrs = self.dns.resolve(host, port).await?;
        let mut last_err = None;
        for addr in addrs {
            match self.dial_addr(addr).await {
                Ok(stream) => {
                    trace!(host, %addr, "connected");
                    return Ok(stream);
                }
                Err(e) => {
                    trace!(host, %addr, error = %e, "connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| AttackError::Dns {
            host: host.to_owned(),
            reason: "no addresses found".to_owned(),
        }))
    }

    async fn dial_addr(&self, addr: SocketAddr) -> Result<TcpStream> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(AttackError::Connect)?;

        if let Some(interval) = self.keep_alive {
            let sock = SockRef::from(&socket);
            sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(interval))
                .map_err(AttackError::Connect)?;
        }
        if let Some(ip) = self.local_addr {
            socket
                .bind(SocketAddr::new(ip, 0))
                .map_err(AttackError::Connect)?;
        }

        let stream = if self.connect_timeout.is_zero() {
            socket.connect(addr).await.map_err(AttackError::Connect)?
        } else {
            timeout(self.connect_timeout, socket.connect(addr))
                .await
                .map_err(|_| {
                    AttackError::Connect(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("connect to {addr} timed out"),
                    ))
                })?
                .map_err(AttackError::Connect)?
        };
        stream.set_nodelay(true).map_err(AttackError::Connect)?;
        Ok(stream)
    }
}
