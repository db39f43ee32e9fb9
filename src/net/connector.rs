use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::Uri;
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::TokioIo;
use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::trace;

use crate::error::{AttackError, Result};
use crate::net::dialer::Dialer;
use crate::net::proxy::ProxySelector;
use crate::net::tls::TLS_HANDSHAKE_TIMEOUT;

trait IoStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> IoStream for T {}

/// One established connection handed to the client pool.
pub struct ConnStream {
    io: TokioIo<Box<dyn IoStream>>,
    negotiated_h2: bool,
}

impl Connection for ConnStream {
    fn connected(&self) -> Connected {
        let connected = Connected::new();
        if self.negotiated_h2 {
            connected.negotiated_h2()
        } else {
            connected
        }
    }
}

impl Read for ConnStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl Write for ConnStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[std::io::IoSlice<'_>],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.io).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.io.is_write_vectored()
    }
}

/// Connector behind the pooled client: DNS, TCP, optional CONNECT proxy,
/// optional TLS. One instance is shared by every worker of an attacker.
#[derive(Clone)]
pub struct AttackConnector {
    inner: Arc<ConnectorInner>,
}

struct ConnectorInner {
    dialer: Dialer,
    proxy: ProxySelector,
    /// `None` on the cleartext HTTP/2 transport.
    tls: Option<TlsConnector>,
}

impl AttackConnector {
    pub fn new(dialer: Dialer, proxy: ProxySelector, tls: Option<TlsConnector>) -> Self {
        Self { inner: Arc::new(ConnectorInner { dialer, proxy, tls }) }
    }

    async fn connect(self, dst: Uri) -> Result<ConnStream> {
        let host = dst
            .host()
            .ok_or_else(|| AttackError::InvalidTarget(format!("{dst}: request URI has no host")))?
            .trim_matches(|c| c == '[' || c == ']')
            .to_owned();
        let https = dst.scheme_str() == Some("https");
        let port = dst.port_u16().unwrap_or(if https { 443 } else { 80 });
        if https && self.inner.tls.is_none() {
            return Err(AttackError::Tls("https target on cleartext HTTP/2 transport".into()));
        }

        let stream = match self.inner.proxy.proxy_for(&dst) {
            Some(proxy) => {
                trace!(proxy = %proxy.host, port = proxy.port, "tunneling through proxy");
                let mut stream = self.inner.dialer.dial(&proxy.host, proxy.port).await?;
                tunnel(&mut stream, &host, port).await?;
                stream
            }
            None => self.inner.dialer.dial(&host, port).await?,
        };

        if !https {
            return Ok(ConnStream { io: TokioIo::new(Box::new(stream)), negotiated_h2: false });
        }

        let tls = match self.inner.tls.as_ref() {
            Some(tls) => tls,
            None => {
                return Err(AttackError::Tls("https target on cleartext HTTP/2 transport".into()))
            }
        };
        let name = ServerName::try_from(host.clone())
            .map_err(|e| AttackError::Tls(format!("invalid server name {host}: {e}")))?;
        let tls_stream = timeout(TLS_HANDSHAKE_TIMEOUT, tls.connect(name, stream))
            .await
            .map_err(|_| AttackError::Tls(format!("handshake with {host} timed out")))?
            .map_err(|e| AttackError::Tls(e.to_string()))?;
        let negotiated_h2 = tls_stream.get_ref().1.alpn_protocol() == Some(b"h2");
        Ok(ConnStream { io: TokioIo::new(Box::new(tls_stream)), negotiated_h2 })
    }
}

impl tower_service::Service<Uri> for AttackConnector {
    type Response = ConnStream;
    type Error = AttackError;
    type Future = Pin<Box<dyn Future<Output = Result<ConnStream>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        Box::pin(self.clone().connect(dst))
    }
}

const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

/// Issue an HTTP CONNECT for `host:port` and wait for the 2xx reply.
async fn tunnel(stream: &mut TcpStream, host: &str, port: u16) -> Result<()> {
    let request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| AttackError::Proxy(e.to_string()))?;

    let mut response = Vec::with_capacity(256);
    let mut chunk = [0u8; 512];
    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| AttackError::Proxy(e.to_string()))?;
        if n == 0 {
            return Err(AttackError::Proxy("connection closed during CONNECT".into()));
        }
        response.extend_from_slice(&chunk[..n]);
        if response.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if response.len() > MAX_CONNECT_RESPONSE {
            return Err(AttackError::Proxy("oversized CONNECT response".into()));
        }
    }

    let status_line = String::from_utf8_lossy(&response);
    let status = status_line.split_whitespace().nth(1).unwrap_or("");
    if status.starts_with('2') {
        Ok(())
    } else {
        Err(AttackError::Proxy(format!(
            "CONNECT {host}:{port} refused: {}",
            status_line.lines().next().unwrap_or("").trim()
        )))
    }
}
