use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use http::{HeaderMap, Method, Request, Uri};
use http_body_util::Full;

use crate::error::{AttackError, Result};

/// One HTTP request description, filled in by a [`Targeter`] and consumed
/// exactly once by a worker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Target {
    pub method: Method,
    pub url: Uri,
    pub body: Bytes,
    pub headers: HeaderMap,
}

impl Target {
    pub fn new(method: Method, url: Uri) -> Self {
        Self { method, url, body: Bytes::new(), headers: HeaderMap::new() }
    }

    pub fn get(url: Uri) -> Self {
        Self::new(Method::GET, url)
    }

    /// Build the HTTP request for this target. The body is cloned per call
    /// so redirected hops can resend it.
    pub fn request(&self) -> Result<Request<Full<Bytes>>> {
        self.request_to(&self.url)
    }

    /// Build the same request against a different URI (redirect hops).
    pub fn request_to(&self, url: &Uri) -> Result<Request<Full<Bytes>>> {
        let mut builder = Request::builder().method(self.method.clone()).uri(url.clone());
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in &self.headers {
                headers.append(name.clone(), value.clone());
            }
        }
        builder
            .body(Full::new(self.body.clone()))
            .map_err(|e| AttackError::InvalidTarget(e.to_string()))
    }
}

/// The only source of work for an attack.
///
/// `fill` is called concurrently from multiple workers; stateful
/// implementations must synchronize internally. A returned error is terminal
/// for the whole attack.
pub trait Targeter: Send + Sync {
    fn fill(&self, target: &mut Target) -> Result<()>;
}

impl<F> Targeter for F
where
    F: Fn(&mut Target) -> Result<()> + Send + Sync,
{
    fn fill(&self, target: &mut Target) -> Result<()> {
        self(target)
    }
}

/// Round-robin over a fixed set of targets.
#[derive(Debug)]
pub struct StaticTargeter {
    targets: Vec<Target>,
    next: AtomicUsize,
}

impl StaticTargeter {
    pub fn new(targets: Vec<Target>) -> Result<Self> {
        if targets.is_empty() {
            return Err(AttackError::NoTargets);
        }
        Ok(Self { targets, next: AtomicUsize::new(0) })
    }
}

impl Targeter for StaticTargeter {
    fn fill(&self, target: &mut Target) -> Result<()> {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.targets.len();
        *target = self.targets[i].clone();
        Ok(())
    }
}
