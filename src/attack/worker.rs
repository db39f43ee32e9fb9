use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use http::uri::PathAndQuery;
use http::{header, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use tokio::time::Instant;
use tracing::warn;

use crate::attack::{AttackContext, RedirectPolicy};
use crate::error::{AttackError, Result};
use crate::outcome::Outcome;
use crate::target::Target;

/// Consume sequence numbers until the tick channel closes, emitting exactly
/// one [`Outcome`] per number.
pub(crate) async fn run(
    ctx: Arc<AttackContext>,
    ticks: flume::Receiver<u64>,
    results: flume::Sender<Outcome>,
) {
    while let Ok(seq) = ticks.recv_async().await {
        let outcome = hit(&ctx, seq).await;
        if results.send_async(outcome).await.is_err() {
            // Consumer dropped the stream; wind the attack down.
            ctx.stop.cancel();
            break;
        }
    }
}

async fn hit(ctx: &AttackContext, seq: u64) -> Outcome {
    let mut out = Outcome::new(&ctx.name, seq);

    let mut target = Target::default();
    if let Err(e) = ctx.targeter.fill(&mut target) {
        warn!(attack = %ctx.name, error = %e, "target source failed, stopping attack");
        ctx.stop.cancel();
        out.error = e.to_string();
        return out;
    }

    let request = match target.request() {
        Ok(request) => request,
        Err(e) => {
            out.error = e.to_string();
            return out;
        }
    };

    out.timestamp = SystemTime::now();
    let sent = Instant::now();

    let response = match send(ctx, &target, request).await {
        Ok(response) => response,
        Err(e) => {
            out.error = e.to_string();
            return out;
        }
    };

    let (parts, body) = response.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            out.error = AttackError::Body(e.to_string()).to_string();
            return out;
        }
    };

    out.latency = sent.elapsed();
    out.bytes_in = body.len() as u64;
    out.bytes_out = target.body.len() as u64;
    out.code = parts.status.as_u16();
    out.body = body;
    if let Some(reason) = status_error(parts.status, ctx.redirects) {
        out.error = reason;
    }
    out
}

/// Issue the request, chasing redirects within the configured policy. The
/// target body is rebuilt for every hop.
async fn send(
    ctx: &AttackContext,
    target: &Target,
    mut request: Request<Full<Bytes>>,
) -> Result<Response<Incoming>> {
    let mut url = target.url.clone();
    let mut followed = 0usize;
    loop {
        let response = request_with_timeout(ctx, request).await?;
        let max = match ctx.redirects {
            RedirectPolicy::NoFollow => return Ok(response),
            RedirectPolicy::Follow(max) => max,
        };
        if !is_redirect(response.status()) {
            return Ok(response);
        }
        if followed == max {
            return Err(AttackError::RedirectLimit(max));
        }
        followed += 1;

        let location = response
            .headers()
            .get(header::LOCATION)
            .ok_or_else(|| AttackError::Http("redirect without Location header".into()))?
            .to_str()
            .map_err(|e| AttackError::Http(format!("invalid Location header: {e}")))?;
        url = resolve_location(&url, location)?;
        request = target.request_to(&url)?;
    }
}

/// The configured timeout bounds connecting and awaiting response headers;
/// the body is streamed afterwards without a deadline.
async fn request_with_timeout(
    ctx: &AttackContext,
    request: Request<Full<Bytes>>,
) -> Result<Response<Incoming>> {
    let pending = ctx.client.request(request);
    if ctx.timeout.is_zero() {
        return pending.await.map_err(flatten_client_error);
    }
    match tokio::time::timeout(ctx.timeout, pending).await {
        Ok(result) => result.map_err(flatten_client_error),
        Err(_) => Err(AttackError::ResponseHeaderTimeout),
    }
}

/// The pooled client wraps transport errors; join the source chain so the
/// outcome carries the root cause (dns, connect, tls, proxy).
fn flatten_client_error(e: hyper_util::client::legacy::Error) -> AttackError {
    let mut message = e.to_string();
    let mut source = std::error::Error::source(&e);
    while let Some(err) = source {
        message.push_str(": ");
        message.push_str(&err.to_string());
        source = err.source();
    }
    AttackError::Http(message)
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// Status line for results that must carry an error: anything outside
/// `[200, 400)`, plus unfollowed redirects under `NoFollow`.
fn status_error(status: StatusCode, redirects: RedirectPolicy) -> Option<String> {
    let code = status.as_u16();
    let unfollowed =
        matches!(redirects, RedirectPolicy::NoFollow) && is_redirect(status);
    let failed = !(200..400).contains(&code) || unfollowed;
    failed.then(|| match status.canonical_reason() {
        Some(reason) => format!("{code} {reason}"),
        None => code.to_string(),
    })
}

fn resolve_location(base: &Uri, location: &str) -> Result<Uri> {
    let invalid = |e: &dyn std::fmt::Display| {
        AttackError::Http(format!("invalid redirect location {location}: {e}"))
    };
    let location: Uri = location.parse().map_err(|e| invalid(&e))?;
    if location.scheme().is_some() {
        return Ok(location);
    }
    let mut parts = base.clone().into_parts();
    parts.path_and_query = Some(
        location
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/")),
    );
    Uri::from_parts(parts).map_err(|e| invalid(&e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_status_ranges() {
        let follow = RedirectPolicy::Follow(10);
        assert_eq!(status_error(StatusCode::OK, follow), None);
        assert_eq!(status_error(StatusCode::NOT_MODIFIED, follow), None);
        assert_eq!(
            status_error(StatusCode::INTERNAL_SERVER_ERROR, follow).as_deref(),
            Some("500 Internal Server Error")
        );
        assert_eq!(
            status_error(StatusCode::CONTINUE, follow).as_deref(),
            Some("100 Continue")
        );
    }

    #[test]
    fn unfollowed_redirects_carry_their_status_line() {
        assert_eq!(
            status_error(StatusCode::FOUND, RedirectPolicy::NoFollow).as_deref(),
            Some("302 Found")
        );
        // A redirect the policy would have chased is not an error by itself.
        assert_eq!(status_error(StatusCode::FOUND, RedirectPolicy::Follow(3)), None);
        // 304 is not a chaseable redirect, NoFollow leaves it alone.
        assert_eq!(status_error(StatusCode::NOT_MODIFIED, RedirectPolicy::NoFollow), None);
    }

    #[test]
    fn relative_locations_resolve_against_the_base() {
        let base: Uri = "http://host.test:8080/a?x=1".parse().expect("uri");
        let next = resolve_location(&base, "/b?y=2").expect("resolve");
        assert_eq!(next.to_string(), "http://host.test:8080/b?y=2");

        let absolute = resolve_location(&base, "https://other.test/c").expect("resolve");
        assert_eq!(absolute.to_string(), "https://other.test/c");
    }

    #[test]
    fn redirect_statuses() {
        for code in [301u16, 302, 303, 307, 308] {
            assert!(is_redirect(StatusCode::from_u16(code).expect("status")));
        }
        assert!(!is_redirect(StatusCode::NOT_MODIFIED));
        assert!(!is_redirect(StatusCode::OK));
    }
}
