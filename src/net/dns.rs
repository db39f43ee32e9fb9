use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::net::lookup_host;
use tracing::{debug, trace, warn};

use crate::error::{AttackError, Result};

static SHARED: LazyLock<Arc<DnsCache>> = LazyLock::new(|| Arc::new(DnsCache::new()));

#[derive(Debug, Clone)]
struct CacheEntry {
    addrs: Vec<IpAddr>,
    resolved_at: Instant,
}

/// Caching hostname resolver.
///
/// Resolved address lists are kept in resolution order and reused for every
/// subsequent dial to the same host. Entries never expire unless a TTL is
/// set with [`DnsCache::with_ttl`], in which case stale entries are
/// re-resolved lazily on the next lookup.
#[derive(Debug, Default)]
pub struct DnsCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Option<Duration>,
}

impl DnsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl: Some(ttl) }
    }

    /// The process-wide cache used by default.
    pub fn shared() -> Arc<DnsCache> {
        Arc::clone(&SHARED)
    }

    /// Resolve `host` to an ordered address list. IP literals bypass the
    /// cache entirely.
    pub async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }

        if let Some(entry) = self.entries.get(host) {
            let snapshot = entry.value().clone();
            drop(entry);
            if !self.is_stale(&snapshot) {
                trace!(host, "dns cache hit");
                return Ok(with_port(&snapshot.addrs, port));
            }
        }

        match self.resolve_and_cache(host).await {
            Ok(addrs) => Ok(with_port(&addrs, port)),
            Err(e) => {
                if let Some(entry) = self.entries.get(host) {
                    warn!(host, error = %e, "dns refresh failed, serving stale entry");
                    return Ok(with_port(&entry.addrs, port));
                }
                Err(e)
            }
        }
    }

    fn is_stale(&self, entry: &CacheEntry) -> bool {
        match self.ttl {
            Some(ttl) => entry.resolved_at.elapsed() > ttl,
            None => false,
        }
    }

    async fn resolve_and_cache(&self, host: &str) -> Result<Vec<IpAddr>> {
        debug!(host, "resolving");
        let addrs: Vec<IpAddr> = lookup_host((host, 0u16))
            .await
            .map_err(|e| AttackError::Dns { host: host.to_owned(), reason: e.to_string() })?
            .map(|sa| sa.ip())
            .collect();
        if addrs.is_empty() {
            return Err(AttackError::Dns {
                host: host.to_owned(),
                reason: "no addresses found".to_owned(),
            });
        }

        self.entries.insert(
            host.to_owned(),
            CacheEntry { addrs: addrs.clone(), resolved_at: Instant::now() },
        );
        trace!(host, ?addrs, "dns cache updated");
        Ok(addrs)
    }
}

fn with_port(addrs: &[IpAddr], port: u16) -> Vec<SocketAddr> {
    addrs.iter().map(|ip| SocketAddr::new(*ip, port)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ip_literals_bypass_the_cache() {
        let cache = DnsCache::new();
        let addrs = cache.resolve("127.0.0.1", 8080).await.expect("resolve");
        assert_eq!(addrs, vec!["127.0.0.1:8080".parse().expect("addr")]);
        assert!(cache.entries.is_empty());
    }

    #[tokio::test]
    async fn cached_entries_serve_any_port() {
        let cache = DnsCache::new();
        let first = cache.resolve("localhost", 80).await.expect("resolve");
        let second = cache.resolve("localhost", 443).await.expect("resolve");
        assert_eq!(cache.entries.len(), 1);
        assert_eq!(first.len(), second.len());
        assert!(first.iter().all(|a| a.port() == 80));
        assert!(second.iter().all(|a| a.port() == 443));
    }

    #[tokio::test]
    async fn unresolvable_hosts_error() {
        let cache = DnsCache::new();
        let err = cache
            .resolve("host.invalid", 80)
            .await
            .expect_err("should not resolve");
        assert!(matches!(err, AttackError::Dns { .. }));
    }

    #[test]
    fn shared_cache_is_a_singleton() {
        assert!(Arc::ptr_eq(&DnsCache::shared(), &DnsCache::shared()));
    }

    #[tokio::test]
    async fn stale_entries_are_refreshed_lazily() {
        let cache = DnsCache::with_ttl(Duration::from_millis(10));
        cache.resolve("localhost", 80).await.expect("resolve");
        let first = cache.entries.get("localhost").expect("entry").resolved_at;

        tokio::time::sleep(Duration::from_millis(30)).await;
        let addrs = cache.resolve("localhost", 80).await.expect("resolve");
        assert!(!addrs.is_empty());

        let second = cache.entries.get("localhost").expect("entry").resolved_at;
        assert!(second > first, "a stale entry must be re-resolved on lookup");
    }

    #[tokio::test]
    async fn stale_entries_survive_refresh_failure() {
        let cache = DnsCache::with_ttl(Duration::from_millis(10));
        // Seed an entry for a host that can never re-resolve (.invalid is
        // reserved), then let it go stale.
        let cached: Vec<IpAddr> = vec!["192.0.2.7".parse().expect("ip")];
        cache.entries.insert(
            "host.invalid".to_owned(),
            CacheEntry { addrs: cached, resolved_at: Instant::now() },
        );
        tokio::time::sleep(Duration::from_millis(30)).await;

        let addrs = cache
            .resolve("host.invalid", 443)
            .await
            .expect("the stale entry must be served when the refresh fails");
        assert_eq!(addrs, vec!["192.0.2.7:443".parse().expect("addr")]);
    }

    #[tokio::test]
    async fn fresh_entries_are_served_within_the_ttl() {
        let cache = DnsCache::with_ttl(Duration::from_secs(3600));
        cache.resolve("localhost", 80).await.expect("resolve");
        let first = cache.entries.get("localhost").expect("entry").resolved_at;

        cache.resolve("localhost", 80).await.expect("resolve");
        let second = cache.entries.get("localhost").expect("entry").resolved_at;
        assert_eq!(first, second, "an unexpired entry must not be re-resolved");
    }
}
