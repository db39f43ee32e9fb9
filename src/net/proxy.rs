use http::Uri;

/// Where to find the proxy for a given target, if any.
#[derive(Debug, Clone, Default)]
pub enum ProxySelector {
    /// Consult `HTTP_PROXY`/`HTTPS_PROXY`/`ALL_PROXY` (and lowercase
    /// variants) per target scheme, honoring `NO_PROXY`.
    #[default]
    Environment,
    /// Route every connection through one proxy.
    Fixed(Uri),
    /// Never proxy.
    Disabled,
}

/// Proxy endpoint to CONNECT through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyServer {
    pub host: String,
    pub port: u16,
}

impl ProxySelector {
    pub fn proxy_for(&self, target: &Uri) -> Option<ProxyServer> {
        match self {
            ProxySelector::Disabled => None,
            ProxySelector::Fixed(uri) => endpoint(uri),
            ProxySelector::Environment => {
                let host = target.host()?;
                if is_loopback(host) || no_proxy_matches(host) {
                    return None;
                }
                let names: &[&str] = if target.scheme_str() == Some("https") {
                    &["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"]
                } else {
                    &["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"]
                };
                let raw = names
                    .iter()
                    .filter_map(|name| std::env::var(name).ok())
                    .find(|v| !v.is_empty())?;
                endpoint(&raw.parse::<Uri>().ok()?)
            }
        }
    }
}

fn endpoint(uri: &Uri) -> Option<ProxyServer> {
    let host = uri.host()?.to_owned();
    let port = uri
        .port_u16()
        .unwrap_or(if uri.scheme_str() == Some("https") { 443 } else { 80 });
    Some(ProxyServer { host, port })
}

/// Loopback targets always go direct, whatever the environment says.
fn is_loopback(host: &str) -> bool {
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }
    host.trim_matches(|c| c == '[' || c == ']')
        .parse::<std::net::IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

/// `NO_PROXY` entries match a host exactly or as a domain suffix;
/// a single `*` disables proxying entirely.
fn no_proxy_matches(host: &str) -> bool {
    let list = std::env::var("NO_PROXY")
        .or_else(|_| std::env::var("no_proxy"))
        .unwrap_or_default();
    list.split(',').map(str::trim).filter(|e| !e.is_empty()).any(|entry| {
        entry == "*"
            || host == entry
            || host.ends_with(&format!(".{}", entry.trim_start_matches('.')))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for name in [
            "HTTP_PROXY",
            "http_proxy",
            "HTTPS_PROXY",
            "https_proxy",
            "ALL_PROXY",
            "all_proxy",
            "NO_PROXY",
            "no_proxy",
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn disabled_never_proxies() {
        clear_env();
        std::env::set_var("HTTP_PROXY", "http://proxy.test:3128");
        let target: Uri = "http://upstream.test/".parse().expect("uri");
        assert_eq!(ProxySelector::Disabled.proxy_for(&target), None);
        clear_env();
    }

    #[test]
    #[serial]
    fn environment_selects_by_scheme() {
        clear_env();
        std::env::set_var("HTTP_PROXY", "http://plain.test:3128");
        std::env::set_var("HTTPS_PROXY", "http://secure.test:3129");

        let selector = ProxySelector::Environment;
        let http: Uri = "http://upstream.test/".parse().expect("uri");
        let https: Uri = "https://upstream.test/".parse().expect("uri");
        assert_eq!(
            selector.proxy_for(&http),
            Some(ProxyServer { host: "plain.test".into(), port: 3128 })
        );
        assert_eq!(
            selector.proxy_for(&https),
            Some(ProxyServer { host: "secure.test".into(), port: 3129 })
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn no_proxy_suffix_matches() {
        clear_env();
        std::env::set_var("HTTP_PROXY", "http://proxy.test:3128");
        std::env::set_var("NO_PROXY", "internal.test, other.example");

        let selector = ProxySelector::Environment;
        let skipped: Uri = "http://api.internal.test/".parse().expect("uri");
        let proxied: Uri = "http://upstream.test/".parse().expect("uri");
        assert_eq!(selector.proxy_for(&skipped), None);
        assert!(selector.proxy_for(&proxied).is_some());
        clear_env();
    }

    #[test]
    #[serial]
    fn loopback_targets_are_never_proxied() {
        clear_env();
        std::env::set_var("HTTP_PROXY", "http://proxy.test:3128");
        let selector = ProxySelector::Environment;
        for target in ["http://localhost:8080/", "http://127.0.0.1/", "http://[::1]:9090/"] {
            let target: Uri = target.parse().expect("uri");
            assert_eq!(selector.proxy_for(&target), None, "{target} must go direct");
        }
        clear_env();
    }

    #[test]
    #[serial]
    fn fixed_proxy_defaults_scheme_port() {
        clear_env();
        let selector = ProxySelector::Fixed("http://proxy.test".parse().expect("uri"));
        let target: Uri = "https://upstream.test/".parse().expect("uri");
        assert_eq!(
            selector.proxy_for(&target),
            Some(ProxyServer { host: "proxy.test".into(), port: 80 })
        );
    }
}
