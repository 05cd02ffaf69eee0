use reqwest::{Client, Proxy};
use std::time::Duration;
use tracing::{info, warn};

/// Network settings shared by every backend client.
#[derive(Debug, Clone, Default)]
pub struct HttpSettings {
    /// `providers.<name>.proxy`: `None` = unset, `Some("")` = force direct.
    pub provider_proxy: Option<String>,
    /// `network.proxy`
    pub global_proxy: Option<String>,
    /// `network.noProxy`
    pub no_proxy: Vec<String>,
    pub timeout: Duration,
}

impl HttpSettings {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}

#[derive(Debug, PartialEq)]
enum ProxyChoice {
    Use(String),
    Direct,
    /// Leave reqwest to read HTTPS_PROXY / HTTP_PROXY.
    Environment,
}

/// Whether `host` matches a no-proxy rule.
/// Rules: exact host, `*.example.com` (subdomains only), `.example.com` (domain and subdomains).
fn bypasses_proxy(host: &str, rules: &[String]) -> bool {
    let host = host.to_lowercase();
    rules.iter().any(|rule| {
        let rule = rule.trim().to_lowercase();
        if rule.is_empty() {
            false
        } else if let Some(suffix) = rule.strip_prefix("*.") {
            host.ends_with(&format!(".{}", suffix))
        } else if let Some(suffix) = rule.strip_prefix('.') {
            host == suffix || host.ends_with(&format!(".{}", suffix))
        } else {
            host == rule
        }
    })
}

fn host_of(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let authority = rest.split('/').next()?;
    let host_port = authority.rsplit('@').next()?;
    if let Some(v6) = host_port.strip_prefix('[') {
        return v6.split(']').next().map(|h| h.to_string());
    }
    host_port.split(':').next().map(|h| h.to_string())
}

fn choose_proxy(settings: &HttpSettings, api_base: &str) -> ProxyChoice {
    match settings.provider_proxy.as_deref() {
        Some("") => return ProxyChoice::Direct,
        Some(p) => return ProxyChoice::Use(p.to_string()),
        None => {}
    }
    match settings.global_proxy.as_deref() {
        Some(global) if !global.is_empty() => {
            let bypass = host_of(api_base)
                .map(|h| bypasses_proxy(&h, &settings.no_proxy))
                .unwrap_or(false);
            if bypass {
                ProxyChoice::Direct
            } else {
                ProxyChoice::Use(global.to_string())
            }
        }
        _ => ProxyChoice::Environment,
    }
}

/// Build a reqwest client for `api_base` honoring the proxy precedence:
/// provider proxy, then global proxy filtered by no-proxy rules, then environment.
pub fn build_http_client(settings: &HttpSettings, api_base: &str) -> Client {
    let mut builder = Client::builder().timeout(settings.timeout);

    match choose_proxy(settings, api_base) {
        ProxyChoice::Use(url) => match Proxy::all(&url) {
            Ok(proxy) => {
                info!(proxy = %url, api_base = %api_base, "Provider using proxy");
                builder = builder.proxy(proxy);
            }
            Err(e) => {
                warn!(error = %e, proxy = %url, "Invalid proxy URL, connecting directly");
            }
        },
        ProxyChoice::Direct => {
            info!(api_base = %api_base, "Provider forced to direct connect");
            builder = builder.no_proxy();
        }
        ProxyChoice::Environment => {}
    }

    builder.build().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to build HTTP client, using default");
        Client::new()
    })
}
