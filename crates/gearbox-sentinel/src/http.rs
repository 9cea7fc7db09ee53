//! Shared HTTP plumbing for the aggregator APIs.

use crate::config::HttpConfig;
use eyre::Context as _;
use reqwest::Client;
use serde::de::DeserializeOwned;

fn allow_insecure_http() -> bool {
    std::env::var("GEARBOX_SENTINEL_ALLOW_INSECURE_HTTP")
        .ok()
        .is_some_and(|v| {
            matches!(
                v.as_str(),
                "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON"
            )
        })
}

fn is_loopback_http(url: &str) -> bool {
    fn host_prefix_ok(s: &str, prefix: &str) -> bool {
        if !s.starts_with(prefix) {
            return false;
        }
        matches!(s.as_bytes().get(prefix.len()), None | Some(b':' | b'/'))
    }
    let u = url.trim();
    host_prefix_ok(u, "http://127.0.0.1")
        || host_prefix_ok(u, "http://localhost")
        || host_prefix_ok(u, "http://[::1]")
}

/// Aggregator URLs must be https unless they point at loopback.
pub fn ensure_secure_url(label: &str, url: &str) -> eyre::Result<()> {
    if url.trim().starts_with("https://") || is_loopback_http(url) || allow_insecure_http() {
        return Ok(());
    }
    eyre::bail!(
        "{label} must use https (or loopback); set GEARBOX_SENTINEL_ALLOW_INSECURE_HTTP=1 to override"
    )
}

pub fn client(cfg: &HttpConfig) -> eyre::Result<Client> {
    Client::builder()
        .timeout(cfg.timeout())
        .user_agent(cfg.user_agent.clone())
        .build()
        .context("build http client")
}

/// GET `url` and decode the JSON body into `T`.
pub async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    label: &'static str,
) -> eyre::Result<T> {
    client
        .get(url)
        .send()
        .await
        .with_context(|| format!("{label} request"))?
        .error_for_status()
        .with_context(|| format!("{label} status"))?
        .json()
        .await
        .with_context(|| format!("{label} json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_http_is_accepted() {
        assert!(is_loopback_http("http://127.0.0.1:8080/pools"));
        assert!(is_loopback_http("http://localhost"));
        assert!(!is_loopback_http("http://localhost.evil.com"));
        assert!(ensure_secure_url("yields_url", "https://yields.llama.fi/pools").is_ok());
        assert!(ensure_secure_url("yields_url", "http://[::1]/x").is_ok());
    }
}
