use std::time::Duration;
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Proxy};
use crate::config::HttpConfig;
use crate::errors::{AppError, Result};

/// Lightweight header probing of remote media.
#[async_trait]
pub trait RemoteProbe: Send + Sync {
    /// Value of response header `name` for `url`, if the server declared one.
    /// Network-unreachable failures are reported as [`AppError::RetryableNetwork`].
    async fn header(&self, url: &str, name: &str) -> Result<Option<String>>;

    async fn content_length(&self, url: &str) -> Result<Option<u64>> {
        Ok(self
            .header(url, "content-length")
            .await?
            .and_then(|value| value.trim().parse::<u64>().ok()))
    }
}

/// Shared HTTP client used for header probes.
pub struct HttpPool {
    client: Client,
    max_connections: usize,
    timeout: Duration,
}

impl HttpPool {
    pub fn new(max_connections: usize, timeout_seconds: u64) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_seconds);
        let client = Self::builder(max_connections, timeout).build()?;

        Ok(Self {
            client,
            max_connections,
            timeout,
        })
    }

    pub fn from_config(config: &HttpConfig) -> Result<Self> {
        let pool = Self::new(config.max_connections, config.timeout_secs)?;
        match &config.proxy {
            Some(proxy_url) => pool.with_proxy(proxy_url),
            None => Ok(pool),
        }
    }

    pub fn with_proxy(mut self, proxy_url: &str) -> Result<Self> {
        let proxy = Proxy::all(proxy_url)?;
        self.client = Self::builder(self.max_connections, self.timeout)
            .proxy(proxy)
            .build()?;
        log::info!("🌐 [HTTP] Using proxy: {}", proxy_url);
        Ok(self)
    }

    fn builder(max_connections: usize, timeout: Duration) -> ClientBuilder {
        ClientBuilder::new()
            .pool_max_idle_per_host(max_connections)
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36")
            .gzip(true)
            .brotli(true)
            .tcp_keepalive(Duration::from_secs(60))
    }

    pub fn get_client(&self) -> &Client {
        &self.client
    }
}

fn classify(url: &str, error: reqwest::Error) -> AppError {
    if error.is_connect() {
        AppError::RetryableNetwork(format!("Cannot reach {}: {}", url, error))
    } else {
        AppError::Http(error)
    }
}

#[async_trait]
impl RemoteProbe for HttpPool {
    async fn header(&self, url: &str, name: &str) -> Result<Option<String>> {
        log::debug!("🌐 [HTTP] HEAD {} for {}", url, name);
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        if !response.status().is_success() {
            log::debug!("⚠️ [HTTP] HEAD {} returned {}", url, response.status());
        }

        Ok(response
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct StaticProbe(HashMap<&'static str, &'static str>);

    #[async_trait]
    impl RemoteProbe for StaticProbe {
        async fn header(&self, _url: &str, name: &str) -> Result<Option<String>> {
            Ok(self.0.get(name).map(|v| v.to_string()))
        }
    }

    #[tokio::test]
    async fn content_length_parses_header() {
        let probe = StaticProbe(HashMap::from([("content-length", " 1024 ")]));
        assert_eq!(probe.content_length("http://x").await.unwrap(), Some(1024));

        let garbage = StaticProbe(HashMap::from([("content-length", "lots")]));
        assert_eq!(garbage.content_length("http://x").await.unwrap(), None);
    }

    #[test]
    fn builds_with_and_without_proxy() {
        let pool = HttpPool::new(4, 5).unwrap();
        assert!(pool.with_proxy("socks5://127.0.0.1:1080").is_ok());
    }
}
