use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use reqwest::header::{ACCEPT, CACHE_CONTROL, UPGRADE_INSECURE_REQUESTS, USER_AGENT};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

pub const BROWSER_USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36 Edg/126.0.2592.87",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:127.0) Gecko/20100101 Firefox/127.0",
];

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agents: Vec<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agents: BROWSER_USER_AGENTS.iter().map(|ua| ua.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Single-shot HTML fetcher. A failed request is not retried; the next
/// scheduled cycle is the retry.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    user_agents: Vec<String>,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()
            .context("building reqwest client")?;

        let user_agents = if config.user_agents.is_empty() {
            HttpClientConfig::default().user_agents
        } else {
            config.user_agents
        };

        Ok(Self {
            client,
            user_agents,
        })
    }

    /// Rotates through the configured browser user agents by wall-clock nanos.
    pub fn pick_user_agent(&self) -> &str {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as usize)
            .unwrap_or_default();
        &self.user_agents[nanos % self.user_agents.len()]
    }

    pub async fn fetch_html(&self, url: &str) -> Result<FetchedResponse, HttpError> {
        let span = info_span!("http_fetch", url);
        async {
            let resp = self
                .client
                .get(url)
                .header(USER_AGENT, self.pick_user_agent())
                .header(UPGRADE_INSECURE_REQUESTS, "1")
                .header(CACHE_CONTROL, "no-cache")
                .header(ACCEPT, ACCEPT_HTML)
                .send()
                .await?;

            let status = resp.status();
            let final_url = resp.url().to_string();
            debug!(status = status.as_u16(), "response received");

            if !status.is_success() {
                return Err(HttpError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let body = resp.bytes().await?.to_vec();
            Ok(FetchedResponse {
                status,
                final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_rotates_browser_agents() {
        let config = HttpClientConfig::default();
        assert_eq!(config.user_agents.len(), BROWSER_USER_AGENTS.len());
        assert_eq!(config.timeout, Duration::from_secs(20));
    }

    #[test]
    fn empty_agent_list_falls_back_to_defaults() {
        let fetcher = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(1),
            user_agents: Vec::new(),
        })
        .expect("client");
        assert!(BROWSER_USER_AGENTS.contains(&fetcher.pick_user_agent()));
    }
}
