//! reqwest-backed [`Transport`].

use std::time::Duration;

use chrono::Utc;
use reqwest::blocking::Client;
use reqwest::header::RETRY_AFTER;

use super::error::{DownloadError, DownloadResult};
use super::retry::parse_retry_after;
use super::transport::{Transport, TransportResponse};

/// Default read timeout for HTTP requests in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default User-Agent header.
pub const DEFAULT_USER_AGENT: &str = concat!("harvester/", env!("CARGO_PKG_VERSION"));

/// Client settings for [`HttpTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOptions {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Blocking HTTP transport.
///
/// The read timeout applies to the whole response, including streaming the
/// body, so a stalled transfer surfaces as a transient error.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    options: HttpOptions,
}

impl HttpTransport {
    /// Create a transport with the given client settings.
    pub fn new(options: HttpOptions) -> DownloadResult<Self> {
        let client = Client::builder()
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .user_agent(options.user_agent.clone())
            .build()
            .map_err(|e| DownloadError::Client(e.to_string()))?;

        Ok(Self { client, options })
    }

    pub fn options(&self) -> &HttpOptions {
        &self.options
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> DownloadResult<TransportResponse> {
        let response = self.client.get(url).send().map_err(|e| classify(url, e))?;

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));

        Ok(TransportResponse {
            status: response.status().as_u16(),
            content_length: response.content_length(),
            retry_after,
            body: Box::new(response),
        })
    }
}

fn classify(url: &str, e: reqwest::Error) -> DownloadError {
    if e.is_builder() {
        DownloadError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        }
    } else if e.is_timeout() {
        DownloadError::transient(url, format!("timed out: {}", e))
    } else {
        DownloadError::transient(url, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = HttpOptions::default();
        assert_eq!(options.timeout.as_secs(), DEFAULT_TIMEOUT_SECS);
        assert_eq!(options.connect_timeout.as_secs(), DEFAULT_CONNECT_TIMEOUT_SECS);
        assert!(options.user_agent.starts_with("harvester/"));
    }

    #[test]
    fn test_transport_new() {
        let transport = HttpTransport::new(HttpOptions {
            timeout: Duration::from_secs(60),
            ..HttpOptions::default()
        })
        .unwrap();
        assert_eq!(transport.options().timeout.as_secs(), 60);
    }

    #[test]
    fn test_invalid_url_is_not_retryable() {
        let transport = HttpTransport::new(HttpOptions::default()).unwrap();
        let err = transport.get("not a url").unwrap_err();
        assert!(!err.is_retryable(), "{:?}", err);
    }
}
