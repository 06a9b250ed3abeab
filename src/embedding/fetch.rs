//! HTTP(S) image fetching.

use std::io::Read;
use std::time::Duration;

use reqwest::StatusCode;
use url::Url;

const USER_AGENT: &str = concat!("visearch/", env!("CARGO_PKG_VERSION"));

/// Why a fetch failed. Kept separate from decode errors so callers can decide
/// whether to retry.
#[derive(Debug, thiserror::Error)]
pub enum FetchFailure {
    #[error("server responded with status {0}")]
    Status(StatusCode),

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("response body exceeds {0} bytes")]
    TooLarge(usize),
}

impl FetchFailure {
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchFailure::Timeout | FetchFailure::Connect(_) => true,
            FetchFailure::Status(status) => status.is_server_error(),
            _ => false,
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchFailure::Timeout
        } else if err.is_connect() {
            FetchFailure::Connect(err.to_string())
        } else {
            FetchFailure::Request(err.to_string())
        }
    }
}

/// Blocking image fetcher with a per-request timeout and a body size cap.
///
/// The client is built once and shared; it is safe to call from many threads.
pub struct ImageFetcher {
    client: reqwest::blocking::Client,
    max_bytes: usize,
}

impl ImageFetcher {
    pub fn new(timeout: Duration, max_bytes: usize) -> reqwest::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .pool_idle_timeout(timeout)
            .build()?;

        Ok(Self { client, max_bytes })
    }

    pub fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchFailure> {
        let iden = format!("{}{}", url.host_str().unwrap_or_default(), url.path());
        log::debug!("{iden}: requesting");

        let resp = self
            .client
            .get(url.clone())
            .send()
            .map_err(FetchFailure::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            log::debug!("{iden}: {}", status);
            return Err(FetchFailure::Status(status));
        }

        if let Some(len) = resp.content_length() {
            if len > self.max_bytes as u64 {
                return Err(FetchFailure::TooLarge(self.max_bytes));
            }
        }

        // content-length may be absent or wrong, so cap the read as well
        let mut body = Vec::new();
        resp.take(self.max_bytes as u64 + 1)
            .read_to_end(&mut body)
            .map_err(|e| FetchFailure::Body(e.to_string()))?;

        if body.len() > self.max_bytes {
            return Err(FetchFailure::TooLarge(self.max_bytes));
        }

        log::debug!("{iden}: fetched {} bytes", body.len());
        Ok(body)
    }
}
