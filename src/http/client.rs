//! JSON-over-HTTP client used by network oracles.
//!
//! Wraps reqwest with an env-configurable request timeout and a size cap on
//! response bodies.

use crate::error::{Error, Result};
use futures::{Stream, StreamExt, TryStreamExt};
use std::pin::Pin;
use std::sync::OnceLock;
use std::time::Duration;

const USER_AGENT: &str = concat!("flake_triage/", env!("CARGO_PKG_VERSION"));
const TIMEOUT_ENV: &str = "TRIAGE_HTTP_REQUEST_TIMEOUT_SECS";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

type Chunks = Pin<Box<dyn Stream<Item = std::io::Result<Vec<u8>>> + Send>>;

/// Timeout from `TRIAGE_HTTP_REQUEST_TIMEOUT_SECS`, read once per process.
fn env_timeout() -> Option<Duration> {
    static TIMEOUT: OnceLock<Option<Duration>> = OnceLock::new();
    *TIMEOUT.get_or_init(|| timeout_from(std::env::var(TIMEOUT_ENV).ok().as_deref()))
}

/// `0` disables the timeout; unparsable values fall back to the default.
fn timeout_from(raw: Option<&str>) -> Option<Duration> {
    match raw.and_then(|raw| raw.trim().parse::<u64>().ok()) {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
    }
}

#[derive(Debug, Clone)]
pub struct Client {
    inner: reqwest::Client,
    timeout: Option<Duration>,
}

impl Client {
    pub fn new() -> Result<Self> {
        let inner = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            inner,
            timeout: env_timeout(),
        })
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// POST `payload` as JSON with the given extra headers.
    ///
    /// Transport failures become [`Error::OracleUnavailable`] tagged with `url`.
    pub async fn post_json<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        payload: &T,
    ) -> Result<Response> {
        let mut request = self
            .inner
            .post(url)
            .header("Content-Type", "application/json")
            .body(serde_json::to_vec(payload)?);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|err| {
            let message = if err.is_timeout() {
                "request timed out".to_string()
            } else {
                format!("request failed: {err}")
            };
            Error::oracle_unavailable(url, message)
        })?;

        let status = response.status().as_u16();
        let chunks = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(std::io::Error::other)
            })
            .boxed();
        Ok(Response { status, chunks })
    }
}

/// Status plus an unread body.
pub struct Response {
    status: u16,
    chunks: Chunks,
}

impl Response {
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status, 200..=299)
    }

    /// Read the body as (lossy) UTF-8, failing past the size cap.
    pub async fn text(self) -> Result<String> {
        let body = self
            .chunks
            .try_fold(Vec::new(), |mut body, chunk| async move {
                if body.len() + chunk.len() > MAX_BODY_BYTES {
                    return Err(std::io::Error::other(format!(
                        "response body exceeds {MAX_BODY_BYTES} bytes"
                    )));
                }
                body.extend_from_slice(&chunk);
                Ok(body)
            })
            .await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}
