//! Remote recording flag.
//!
//! The controller answers `GET {base}/status?device=<id>` with a body like
//! `{"recording": true}`.  Every answer is folded into a [`PollOutcome`]:
//!
//! | Response | Outcome |
//! |---|---|
//! | 200, flag found | `Recording(flag)` |
//! | 200, no usable flag | `Inconclusive` |
//! | any other status | `Inconclusive` |
//! | transport failure / timeout | `Inconclusive` |
//!
//! Nothing is retried here; repeated `Inconclusive` results are the
//! recorder's business.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::AgentConfig;
use crate::net::DeviceId;
use crate::recorder::PollOutcome;

// ---------------------------------------------------------------------------
// StatusPoller trait
// ---------------------------------------------------------------------------

/// One status query per call.  Never fails: failures are `Inconclusive`.
#[async_trait]
pub trait StatusPoller: Send + Sync {
    async fn poll(&self, device: &DeviceId) -> PollOutcome;
}

// ---------------------------------------------------------------------------
// parse_status_body
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct StatusBody {
    recording: bool,
}

/// Extract the `recording` flag from a status body.
///
/// Well-formed JSON is decoded strictly; anything else is scanned for the
/// `"recording"` key followed by a bare or quoted `true`/`false`.
///
/// ```
/// use capture_agent::remote::parse_status_body;
///
/// assert_eq!(parse_status_body(r#"{"recording": true}"#), Some(true));
/// assert_eq!(parse_status_body(r#"{"recording":false,"#), Some(false));
/// assert_eq!(parse_status_body("<html>busy</html>"), None);
/// ```
pub fn parse_status_body(body: &str) -> Option<bool> {
    if let Ok(parsed) = serde_json::from_str::<StatusBody>(body) {
        return Some(parsed.recording);
    }

    const KEY: &str = "\"recording\"";
    let start = body.find(KEY)? + KEY.len();
    let rest = body[start..].trim_start();
    let rest = rest.strip_prefix(':')?.trim_start();
    let rest = rest.strip_prefix('"').unwrap_or(rest);

    if rest.starts_with("true") {
        Some(true)
    } else if rest.starts_with("false") {
        Some(false)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// HttpStatusClient
// ---------------------------------------------------------------------------

pub struct HttpStatusClient {
    client: reqwest::Client,
    status_url: String,
}

impl HttpStatusClient {
    /// Build a client whose every request is bounded by the configured
    /// status timeout.
    pub fn from_config(config: &AgentConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.status_timeout())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            status_url: format!("{}/status", config.server.base_url.trim_end_matches('/')),
        }
    }

    pub fn status_url(&self) -> &str {
        &self.status_url
    }
}

#[async_trait]
impl StatusPoller for HttpStatusClient {
    async fn poll(&self, device: &DeviceId) -> PollOutcome {
        let response = match self
            .client
            .get(&self.status_url)
            .query(&[("device", device.as_str())])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                log::warn!("status: request timed out");
                return PollOutcome::Inconclusive;
            }
            Err(e) => {
                log::warn!("status: request failed: {e}");
                return PollOutcome::Inconclusive;
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            log::warn!("status: controller answered HTTP {}", status.as_u16());
            return PollOutcome::Inconclusive;
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                log::warn!("status: failed to read body: {e}");
                return PollOutcome::Inconclusive;
            }
        };

        match parse_status_body(&body) {
            Some(flag) => {
                log::trace!("status: recording = {flag}");
                PollOutcome::Recording(flag)
            }
            None => {
                log::warn!("status: no recording flag in body {:?}", excerpt(&body));
                PollOutcome::Inconclusive
            }
        }
    }
}

fn excerpt(body: &str) -> &str {
    match body.char_indices().nth(64) {
        Some((end, _)) => &body[..end],
        None => body,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
