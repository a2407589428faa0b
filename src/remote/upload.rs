//! Recording upload.
//!
//! One finished recording becomes one
//! `POST {base}/audio?device=&rate=&bits=&channels=` whose body is the raw
//! PCM and whose headers carry the format and the [`QualitySummary`].  The
//! request deadline grows with the payload (see [`upload_timeout`]).
//!
//! A failed upload is logged and reported, never retried and never kept:
//! once [`Uploader::upload`] returns the recording is gone either way.

use std::error::Error as _;
use std::io;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;

use crate::audio::QualitySummary;
use crate::config::{AgentConfig, AudioConfig, UploadConfig};
use crate::net::DeviceId;

/// Longest slice of an error response kept for the log.
pub const BODY_EXCERPT_LEN: usize = 256;

// ---------------------------------------------------------------------------
// UploadError
// ---------------------------------------------------------------------------

/// Why an upload failed.
///
/// [`code`](Self::code) keeps the firmware's numbering: negative for
/// transport-side failures, the HTTP status otherwise.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("failed to send payload: {0}")]
    SendPayload(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("out of memory preparing a {0}-byte payload")]
    OutOfMemory(usize),

    #[error("response stream error: {0}")]
    Stream(String),

    #[error("no response within {0:?}")]
    ReadTimeout(Duration),

    #[error("server answered HTTP {status}")]
    Http { status: u16, body: String },
}

impl UploadError {
    pub fn code(&self) -> i32 {
        match self {
            UploadError::ConnectionRefused(_) => -1,
            UploadError::SendPayload(_) => -3,
            UploadError::ConnectionLost(_) => -5,
            UploadError::OutOfMemory(_) => -8,
            UploadError::Stream(_) => -10,
            UploadError::ReadTimeout(_) => -11,
            UploadError::Http { status, .. } => i32::from(*status),
        }
    }

    /// Short label for the failure class, used in logs.
    pub fn classification(&self) -> &'static str {
        match self {
            UploadError::ConnectionRefused(_) => "connection refused",
            UploadError::SendPayload(_) => "send payload failed",
            UploadError::ConnectionLost(_) => "connection lost",
            UploadError::OutOfMemory(_) => "out of memory",
            UploadError::Stream(_) => "stream error",
            UploadError::ReadTimeout(_) => "read timeout",
            UploadError::Http { status, .. } if *status >= 500 => "server error",
            UploadError::Http { .. } => "rejected by server",
        }
    }

    /// Map a transport failure onto the firmware's error classes.
    fn from_transport(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            return UploadError::ReadTimeout(timeout);
        }
        if e.is_connect() {
            return UploadError::ConnectionRefused(e.to_string());
        }
        if let Some(kind) = io_error_kind(&e) {
            if matches!(
                kind,
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ) {
                return UploadError::ConnectionLost(e.to_string());
            }
        }
        if e.is_body() || e.is_request() {
            return UploadError::SendPayload(e.to_string());
        }
        if e.is_decode() {
            return UploadError::Stream(e.to_string());
        }
        UploadError::ConnectionLost(e.to_string())
    }
}

fn io_error_kind(e: &reqwest::Error) -> Option<io::ErrorKind> {
    let mut source = e.source();
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = err.source();
    }
    None
}

// ---------------------------------------------------------------------------
// upload_timeout
// ---------------------------------------------------------------------------

/// `max(min_timeout, whole KB × ms_per_kb)`.
///
/// ```
/// use std::time::Duration;
/// use capture_agent::config::UploadConfig;
/// use capture_agent::remote::upload_timeout;
///
/// let cfg = UploadConfig::default();
/// assert_eq!(upload_timeout(1024 * 1024, &cfg), Duration::from_millis(102_400));
/// assert_eq!(upload_timeout(32 * 1024, &cfg), Duration::from_millis(30_000));
/// ```
pub fn upload_timeout(bytes: usize, config: &UploadConfig) -> Duration {
    let kb = (bytes / 1024) as u64;
    let scaled = kb.saturating_mul(config.ms_per_kb);
    Duration::from_millis(scaled.max(config.min_timeout_ms))
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// PCM layout announced with every upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

impl PcmFormat {
    pub fn bytes_per_frame(&self) -> usize {
        usize::from(self.bits_per_sample / 8) * usize::from(self.channels)
    }

    /// Seconds of audio in `bytes` of this format.
    pub fn duration_secs(&self, bytes: usize) -> f32 {
        let frame = self.bytes_per_frame();
        if frame == 0 || self.sample_rate == 0 {
            return 0.0;
        }
        (bytes / frame) as f32 / self.sample_rate as f32
    }
}

impl From<&AudioConfig> for PcmFormat {
    fn from(audio: &AudioConfig) -> Self {
        Self {
            sample_rate: audio.sample_rate,
            bits_per_sample: audio.bits_per_sample,
            channels: audio.channels,
        }
    }
}

/// Format and quality headers for one upload.  Level headers are omitted
/// when no chunk produced a valid level.
pub fn metadata_headers(format: &PcmFormat, summary: &QualitySummary) -> Vec<(&'static str, String)> {
    let mut headers = vec![
        ("X-Audio-Format", "pcm".to_string()),
        ("X-Sample-Rate", format.sample_rate.to_string()),
        ("X-Bits-Per-Sample", format.bits_per_sample.to_string()),
        ("X-Channels", format.channels.to_string()),
    ];

    for (name, value) in [
        ("X-Audio-AvgDb", summary.avg_db),
        ("X-Audio-MaxDb", summary.max_db),
        ("X-Audio-MinDb", summary.min_db),
    ] {
        if let Some(db) = value {
            headers.push((name, format!("{db:.2}")));
        }
    }

    headers.extend([
        ("X-Audio-ClipCount", summary.clip_events.to_string()),
        ("X-Audio-SilenceChunks", summary.silence_chunks.to_string()),
        ("X-Audio-I2SErrors", summary.source_errors.to_string()),
        ("X-Audio-TotalChunks", summary.total_chunks.to_string()),
    ]);
    headers
}

fn body_excerpt(body: &str) -> String {
    if body.len() <= BODY_EXCERPT_LEN {
        return body.to_string();
    }
    let mut end = BODY_EXCERPT_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

// ---------------------------------------------------------------------------
// Uploader trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Uploader: Send + Sync {
    /// Send one finished recording.  `Ok` only for HTTP 200 or 204.
    async fn upload(
        &self,
        audio: &[u8],
        summary: &QualitySummary,
        device: &DeviceId,
    ) -> Result<(), UploadError>;
}

// ---------------------------------------------------------------------------
// HttpUploadClient
// ---------------------------------------------------------------------------

pub struct HttpUploadClient {
    client: reqwest::Client,
    audio_url: String,
    format: PcmFormat,
    timeouts: UploadConfig,
}

impl HttpUploadClient {
    /// The client itself has no timeout; each request gets one sized to its
    /// payload.
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            audio_url: format!("{}/audio", config.server.base_url.trim_end_matches('/')),
            format: PcmFormat::from(&config.audio),
            timeouts: config.upload.clone(),
        }
    }

    pub fn audio_url(&self) -> &str {
        &self.audio_url
    }

    async fn send(
        &self,
        audio: &[u8],
        summary: &QualitySummary,
        device: &DeviceId,
        timeout: Duration,
    ) -> Result<(), UploadError> {
        // reqwest needs an owned body
        let mut body = Vec::new();
        body.try_reserve_exact(audio.len())
            .map_err(|_| UploadError::OutOfMemory(audio.len()))?;
        body.extend_from_slice(audio);

        let mut request = self
            .client
            .post(&self.audio_url)
            .query(&[
                ("device", device.as_str().to_string()),
                ("rate", self.format.sample_rate.to_string()),
                ("bits", self.format.bits_per_sample.to_string()),
                ("channels", self.format.channels.to_string()),
            ])
            .header(CONTENT_TYPE, "application/octet-stream")
            .timeout(timeout)
            .body(body);
        for (name, value) in metadata_headers(&self.format, summary) {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| UploadError::from_transport(e, timeout))?;

        let status = response.status().as_u16();
        if status == 200 || status == 204 {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(UploadError::Http {
            status,
            body: body_excerpt(&body),
        })
    }
}

#[async_trait]
impl Uploader for HttpUploadClient {
    async fn upload(
        &self,
        audio: &[u8],
        summary: &QualitySummary,
        device: &DeviceId,
    ) -> Result<(), UploadError> {
        let timeout = upload_timeout(audio.len(), &self.timeouts);
        let duration = self.format.duration_secs(audio.len());
        log::info!(
            "upload: sending {} bytes ({duration:.1}s) for {device}, timeout {}ms",
            audio.len(),
            timeout.as_millis()
        );

        let started = Instant::now();
        let result = self.send(audio, summary, device, timeout).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(()) => log::info!(
                "upload: {} bytes accepted in {}ms",
                audio.len(),
                elapsed.as_millis()
            ),
            Err(e) => {
                log::error!(
                    "upload: FAILED for {device}: {} bytes ({duration:.1}s) after {}ms, code {} ({}): {e}",
                    audio.len(),
                    elapsed.as_millis(),
                    e.code(),
                    e.classification()
                );
                if let UploadError::Http { body, .. } = e {
                    if !body.is_empty() {
                        log::error!("upload: server said {body:?}");
                    }
                }
            }
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
