//! Agent settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files.  Every section carries
//! `#[serde(default)]` so a partial `settings.toml` only overrides the keys
//! it names.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::AppPaths;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// A setting combination the agent refuses to run with.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("audio.{field} must be greater than zero")]
    ZeroAudioParameter { field: &'static str },

    #[error("audio.bits_per_sample must be 16 (got {0})")]
    UnsupportedBitDepth(u16),

    #[error("recorder.failure_threshold must be at least 1")]
    ZeroFailureThreshold,

    #[error(
        "server.status_timeout_ms ({timeout_ms}) must be strictly less than \
         recorder.poll_interval_ms ({interval_ms})"
    )]
    StatusTimeoutTooLong { timeout_ms: u64, interval_ms: u64 },

    #[error("server.base_url must start with http:// or https:// (got {0:?})")]
    BadBaseUrl(String),

    #[error("wifi.max_profiles must be at least 1")]
    NoProfileSlots,
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Where the controller lives and how long a status query may take.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the controller, without a trailing slash
    /// (e.g. `http://10.104.16.88:8000`).
    pub base_url: String,
    /// Timeout for one `GET /status` round-trip.
    pub status_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://10.104.16.88:8000".into(),
            status_timeout_ms: 800,
        }
    }
}

// ---------------------------------------------------------------------------
// DeviceConfig
// ---------------------------------------------------------------------------

/// Device identity inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Explicit device id.  `None` derives one from `hardware_address`.
    pub id: Option<String>,
    /// MAC-style hardware address (`aa:bb:cc:dd:ee:ff`) used by the host
    /// link in place of a radio's burned-in address.
    pub hardware_address: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: None,
            hardware_address: "02:00:00:00:00:01".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Capture format and arena sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate of the uploaded PCM in Hz.
    pub sample_rate: u32,
    /// Bits per sample of the uploaded PCM (only 16 is supported).
    pub bits_per_sample: u16,
    /// Channel count of the uploaded PCM.
    pub channels: u16,
    /// Samples requested from the source per read.
    pub chunk_samples: usize,
    /// Upper bound on one blocking source read.
    pub read_timeout_ms: u64,
    /// Longest recording the arena can hold; longer ones are cut and flushed.
    pub max_recording_secs: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            bits_per_sample: 16,
            channels: 1,
            chunk_samples: 512,
            read_timeout_ms: 100,
            max_recording_secs: 30,
        }
    }
}

impl AudioConfig {
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample / 8) * usize::from(self.channels)
    }

    /// `max_recording_secs × sample_rate × bytes_per_sample`.
    ///
    /// Peak memory is twice this while an upload is in flight: the HTTP body
    /// is one owned copy of the arena, allocated fallibly so a short heap
    /// fails the upload with an out-of-memory error instead of aborting.
    pub fn arena_capacity(&self) -> usize {
        self.max_recording_secs as usize * self.sample_rate as usize * self.bytes_per_sample()
    }

    pub fn chunk_bytes(&self) -> usize {
        self.chunk_samples * self.bytes_per_sample()
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// RecorderConfig
// ---------------------------------------------------------------------------

/// Control-loop cadence and the stop safety valve.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Time between two status polls.
    pub poll_interval_ms: u64,
    /// Consecutive inconclusive polls after which an armed recording is
    /// stopped as if the controller had said so.
    pub failure_threshold: u32,
    /// Sleep between loop iterations while idle.
    pub idle_delay_ms: u64,
    /// Wait after a failed reconnection pass before trying again.
    pub reconnect_delay_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            failure_threshold: 3,
            idle_delay_ms: 100,
            reconnect_delay_ms: 5_000,
        }
    }
}

impl RecorderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// QualityConfig
// ---------------------------------------------------------------------------

/// Thresholds for the per-chunk level analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Chunks below this level (dB full scale) count as silent.
    pub silence_threshold_db: f32,
    /// Fraction of full scale at or beyond which a sample counts as clipped.
    pub clip_level: f32,
    /// Fraction of clipped samples above which a chunk is a clip event.
    pub clip_ratio: f32,
    /// Level reported for an all-zero chunk.
    pub floor_db: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            silence_threshold_db: -40.0,
            clip_level: 0.91,
            clip_ratio: 0.01,
            floor_db: -100.0,
        }
    }
}

// ---------------------------------------------------------------------------
// UploadConfig
// ---------------------------------------------------------------------------

/// Size-proportional upload timeout parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Lower bound of the upload timeout.
    pub min_timeout_ms: u64,
    /// Timeout granted per KiB of payload.
    pub ms_per_kb: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            min_timeout_ms: 30_000,
            ms_per_kb: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// WifiConfig
// ---------------------------------------------------------------------------

/// One network entry as written in `settings.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileEntry {
    pub name: String,
    pub credential: String,
}

/// Association timing and the profile seed list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiConfig {
    /// Per-profile association timeout.
    pub connect_timeout_ms: u64,
    /// Number of profile slots in the persistent store.
    pub max_profiles: usize,
    /// Written to the store on first boot only.
    pub defaults: Vec<ProfileEntry>,
    /// Tried when the store is empty; persisted once it works.
    pub fallback: ProfileEntry,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 20_000,
            max_profiles: 5,
            defaults: vec![ProfileEntry {
                name: "capture-net".into(),
                credential: "change-me".into(),
            }],
            fallback: ProfileEntry {
                name: "capture-agent".into(),
                credential: String::new(),
            },
        }
    }
}

impl WifiConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// AgentConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level agent configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use capture_agent::config::AgentConfig;
///
/// let config = AgentConfig::load().unwrap();
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub server: ServerConfig,
    pub device: DeviceConfig,
    pub audio: AudioConfig,
    pub recorder: RecorderConfig,
    pub quality: QualityConfig,
    pub upload: UploadConfig,
    pub wifi: WifiConfig,
}

impl AgentConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AgentConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject combinations that would break the control loop's timing or the
    /// arena sizing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.server.base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::BadBaseUrl(url.clone()));
        }

        for (field, value) in [
            ("sample_rate", self.audio.sample_rate as usize),
            ("channels", usize::from(self.audio.channels)),
            ("chunk_samples", self.audio.chunk_samples),
            ("max_recording_secs", self.audio.max_recording_secs as usize),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroAudioParameter { field });
            }
        }
        if self.audio.bits_per_sample != 16 {
            return Err(ConfigError::UnsupportedBitDepth(self.audio.bits_per_sample));
        }

        if self.recorder.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        if self.server.status_timeout_ms >= self.recorder.poll_interval_ms {
            return Err(ConfigError::StatusTimeoutTooLong {
                timeout_ms: self.server.status_timeout_ms,
                interval_ms: self.recorder.poll_interval_ms,
            });
        }

        if self.wifi.max_profiles == 0 {
            return Err(ConfigError::NoProfileSlots);
        }
        Ok(())
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.server.status_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
