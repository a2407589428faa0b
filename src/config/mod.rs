//! Configuration module for the capture agent.
//!
//! Provides `AgentConfig` (top-level settings), one sub-config per subsystem,
//! `AppPaths` for cross-platform config directories, and TOML persistence via
//! `AgentConfig::load` / `AgentConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AgentConfig, AudioConfig, ConfigError, DeviceConfig, ProfileEntry, QualityConfig,
    RecorderConfig, ServerConfig, UploadConfig, WifiConfig,
};
