//! Cross-platform agent paths using the `dirs` crate.
//!
//! Config dir (settings + persisted network profiles):
//!   Windows: %APPDATA%\capture-agent\
//!   macOS:   ~/Library/Application Support/capture-agent/
//!   Linux:   ~/.config/capture-agent/

use std::path::PathBuf;

/// Holds all resolved agent directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for `settings.toml` and `profiles.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Full path to the key/value file backing the network profile store.
    pub profiles_file: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "capture-agent";

    /// Resolves all paths using the `dirs` crate, falling back to the current
    /// directory when the platform has no config dir.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let settings_file = config_dir.join("settings.toml");
        let profiles_file = config_dir.join("profiles.toml");

        Self {
            config_dir,
            settings_file,
            profiles_file,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_live_under_config_dir() {
        let paths = AppPaths::new();
        assert!(paths.config_dir.to_str().is_some_and(|s| !s.is_empty()));
        assert!(paths.settings_file.starts_with(&paths.config_dir));
        assert!(paths
            .profiles_file
            .file_name()
            .is_some_and(|n| n == "profiles.toml"));
    }
}
