//! Agent entry point.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AgentConfig`] (path from the first argument, else the platform
//!    `settings.toml`, written with defaults on first run) and validate it.
//! 3. Resolve the device id from the hardware address or the override.
//! 4. Open the profile store and seed the configured defaults once.
//! 5. Open the microphone (degrades to a source that only reports errors).
//! 6. Build the HTTP clients, the recorder and the agent.
//! 7. Run the agent on a current-thread tokio runtime until Ctrl-C.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use capture_agent::{
    audio::{AudioSource, MicSource, SourceError},
    config::{AgentConfig, AppPaths},
    net::{parse_hardware_address, DeviceId, FileKvStore, HostLink, ProfileStore},
    recorder::{Agent, Recorder},
    remote::{HttpStatusClient, HttpUploadClient, StatusPoller, Uploader},
};

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("capture agent starting up");

    // 2. Configuration
    let paths = AppPaths::new();
    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => AgentConfig::load_from(&path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => {
            let first_run = !paths.settings_file.exists();
            let config = AgentConfig::load().unwrap_or_else(|e| {
                log::warn!("Failed to load config ({e}); using defaults");
                AgentConfig::default()
            });
            if first_run {
                match config.save() {
                    Ok(()) => log::info!(
                        "wrote default settings to {}",
                        paths.settings_file.display()
                    ),
                    Err(e) => log::warn!("could not write default settings: {e}"),
                }
            }
            config
        }
    };
    config.validate().context("invalid configuration")?;

    // 3. Identity
    let hardware_address = parse_hardware_address(&config.device.hardware_address)?;
    let device = DeviceId::resolve(config.device.id.as_deref(), hardware_address);
    log::info!("device id: {device}");

    // 4. Network profiles
    let kv = FileKvStore::open(&paths.profiles_file)?;
    let mut profiles = ProfileStore::new(kv, config.wifi.max_profiles);
    let defaults = config
        .wifi
        .defaults
        .iter()
        .map(|p| (p.name.as_str(), p.credential.as_str()));
    if let Err(e) = profiles.seed_defaults_if_empty(defaults) {
        log::warn!("could not seed default networks: {e}");
    }
    let link = HostLink::new(&config.server.base_url, hardware_address)?;

    // 5. Audio source
    let source: Box<dyn AudioSource> = match MicSource::open(config.audio.sample_rate) {
        Ok(mic) => Box::new(mic),
        Err(e) => {
            log::warn!("Microphone unavailable ({e}); recordings will be empty");
            Box::new(NoMicSource)
        }
    };

    // 6. Clients, recorder, agent
    let poller: Arc<dyn StatusPoller> = Arc::new(HttpStatusClient::from_config(&config));
    let uploader: Arc<dyn Uploader> = Arc::new(HttpUploadClient::from_config(&config));
    let recorder = Recorder::new(&config, source, uploader, device);
    let agent = Agent::new(&config, recorder, poller, Box::new(link), profiles);

    // 7. Run
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    rt.block_on(async {
        let flag = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Ctrl-C received, stopping after the current step");
                flag.store(true, Ordering::Relaxed);
            }
        });
        agent.run(shutdown).await;
    });

    Ok(())
}

// ---------------------------------------------------------------------------
// NoMicSource — stand-in when no input device can be opened
// ---------------------------------------------------------------------------

/// Waits out every read and reports a driver error, so the agent keeps its
/// cadence and the summary counts the failures.
struct NoMicSource;

impl AudioSource for NoMicSource {
    fn read(&mut self, _buf: &mut [u8], timeout: Duration) -> Result<usize, SourceError> {
        std::thread::sleep(timeout);
        Err(SourceError::Driver("no input device".into()))
    }

    fn discard_pending(&mut self) {}
}
