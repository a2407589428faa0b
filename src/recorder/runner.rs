//! The agent's control loop.
//!
//! [`Agent`] owns the [`Recorder`], the status poller, the link and the
//! profile store, and runs one cooperative loop:
//!
//! ```text
//! loop
//!   ├─ link down?  → abandon recording, connect() pass
//!   │                  └─ all failed → sleep reconnect_delay
//!   ├─ poll due?   → StatusPoller::poll → Recorder::on_poll  (begin / flush)
//!   │                  └─ inconclusive and WifiLink::check fails
//!   │                       → abandon recording, connect() pass
//!   └─ armed?      → Recorder::capture_once                   (bounded read)
//!      idle?       → sleep idle_delay
//! ```
//!
//! Every step runs to completion before the next one starts; an upload in
//! progress delays polling and capture until it returns or times out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::{AgentConfig, ProfileEntry};
use crate::net::{connect, KeyValueStore, ProfileStore, WifiLink};
use crate::remote::StatusPoller;

use super::machine::Recorder;
use super::state::{PollOutcome, RecordingState};

// ---------------------------------------------------------------------------
// Tick
// ---------------------------------------------------------------------------

/// Where one loop iteration left the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// No link and the reconnection pass failed.
    Offline,

    /// The link was re-established; nothing else ran this iteration.
    Reconnected,

    /// Not recording.
    Idle,

    /// Recording.
    Armed,
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

pub struct Agent<K: KeyValueStore> {
    recorder: Recorder,
    poller: Arc<dyn StatusPoller>,
    link: Box<dyn WifiLink>,
    profiles: ProfileStore<K>,
    fallback: ProfileEntry,
    connect_timeout: Duration,
    poll_interval: Duration,
    idle_delay: Duration,
    reconnect_delay: Duration,
    next_poll: Option<Instant>,
}

impl<K: KeyValueStore> Agent<K> {
    pub fn new(
        config: &AgentConfig,
        recorder: Recorder,
        poller: Arc<dyn StatusPoller>,
        link: Box<dyn WifiLink>,
        profiles: ProfileStore<K>,
    ) -> Self {
        Self {
            recorder,
            poller,
            link,
            profiles,
            fallback: config.wifi.fallback.clone(),
            connect_timeout: config.wifi.connect_timeout(),
            poll_interval: config.recorder.poll_interval(),
            idle_delay: config.recorder.idle_delay(),
            reconnect_delay: config.recorder.reconnect_delay(),
            next_poll: None,
        }
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn profiles(&self) -> &ProfileStore<K> {
        &self.profiles
    }

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    /// Run until `shutdown` is set, then flush an armed recording.
    pub async fn run(mut self, shutdown: Arc<AtomicBool>) {
        log::info!("recorder: agent running as {}", self.recorder.device());

        while !shutdown.load(Ordering::Relaxed) {
            self.tick().await;
        }

        log::info!("recorder: shutdown requested");
        if let Some(report) = self.recorder.shutdown().await {
            log::info!(
                "recorder: final recording {} ({} bytes)",
                if report.uploaded() { "uploaded" } else { "lost" },
                report.bytes
            );
        }
        log::info!("recorder: agent stopped");
    }

    /// One loop iteration.
    pub async fn tick(&mut self) -> Tick {
        if !self.link.is_connected() {
            return self.reconnect().await;
        }

        let now = Instant::now();
        if self.next_poll.map_or(true, |due| now >= due) {
            self.next_poll = Some(now + self.poll_interval);
            let outcome = self.poller.poll(self.recorder.device()).await;
            // a dead link must not count toward the safety stop
            if outcome == PollOutcome::Inconclusive
                && !self.link.check(self.connect_timeout).await
            {
                log::warn!("recorder: link lost after an unanswered poll");
                return self.reconnect().await;
            }
            self.recorder.on_poll(outcome).await;
        }

        match self.recorder.state() {
            RecordingState::Armed => {
                self.recorder.capture_once().await;
            }
            RecordingState::Idle => tokio::time::sleep(self.idle_delay).await,
        }

        match self.recorder.state() {
            RecordingState::Armed => Tick::Armed,
            RecordingState::Idle => Tick::Idle,
        }
    }

    async fn reconnect(&mut self) -> Tick {
        self.recorder.abandon();

        match connect(
            &mut *self.link,
            &mut self.profiles,
            &self.fallback,
            self.connect_timeout,
        )
        .await
        {
            Ok(profile) => {
                log::info!("recorder: link up via {:?}", profile.name);
                // poll straight away
                self.next_poll = None;
                Tick::Reconnected
            }
            Err(e) => {
                log::warn!(
                    "recorder: {e}, retrying in {}ms",
                    self.reconnect_delay.as_millis()
                );
                tokio::time::sleep(self.reconnect_delay).await;
                Tick::Offline
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
