//! The recorder's owned context.
//!
//! [`Recorder`] holds everything one recording touches: the capture arena,
//! the quality analyzer and its running summary, the failure counter, the
//! audio source and the uploader.  The control loop owns exactly one and
//! drives it through three entry points:
//!
//! * [`on_poll`](Recorder::on_poll) applies a poll outcome (may begin or
//!   flush a recording);
//! * [`capture_once`](Recorder::capture_once) reads one chunk while armed
//!   (may flush when the arena fills up);
//! * [`abandon`](Recorder::abandon) / [`shutdown`](Recorder::shutdown) end a
//!   recording from outside the poll tick.
//!
//! The arena is allocated once in [`Recorder::new`] and lent to the uploader
//! by reference.

use std::sync::Arc;
use std::time::Duration;

use crate::audio::{AudioSource, CaptureBuffer, QualityAnalyzer, QualitySummary, SourceError};
use crate::config::AgentConfig;
use crate::net::DeviceId;
use crate::remote::{PcmFormat, UploadError, Uploader};

use super::state::{transition, Action, FailureCounter, PollOutcome, RecordingState, StopReason};

// ---------------------------------------------------------------------------
// FlushReport / CaptureStep
// ---------------------------------------------------------------------------

/// What happened to one finished recording.
#[derive(Debug)]
pub struct FlushReport {
    pub reason: StopReason,
    pub bytes: usize,
    pub duration_secs: f32,
    pub result: Result<(), UploadError>,
}

impl FlushReport {
    pub fn uploaded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Result of one [`Recorder::capture_once`] call.
#[derive(Debug)]
pub enum CaptureStep {
    /// Not armed; nothing was read.
    NotArmed,

    /// This many bytes went into the arena.
    Stored(usize),

    /// The read failed; counted in the summary, capture goes on.
    SourceFailed(SourceError),

    /// The arena filled up and the recording was flushed.
    Flushed(FlushReport),
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

pub struct Recorder {
    state: RecordingState,
    counter: FailureCounter,
    buffer: CaptureBuffer,
    analyzer: QualityAnalyzer,
    summary: QualitySummary,
    /// One read's worth of bytes.
    scratch: Vec<u8>,
    read_timeout: Duration,
    format: PcmFormat,
    source: Box<dyn AudioSource>,
    uploader: Arc<dyn Uploader>,
    device: DeviceId,
}

impl Recorder {
    /// Allocate the arena and the read scratch space for `config`.
    ///
    /// Expects a config that passed [`AgentConfig::validate`].
    pub fn new(
        config: &AgentConfig,
        source: Box<dyn AudioSource>,
        uploader: Arc<dyn Uploader>,
        device: DeviceId,
    ) -> Self {
        let capacity = config.audio.arena_capacity();
        log::info!(
            "recorder: {} byte arena ({}s at {} Hz), up to {} bytes while uploading",
            capacity,
            config.audio.max_recording_secs,
            config.audio.sample_rate,
            capacity.saturating_mul(2)
        );

        Self {
            state: RecordingState::Idle,
            counter: FailureCounter::new(config.recorder.failure_threshold),
            buffer: CaptureBuffer::new(capacity),
            analyzer: QualityAnalyzer::new(&config.quality),
            summary: QualitySummary::default(),
            scratch: vec![0u8; config.audio.chunk_bytes()],
            read_timeout: config.audio.read_timeout(),
            format: PcmFormat::from(&config.audio),
            source,
            uploader,
            device,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// Bytes captured in the current recording.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn summary(&self) -> &QualitySummary {
        &self.summary
    }

    // -----------------------------------------------------------------------
    // Poll tick
    // -----------------------------------------------------------------------

    /// Apply one poll outcome and carry out the resulting action.
    ///
    /// Returns the action together with the flush report when the action
    /// was a flush.
    pub async fn on_poll(&mut self, outcome: PollOutcome) -> (Action, Option<FlushReport>) {
        let (next, action) = transition(self.state, outcome, &mut self.counter);

        if outcome == PollOutcome::Inconclusive {
            log::debug!(
                "recorder: inconclusive poll ({}/{})",
                self.counter.count(),
                self.counter.threshold()
            );
        }

        let report = match action {
            Action::Begin => {
                self.begin();
                None
            }
            Action::Flush(reason) => Some(self.flush(reason).await),
            Action::None | Action::Continue => None,
        };
        self.state = next;
        (action, report)
    }

    /// Start a fresh recording.
    fn begin(&mut self) {
        self.buffer.reset();
        self.summary.reset();
        self.source.discard_pending();
        self.state = RecordingState::Armed;
        log::info!("recorder: recording started");
    }

    // -----------------------------------------------------------------------
    // Capture
    // -----------------------------------------------------------------------

    /// Read one chunk into the arena.  Flushes when the arena is full.
    pub async fn capture_once(&mut self) -> CaptureStep {
        if self.state != RecordingState::Armed {
            return CaptureStep::NotArmed;
        }

        let n = match self.source.read(&mut self.scratch, self.read_timeout) {
            Ok(n) => n,
            Err(e) => {
                self.summary.record_source_error();
                log::debug!("recorder: source read failed: {e}");
                return CaptureStep::SourceFailed(e);
            }
        };

        let chunk = &self.scratch[..n];
        let stats = self.analyzer.analyze(chunk);
        self.summary.fold(&stats);
        log::trace!(
            "recorder: chunk {} bytes, level {:?}, clipping {}, silent {}",
            n,
            stats.level,
            stats.clipping,
            stats.silent
        );

        let written = self.buffer.write(chunk);
        if written.is_truncated() {
            log::warn!(
                "recorder: buffer overflow, {} of {} bytes kept",
                written.stored(),
                n
            );
        }

        if self.buffer.is_full() {
            log::warn!(
                "recorder: capture buffer full ({} bytes), stopping",
                self.buffer.capacity()
            );
            return CaptureStep::Flushed(self.flush(StopReason::BufferFull).await);
        }
        CaptureStep::Stored(written.stored())
    }

    // -----------------------------------------------------------------------
    // Stopping
    // -----------------------------------------------------------------------

    /// Upload the current recording once, then reset the arena whatever
    /// the outcome.
    async fn flush(&mut self, reason: StopReason) -> FlushReport {
        let bytes = self.buffer.len();
        let duration_secs = self.format.duration_secs(bytes);

        match reason {
            StopReason::FailureThreshold => log::warn!(
                "recorder: stopping after {} inconclusive polls, uploading {bytes} bytes",
                self.counter.count()
            ),
            _ => log::info!("recorder: recording stopped ({reason}), uploading {bytes} bytes"),
        }

        let result = self
            .uploader
            .upload(self.buffer.as_slice(), &self.summary, &self.device)
            .await;

        if let Err(e) = &result {
            log::error!(
                "recorder: {duration_secs:.1}s recording from {} lost ({reason}): {e}",
                self.device
            );
        }

        self.buffer.reset();
        self.state = RecordingState::Idle;

        FlushReport {
            reason,
            bytes,
            duration_secs,
            result,
        }
    }

    /// Drop back to idle without uploading.  The arena is cleared by the
    /// next `begin`.
    pub fn abandon(&mut self) {
        if self.state == RecordingState::Armed {
            log::warn!(
                "recorder: link lost, abandoning recording ({} bytes)",
                self.buffer.len()
            );
            self.state = RecordingState::Idle;
        }
    }

    /// Flush an armed recording because the agent is stopping.
    pub async fn shutdown(&mut self) -> Option<FlushReport> {
        if self.state == RecordingState::Armed {
            Some(self.flush(StopReason::Shutdown).await)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingUploader  (test-only)
// ---------------------------------------------------------------------------

/// Uploader double that remembers every call and answers with a fixed
/// result.
#[cfg(test)]
pub struct RecordingUploader {
    pub calls: std::sync::Mutex<Vec<(Vec<u8>, QualitySummary, String)>>,
    fail_with: Option<u16>,
}

#[cfg(test)]
impl RecordingUploader {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            calls: std::sync::Mutex::new(Vec::new()),
            fail_with: None,
        })
    }

    pub fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            calls: std::sync::Mutex::new(Vec::new()),
            fail_with: Some(status),
        })
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.calls.lock().unwrap().iter().map(|c| c.0.len()).collect()
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl Uploader for RecordingUploader {
    async fn upload(
        &self,
        audio: &[u8],
        summary: &QualitySummary,
        device: &DeviceId,
    ) -> Result<(), UploadError> {
        self.calls
            .lock()
            .unwrap()
            .push((audio.to_vec(), summary.clone(), device.to_string()));
        match self.fail_with {
            None => Ok(()),
            Some(status) => Err(UploadError::Http {
                status,
                body: String::new(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ScriptedSource;

    use crate::recorder::state::PollOutcome::{Inconclusive, Recording};

    /// 1 s arena at 1 kHz (2000 bytes), 100-byte reads.
    fn small_config() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.audio.sample_rate = 1_000;
        config.audio.max_recording_secs = 1;
        config.audio.chunk_samples = 50;
        config.recorder.failure_threshold = 3;
        config
    }

    fn recorder(source: ScriptedSource, uploader: Arc<RecordingUploader>) -> Recorder {
        Recorder::new(
            &small_config(),
            Box::new(source),
            uploader,
            DeviceId::from_hardware_address([0, 0, 1, 2, 3, 4]),
        )
    }

    #[tokio::test]
    async fn remote_stop_uploads_everything_once_and_resets() {
        let uploader = RecordingUploader::ok();
        let mut rec = recorder(ScriptedSource::repeating(0x10, 100, 5), uploader.clone());

        assert_eq!(rec.on_poll(Recording(true)).await.0, Action::Begin);
        for _ in 0..5 {
            assert!(matches!(rec.capture_once().await, CaptureStep::Stored(100)));
        }
        assert_eq!(rec.buffered(), 500);

        let (action, report) = rec.on_poll(Recording(false)).await;
        assert_eq!(action, Action::Flush(StopReason::RemoteStop));
        let report = report.expect("flush report");
        assert!(report.uploaded());
        assert_eq!(report.bytes, 500);

        assert_eq!(uploader.sizes(), vec![500]);
        let calls = uploader.calls.lock().unwrap();
        assert_eq!(calls[0].1.total_chunks, 5);
        assert_eq!(calls[0].2, "esp32-01020304");
        drop(calls);

        assert_eq!(rec.buffered(), 0);
        assert_eq!(rec.state(), RecordingState::Idle);
    }

    #[tokio::test]
    async fn failed_upload_still_resets_the_buffer() {
        let uploader = RecordingUploader::failing(500);
        let mut rec = recorder(ScriptedSource::repeating(1, 100, 2), uploader.clone());

        rec.on_poll(Recording(true)).await;
        rec.capture_once().await;
        rec.capture_once().await;
        let (_, report) = rec.on_poll(Recording(false)).await;

        let report = report.unwrap();
        assert!(!report.uploaded());
        assert_eq!(report.result.as_ref().unwrap_err().code(), 500);
        assert_eq!(uploader.sizes(), vec![200]);
        assert_eq!(rec.buffered(), 0);
        assert_eq!(rec.state(), RecordingState::Idle);
    }

    #[tokio::test]
    async fn full_buffer_forces_a_flush_at_capacity() {
        let uploader = RecordingUploader::ok();
        // 21 reads of 100 bytes against a 2000-byte arena
        let mut rec = recorder(ScriptedSource::repeating(7, 100, 21), uploader.clone());
        rec.on_poll(Recording(true)).await;

        let mut flushed = None;
        for _ in 0..21 {
            assert!(rec.buffered() <= rec.capacity());
            if let CaptureStep::Flushed(report) = rec.capture_once().await {
                flushed = Some(report);
                break;
            }
        }

        let report = flushed.expect("buffer-full flush");
        assert_eq!(report.reason, StopReason::BufferFull);
        assert_eq!(report.bytes, 2_000);
        assert!((report.duration_secs - 1.0).abs() < 1e-6);
        assert_eq!(uploader.sizes(), vec![2_000]);
        assert_eq!(rec.state(), RecordingState::Idle);
    }

    #[tokio::test]
    async fn overflowing_read_is_truncated_to_capacity() {
        let uploader = RecordingUploader::ok();
        let mut reads: Vec<Result<Vec<u8>, SourceError>> =
            (0..19).map(|_| Ok(vec![3u8; 100])).collect();
        // 1900 stored, then a read that would overrun by 50
        reads.push(Ok(vec![4u8; 150]));
        let mut config = small_config();
        config.audio.chunk_samples = 75;
        let mut rec = Recorder::new(
            &config,
            Box::new(ScriptedSource::new(reads)),
            uploader.clone(),
            DeviceId::from_hardware_address([0; 6]),
        );
        rec.on_poll(Recording(true)).await;

        for _ in 0..19 {
            rec.capture_once().await;
        }
        assert!(matches!(rec.capture_once().await, CaptureStep::Flushed(_)));

        let calls = uploader.calls.lock().unwrap();
        assert_eq!(calls[0].0.len(), 2_000);
        assert!(calls[0].0[1_900..].iter().all(|b| *b == 4));
    }

    #[tokio::test]
    async fn failure_threshold_stops_and_uploads() {
        let uploader = RecordingUploader::ok();
        let mut rec = recorder(ScriptedSource::repeating(1, 100, 3), uploader.clone());

        rec.on_poll(Recording(true)).await;
        rec.capture_once().await;
        rec.on_poll(Inconclusive).await;
        rec.capture_once().await;
        rec.on_poll(Inconclusive).await;
        assert_eq!(rec.state(), RecordingState::Armed);

        let (action, _) = rec.on_poll(Inconclusive).await;
        assert_eq!(action, Action::Flush(StopReason::FailureThreshold));
        assert_eq!(uploader.sizes(), vec![200]);
        assert_eq!(rec.state(), RecordingState::Idle);
    }

    #[tokio::test]
    async fn source_errors_are_counted_not_fatal() {
        let uploader = RecordingUploader::ok();
        let source = ScriptedSource::new(vec![
            Ok(vec![1; 100]),
            Err(SourceError::Driver("dma".into())),
            Ok(vec![1; 100]),
        ]);
        let mut rec = recorder(source, uploader.clone());
        rec.on_poll(Recording(true)).await;

        rec.capture_once().await;
        assert!(matches!(rec.capture_once().await, CaptureStep::SourceFailed(_)));
        rec.capture_once().await;
        // script exhausted: timeouts count too
        rec.capture_once().await;

        assert_eq!(rec.state(), RecordingState::Armed);
        assert_eq!(rec.buffered(), 200);
        assert_eq!(rec.summary().source_errors, 2);
        assert_eq!(rec.summary().total_chunks, 2);
    }

    #[tokio::test]
    async fn begin_resets_state_and_discards_stale_samples() {
        use std::sync::atomic::Ordering;

        let uploader = RecordingUploader::ok();
        let source = ScriptedSource::repeating(9, 100, 4);
        let discards = source.discard_counter();
        let mut rec = recorder(source, uploader.clone());
        assert_eq!(discards.load(Ordering::SeqCst), 0);

        assert_eq!(rec.on_poll(Recording(true)).await.0, Action::Begin);
        assert_eq!(discards.load(Ordering::SeqCst), 1);
        rec.capture_once().await;

        // continuing a recording leaves the source alone
        assert_eq!(rec.on_poll(Recording(true)).await.0, Action::Continue);
        assert_eq!(rec.on_poll(Inconclusive).await.0, Action::Continue);
        assert_eq!(discards.load(Ordering::SeqCst), 1);

        rec.abandon();
        assert_eq!(rec.state(), RecordingState::Idle);
        assert!(uploader.sizes().is_empty());

        // a new recording starts from an empty arena and summary
        assert_eq!(rec.on_poll(Recording(true)).await.0, Action::Begin);
        assert_eq!(discards.load(Ordering::SeqCst), 2);
        assert_eq!(rec.buffered(), 0);
        assert_eq!(rec.summary().total_chunks, 0);
        rec.capture_once().await;
        assert_eq!(rec.buffered(), 100);
    }

    #[tokio::test]
    async fn capture_while_idle_reads_nothing() {
        let uploader = RecordingUploader::ok();
        let mut rec = recorder(ScriptedSource::repeating(1, 100, 1), uploader);
        assert!(matches!(rec.capture_once().await, CaptureStep::NotArmed));
        assert_eq!(rec.buffered(), 0);
    }

    #[tokio::test]
    async fn shutdown_flushes_only_when_armed() {
        let uploader = RecordingUploader::ok();
        let mut rec = recorder(ScriptedSource::repeating(1, 100, 1), uploader.clone());
        assert!(rec.shutdown().await.is_none());

        rec.on_poll(Recording(true)).await;
        rec.capture_once().await;
        let report = rec.shutdown().await.expect("flush on shutdown");
        assert_eq!(report.reason, StopReason::Shutdown);
        assert_eq!(uploader.sizes(), vec![100]);
    }

    #[tokio::test]
    async fn stop_with_empty_buffer_still_attempts_one_upload() {
        let uploader = RecordingUploader::ok();
        let mut rec = recorder(ScriptedSource::new(Vec::new()), uploader.clone());
        rec.on_poll(Recording(true)).await;
        rec.on_poll(Recording(false)).await;
        assert_eq!(uploader.sizes(), vec![0]);
    }
}
