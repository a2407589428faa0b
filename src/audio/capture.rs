//! Host microphone source via `cpal`.
//!
//! [`MicSource`] opens the default input device and exposes it through the
//! blocking [`AudioSource`] interface.  The cpal callback runs on its own
//! audio thread and hands buffers over a bounded channel; when the channel
//! is full (nobody reading, e.g. while idle) new buffers are dropped, the
//! same way a DMA ring overruns on the device.  Dropping the source stops
//! the stream.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TrySendError};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use super::resample::{downmix_to_mono, write_pcm16_le, ConvertError, StreamResampler};
use super::source::{AudioSource, SourceError};

/// Callback buffers queued between the audio thread and the reader.
const CALLBACK_QUEUE_DEPTH: usize = 32;

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while opening the microphone.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("input device delivers {0}, only f32 streams are supported")]
    UnsupportedFormat(String),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error(transparent)]
    Convert(#[from] ConvertError),
}

// ---------------------------------------------------------------------------
// PcmConverter
// ---------------------------------------------------------------------------

/// Turns interleaved native-rate `f32` buffers into mono PCM16 LE bytes at
/// the target rate.
pub struct PcmConverter {
    channels: u16,
    resampler: StreamResampler,
    resampled: Vec<f32>,
}

impl PcmConverter {
    pub fn new(native_rate: u32, channels: u16, target_rate: u32) -> Result<Self, ConvertError> {
        Ok(Self {
            channels,
            resampler: StreamResampler::new(native_rate, target_rate)?,
            resampled: Vec::new(),
        })
    }

    /// Convert one callback buffer and append the bytes to `out`.
    pub fn convert(&mut self, interleaved: &[f32], out: &mut Vec<u8>) -> Result<(), ConvertError> {
        let mono = downmix_to_mono(interleaved, self.channels);
        self.resampled.clear();
        self.resampler.push(&mono, &mut self.resampled)?;
        write_pcm16_le(&self.resampled, out);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.resampler.clear();
        self.resampled.clear();
    }
}

// ---------------------------------------------------------------------------
// MicSource
// ---------------------------------------------------------------------------

/// The system default microphone as an [`AudioSource`].
///
/// ```rust,no_run
/// use std::time::Duration;
/// use capture_agent::audio::{AudioSource, MicSource};
///
/// let mut mic = MicSource::open(16_000).unwrap();
/// let mut chunk = [0u8; 1024];
/// let n = mic.read(&mut chunk, Duration::from_millis(100)).unwrap();
/// println!("read {n} bytes");
/// ```
pub struct MicSource {
    _stream: cpal::Stream,
    rx: Receiver<Vec<f32>>,
    converter: PcmConverter,
    /// Converted bytes not yet handed to a reader.
    pending: Vec<u8>,
}

impl MicSource {
    /// Open the default input device and start streaming, converting to
    /// mono PCM16 at `target_rate`.
    pub fn open(target_rate: u32) -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;

        let supported = device.default_input_config()?;
        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(CaptureError::UnsupportedFormat(format!(
                "{:?}",
                supported.sample_format()
            )));
        }

        let channels = supported.channels();
        let native_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();

        let (tx, rx) = mpsc::sync_channel::<Vec<f32>>(CALLBACK_QUEUE_DEPTH);
        let stream = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                match tx.try_send(data.to_vec()) {
                    Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                    Err(TrySendError::Full(_)) => log::trace!("mic: queue full, buffer dropped"),
                }
            },
            |err: cpal::StreamError| {
                log::error!("mic: cpal stream error: {err}");
            },
            None,
        )?;
        stream.play()?;

        log::info!("mic: capturing at {native_rate} Hz × {channels} ch → {target_rate} Hz mono");

        Ok(Self {
            _stream: stream,
            rx,
            converter: PcmConverter::new(native_rate, channels, target_rate)?,
            pending: Vec::new(),
        })
    }
}

impl AudioSource for MicSource {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, SourceError> {
        let deadline = Instant::now() + timeout;

        while self.pending.len() < buf.len() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            match self.rx.recv_timeout(left) {
                Ok(samples) => self
                    .converter
                    .convert(&samples, &mut self.pending)
                    .map_err(|e| SourceError::Driver(e.to_string()))?,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return Err(SourceError::Disconnected),
            }
        }

        // whole samples only
        let n = self.pending.len().min(buf.len()) & !1;
        if n == 0 {
            return Err(SourceError::Timeout(timeout));
        }
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn discard_pending(&mut self) {
        let mut dropped = 0usize;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        self.pending.clear();
        self.converter.clear();
        log::debug!("mic: discarded {dropped} stale buffers");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
