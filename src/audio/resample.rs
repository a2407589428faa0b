//! Conversion from the host device's native stream to upload PCM.
//!
//! The upload format is **mono, 16-bit little-endian** at the configured
//! sample rate.  A host microphone delivers interleaved `f32` at whatever
//! rate it prefers, so three steps run on every callback buffer:
//!
//! 1. [`downmix_to_mono`] — average interleaved channels.
//! 2. [`StreamResampler::push`] — FFT resampling with `rubato`, carrying the
//!    remainder that did not fill a resampler chunk over to the next call.
//! 3. [`write_pcm16_le`] — clamp, scale and serialise.

use rubato::{FftFixedIn, Resampler};
use thiserror::Error;

/// Input frames handed to the FFT resampler per call.
const RESAMPLER_CHUNK: usize = 1_024;

// ---------------------------------------------------------------------------
// ConvertError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("cannot build resampler: {0}")]
    Construction(#[from] rubato::ResamplerConstructionError),

    #[error("resampling failed: {0}")]
    Process(#[from] rubato::ResampleError),
}

// ---------------------------------------------------------------------------
// downmix_to_mono
// ---------------------------------------------------------------------------

/// Average interleaved frames down to one channel.
///
/// `channels == 0` yields nothing; an incomplete trailing frame is dropped.
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// write_pcm16_le
// ---------------------------------------------------------------------------

/// Append `samples` (nominally `[-1.0, 1.0]`) to `out` as PCM16 LE.
pub fn write_pcm16_le(samples: &[f32], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for &s in samples {
        let value = (s.clamp(-1.0, 1.0) * 32_767.0).round() as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
}

// ---------------------------------------------------------------------------
// StreamResampler
// ---------------------------------------------------------------------------

/// Mono resampler for an unbounded stream of arbitrarily sized buffers.
///
/// When source and target rates match no resampler is built and samples
/// pass straight through.
pub struct StreamResampler {
    inner: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Result<Self, ConvertError> {
        let inner = if source_rate == target_rate {
            None
        } else {
            Some(FftFixedIn::<f32>::new(
                source_rate as usize,
                target_rate as usize,
                RESAMPLER_CHUNK,
                1,
                1,
            )?)
        };
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    /// Feed mono samples; append every completed output frame to `out`.
    pub fn push(&mut self, mono: &[f32], out: &mut Vec<f32>) -> Result<(), ConvertError> {
        let Some(resampler) = self.inner.as_mut() else {
            out.extend_from_slice(mono);
            return Ok(());
        };

        self.pending.extend_from_slice(mono);
        loop {
            let need = resampler.input_frames_next();
            if self.pending.len() < need {
                break;
            }
            let frames = resampler.process(&[&self.pending[..need]], None)?;
            if let Some(channel) = frames.first() {
                out.extend_from_slice(channel);
            }
            self.pending.drain(..need);
        }
        Ok(())
    }

    /// Forget buffered input, e.g. after stale samples were discarded.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
