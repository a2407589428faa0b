//! Audio side of the agent — source → analysis → arena.
//!
//! # Pipeline
//!
//! ```text
//! AudioSource::read (bounded wait) → PCM16 chunk
//!     ├─▶ QualityAnalyzer::analyze → QualitySummary::fold
//!     └─▶ CaptureBuffer::write (truncates at capacity)
//! ```
//!
//! On the host the source is [`MicSource`], which converts the default
//! microphone's native stream with [`PcmConverter`].

pub mod buffer;
pub mod capture;
pub mod quality;
pub mod resample;
pub mod source;

pub use buffer::{CaptureBuffer, WriteOutcome};
pub use capture::{CaptureError, MicSource, PcmConverter};
pub use quality::{ChunkStats, Level, QualityAnalyzer, QualitySummary};
pub use resample::{downmix_to_mono, write_pcm16_le, ConvertError, StreamResampler};
pub use source::{AudioSource, SourceError};

#[cfg(test)]
pub use source::ScriptedSource;
