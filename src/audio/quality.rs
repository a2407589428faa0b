//! Per-chunk audio level instrumentation.
//!
//! [`QualityAnalyzer`] looks at one chunk of 16-bit little-endian PCM and
//! reports its level, whether it clipped and whether it was silent.  The
//! resulting [`ChunkStats`] are folded into a [`QualitySummary`] that travels
//! with the upload as metadata.
//!
//! | Check | Rule |
//! |-------|------|
//! | Level | `20·log10(rms / 32768)`; all-zero chunk → floor (−100 dB) |
//! | Clipping | more than `clip_ratio` of samples at ≥ `clip_level` of full scale |
//! | Silence | level below `silence_threshold_db` |
//!
//! A chunk whose level cannot be computed (no samples, or a non-finite
//! result) is [`Level::Invalid`] and never reaches the running statistics.
//!
//! # Example
//!
//! ```rust
//! use capture_agent::audio::{Level, QualityAnalyzer, QualitySummary};
//!
//! let analyzer = QualityAnalyzer::default();
//! let mut summary = QualitySummary::default();
//!
//! let silence = vec![0u8; 1024];
//! let stats = analyzer.analyze(&silence);
//! assert_eq!(stats.level, Level::Db(-100.0));
//! assert!(stats.silent);
//!
//! summary.fold(&stats);
//! assert_eq!(summary.silence_chunks, 1);
//! ```

use crate::config::QualityConfig;

/// Full-scale magnitude of a signed 16-bit sample.
const FULL_SCALE: f64 = 32_768.0;

// ---------------------------------------------------------------------------
// Level
// ---------------------------------------------------------------------------

/// Loudness of one chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Level {
    /// Finite level in dB relative to full scale.
    Db(f32),
    /// The level could not be computed for this chunk.
    Invalid,
}

impl Level {
    /// Wrap a computed value, mapping NaN and ±∞ to [`Level::Invalid`].
    pub fn from_db(db: f32) -> Self {
        if db.is_finite() {
            Level::Db(db)
        } else {
            Level::Invalid
        }
    }

    pub fn db(&self) -> Option<f32> {
        match *self {
            Level::Db(db) if db.is_finite() => Some(db),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ChunkStats
// ---------------------------------------------------------------------------

/// Result of analysing one chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkStats {
    pub level: Level,
    pub samples: usize,
    /// Samples at or beyond the clip level.
    pub clipped_samples: usize,
    /// More than the allowed fraction of samples clipped.
    pub clipping: bool,
    /// Level below the silence threshold.  Never set for an invalid level.
    pub silent: bool,
}

// ---------------------------------------------------------------------------
// QualityAnalyzer
// ---------------------------------------------------------------------------

/// Computes [`ChunkStats`] from raw PCM16 LE bytes.
///
/// Stateless: every threshold comes from [`QualityConfig`].
#[derive(Debug, Clone)]
pub struct QualityAnalyzer {
    silence_threshold_db: f32,
    clip_threshold: i32,
    clip_ratio: f32,
    floor_db: f32,
}

impl Default for QualityAnalyzer {
    fn default() -> Self {
        Self::new(&QualityConfig::default())
    }
}

impl QualityAnalyzer {
    pub fn new(config: &QualityConfig) -> Self {
        let clip_level = config.clip_level.clamp(0.0, 1.0) as f64;
        Self {
            silence_threshold_db: config.silence_threshold_db,
            clip_threshold: (clip_level * FULL_SCALE).ceil() as i32,
            clip_ratio: config.clip_ratio,
            floor_db: config.floor_db,
        }
    }

    /// Analyse one chunk.  A trailing odd byte is ignored.
    pub fn analyze(&self, pcm: &[u8]) -> ChunkStats {
        let mut sum_squares = 0.0_f64;
        let mut clipped = 0usize;
        let mut samples = 0usize;

        for pair in pcm.chunks_exact(2) {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            let value = f64::from(sample);
            sum_squares += value * value;
            if i32::from(sample).abs() >= self.clip_threshold {
                clipped += 1;
            }
            samples += 1;
        }

        let level = self.level_of(sum_squares, samples);
        let clipping = samples > 0 && clipped as f32 / samples as f32 > self.clip_ratio;
        let silent = matches!(level, Level::Db(db) if db < self.silence_threshold_db);

        ChunkStats {
            level,
            samples,
            clipped_samples: clipped,
            clipping,
            silent,
        }
    }

    fn level_of(&self, sum_squares: f64, samples: usize) -> Level {
        if samples == 0 {
            return Level::Invalid;
        }
        let rms = (sum_squares / samples as f64).sqrt();
        if rms == 0.0 {
            return Level::Db(self.floor_db);
        }
        Level::from_db((20.0 * (rms / FULL_SCALE).log10()) as f32)
    }
}

// ---------------------------------------------------------------------------
// QualitySummary
// ---------------------------------------------------------------------------

/// Running statistics for one recording.
///
/// Reset at recording start, folded once per chunk, read once at upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualitySummary {
    /// Incremental mean of all valid chunk levels.  `None` before the first.
    pub avg_db: Option<f32>,
    pub max_db: Option<f32>,
    pub min_db: Option<f32>,
    pub clip_events: u32,
    pub silence_chunks: u32,
    pub source_errors: u32,
    pub total_chunks: u32,
    /// Chunks whose level contributed to `avg_db`.
    pub valid_chunks: u32,
}

impl QualitySummary {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Fold one chunk into the running statistics.
    pub fn fold(&mut self, stats: &ChunkStats) {
        self.total_chunks += 1;
        if stats.clipping {
            self.clip_events += 1;
        }
        if stats.silent {
            self.silence_chunks += 1;
        }

        let Some(db) = stats.level.db() else {
            log::trace!("quality: skipping chunk with invalid level");
            return;
        };

        self.valid_chunks += 1;
        let n = self.valid_chunks as f32;
        let avg = match self.avg_db {
            Some(avg) => avg + (db - avg) / n,
            None => db,
        };
        // Keep the previous mean if the update itself went non-finite.
        if avg.is_finite() {
            self.avg_db = Some(avg);
        }
        self.max_db = Some(self.max_db.map_or(db, |m| m.max(db)));
        self.min_db = Some(self.min_db.map_or(db, |m| m.min(db)));
    }

    /// Count a failed source read.
    pub fn record_source_error(&mut self) {
        self.source_errors += 1;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn stats_at(db: f32) -> ChunkStats {
        ChunkStats {
            level: Level::from_db(db),
            samples: 512,
            clipped_samples: 0,
            clipping: false,
            silent: false,
        }
    }

    // ---- Level ---------------------------------------------------------------

    #[test]
    fn zero_chunk_reports_floor() {
        let stats = QualityAnalyzer::default().analyze(&pcm(&[0; 256]));
        assert_eq!(stats.level, Level::Db(-100.0));
        assert!(stats.silent);
        assert!(!stats.clipping);
    }

    #[test]
    fn empty_chunk_is_invalid_and_not_silent() {
        let stats = QualityAnalyzer::default().analyze(&[]);
        assert_eq!(stats.level, Level::Invalid);
        assert!(!stats.silent);
        assert_eq!(stats.samples, 0);
    }

    #[test]
    fn half_scale_square_wave_is_about_minus_six_db() {
        let samples: Vec<i16> = (0..512)
            .map(|i| if i % 2 == 0 { 16_384 } else { -16_384 })
            .collect();
        let stats = QualityAnalyzer::default().analyze(&pcm(&samples));
        let db = stats.level.db().unwrap();
        assert!((db - (-6.0206)).abs() < 0.01, "db = {db}");
        assert!(!stats.silent);
    }

    #[test]
    fn quiet_chunk_is_silent() {
        // rms 100 → about -50 dB
        let stats = QualityAnalyzer::default().analyze(&pcm(&[100; 512]));
        assert!(stats.silent);
    }

    #[test]
    fn non_finite_values_become_invalid() {
        assert_eq!(Level::from_db(f32::NAN), Level::Invalid);
        assert_eq!(Level::from_db(f32::NEG_INFINITY), Level::Invalid);
        assert_eq!(Level::from_db(-3.0), Level::Db(-3.0));
    }

    #[test]
    fn odd_trailing_byte_ignored() {
        let mut bytes = pcm(&[1_000; 4]);
        bytes.push(0xFF);
        assert_eq!(QualityAnalyzer::default().analyze(&bytes).samples, 4);
    }

    // ---- Clipping ------------------------------------------------------------

    #[test]
    fn two_percent_full_scale_samples_clip() {
        let mut samples = vec![1_000i16; 1_000];
        for s in samples.iter_mut().take(20) {
            *s = i16::MIN;
        }
        let stats = QualityAnalyzer::default().analyze(&pcm(&samples));
        assert_eq!(stats.clipped_samples, 20);
        assert!(stats.clipping);
    }

    #[test]
    fn exactly_one_percent_does_not_clip() {
        let mut samples = vec![1_000i16; 1_000];
        for s in samples.iter_mut().take(10) {
            *s = 32_000;
        }
        let stats = QualityAnalyzer::default().analyze(&pcm(&samples));
        assert_eq!(stats.clipped_samples, 10);
        assert!(!stats.clipping);
    }

    #[test]
    fn clip_level_threshold_is_inclusive() {
        let analyzer = QualityAnalyzer::default();
        // 0.91 × 32768 = 29818.88, so 29819 is the first sample at or above it
        let at = analyzer.analyze(&pcm(&[29_819; 10]));
        let negative = analyzer.analyze(&pcm(&[-29_819; 10]));
        let below = analyzer.analyze(&pcm(&[29_818; 10]));
        assert_eq!(at.clipped_samples, 10);
        assert_eq!(negative.clipped_samples, 10);
        assert_eq!(below.clipped_samples, 0);
    }

    // ---- Summary -------------------------------------------------------------

    #[test]
    fn running_average_is_arithmetic_mean() {
        let mut summary = QualitySummary::default();
        for db in [-20.0, -10.0, -30.0] {
            summary.fold(&stats_at(db));
        }
        assert!((summary.avg_db.unwrap() - (-20.0)).abs() < 1e-5);
        assert_eq!(summary.max_db, Some(-10.0));
        assert_eq!(summary.min_db, Some(-30.0));
        assert_eq!(summary.total_chunks, 3);
        assert_eq!(summary.valid_chunks, 3);
    }

    #[test]
    fn invalid_chunk_leaves_running_statistics_untouched() {
        let mut summary = QualitySummary::default();
        summary.fold(&stats_at(-20.0));
        summary.fold(&stats_at(-10.0));
        let before = summary.clone();

        let mut poisoned = stats_at(0.0);
        poisoned.level = Level::Db(f32::NAN);
        summary.fold(&poisoned);
        summary.fold(&stats_at(f32::NEG_INFINITY));

        assert_eq!(summary.avg_db, before.avg_db);
        assert_eq!(summary.max_db, before.max_db);
        assert_eq!(summary.min_db, before.min_db);
        assert_eq!(summary.valid_chunks, 2);
        assert_eq!(summary.total_chunks, 4);
    }

    #[test]
    fn counters_follow_chunk_flags() {
        let analyzer = QualityAnalyzer::default();
        let mut summary = QualitySummary::default();

        summary.fold(&analyzer.analyze(&pcm(&[0; 64])));
        summary.fold(&analyzer.analyze(&pcm(&[i16::MAX; 64])));
        summary.record_source_error();

        assert_eq!(summary.silence_chunks, 1);
        assert_eq!(summary.clip_events, 1);
        assert_eq!(summary.source_errors, 1);
        assert_eq!(summary.total_chunks, 2);
    }

    #[test]
    fn reset_clears_everything() {
        let mut summary = QualitySummary::default();
        summary.fold(&stats_at(-12.0));
        summary.record_source_error();
        summary.reset();
        assert_eq!(summary, QualitySummary::default());
    }

    #[test]
    fn custom_silence_threshold() {
        let analyzer = QualityAnalyzer::new(&QualityConfig {
            silence_threshold_db: -60.0,
            ..QualityConfig::default()
        });
        // about -50 dB: silent at -40, audible at -60
        assert!(!analyzer.analyze(&pcm(&[100; 512])).silent);
    }
}
