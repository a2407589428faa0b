//! Blocking sample-source seam.
//!
//! [`AudioSource`] is the interface the recorder reads PCM from.  A read is
//! one of the few places the control loop may block, so every call carries
//! an explicit upper bound on how long it may wait.
//!
//! [`ScriptedSource`] (available under `#[cfg(test)]`) replays a fixed list
//! of read results so the recorder can be tested without hardware.

use std::time::Duration;

use thiserror::Error;

// ---------------------------------------------------------------------------
// SourceError
// ---------------------------------------------------------------------------

/// A failed read.  Always recoverable from the recorder's point of view.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    /// Nothing arrived within the bounded wait.
    #[error("audio read timed out after {0:?}")]
    Timeout(Duration),

    /// The driver reported an error.
    #[error("audio driver error: {0}")]
    Driver(String),

    /// The underlying stream is gone.
    #[error("audio stream disconnected")]
    Disconnected,
}

// ---------------------------------------------------------------------------
// AudioSource trait
// ---------------------------------------------------------------------------

/// A blocking byte-stream of 16-bit little-endian mono PCM.
pub trait AudioSource {
    /// Fill `buf` with up to `buf.len()` bytes, waiting at most `timeout`.
    ///
    /// Returns the number of bytes written; always an even number.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, SourceError>;

    /// Drop whatever the driver buffered while nobody was reading.
    fn discard_pending(&mut self);
}

// ---------------------------------------------------------------------------
// ScriptedSource  (test-only)
// ---------------------------------------------------------------------------

/// Replays scripted reads; once the script is exhausted every read times out.
///
/// `discards` counts `discard_pending` calls and stays readable through
/// [`ScriptedSource::discard_counter`] after the source has been boxed.
#[cfg(test)]
pub struct ScriptedSource {
    reads: std::collections::VecDeque<Result<Vec<u8>, SourceError>>,
    discards: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

#[cfg(test)]
impl ScriptedSource {
    pub fn new(reads: Vec<Result<Vec<u8>, SourceError>>) -> Self {
        Self {
            reads: reads.into(),
            discards: Default::default(),
        }
    }

    pub fn discard_counter(&self) -> std::sync::Arc<std::sync::atomic::AtomicUsize> {
        std::sync::Arc::clone(&self.discards)
    }

    /// `count` reads of `len` bytes each, every byte set to `value`.
    pub fn repeating(value: u8, len: usize, count: usize) -> Self {
        Self::new((0..count).map(|_| Ok(vec![value; len])).collect())
    }
}

#[cfg(test)]
impl AudioSource for ScriptedSource {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, SourceError> {
        match self.reads.pop_front() {
            Some(Ok(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => Err(SourceError::Timeout(timeout)),
        }
    }

    fn discard_pending(&mut self) {
        self.discards
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}
