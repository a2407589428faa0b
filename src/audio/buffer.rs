//! Fixed-capacity capture arena for raw PCM bytes.
//!
//! The arena is allocated once at startup and reused for every recording.
//! Unlike a ring buffer it never overwrites: when a write does not fit, the
//! part that fits is kept and the rest is dropped, so the head of a
//! recording is always intact and the fill length can never pass capacity.
//!
//! # Example
//!
//! ```rust
//! use capture_agent::audio::{CaptureBuffer, WriteOutcome};
//!
//! let mut buf = CaptureBuffer::new(4);
//! assert_eq!(buf.write(&[1, 2, 3]), WriteOutcome::Stored(3));
//! assert_eq!(buf.write(&[4, 5]), WriteOutcome::Truncated { stored: 1, dropped: 1 });
//! assert_eq!(buf.as_slice(), &[1, 2, 3, 4]);
//! ```

// ---------------------------------------------------------------------------
// WriteOutcome
// ---------------------------------------------------------------------------

/// What happened to the bytes handed to [`CaptureBuffer::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Every byte was stored.
    Stored(usize),
    /// Only `stored` bytes fit; `dropped` bytes were discarded.
    Truncated { stored: usize, dropped: usize },
}

impl WriteOutcome {
    pub fn stored(&self) -> usize {
        match *self {
            WriteOutcome::Stored(n) => n,
            WriteOutcome::Truncated { stored, .. } => stored,
        }
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self, WriteOutcome::Truncated { .. })
    }
}

// ---------------------------------------------------------------------------
// CaptureBuffer
// ---------------------------------------------------------------------------

/// A byte arena of fixed capacity plus a fill length.
///
/// ## Overflow behaviour
///
/// [`write`](Self::write) copies as much as fits and reports the rest as
/// dropped.  The arena is never grown or reallocated after [`new`](Self::new).
pub struct CaptureBuffer {
    arena: Box<[u8]>,
    /// Number of valid bytes at the start of `arena` (≤ `arena.len()`).
    len: usize,
}

impl CaptureBuffer {
    /// Allocate an arena of `capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "CaptureBuffer capacity must be > 0");
        Self {
            arena: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    /// Append `data`, truncating at capacity.
    pub fn write(&mut self, data: &[u8]) -> WriteOutcome {
        let room = self.remaining();
        let take = data.len().min(room);
        self.arena[self.len..self.len + take].copy_from_slice(&data[..take]);
        self.len += take;

        if take == data.len() {
            WriteOutcome::Stored(take)
        } else {
            WriteOutcome::Truncated {
                stored: take,
                dropped: data.len() - take,
            }
        }
    }

    /// The recorded bytes, oldest first.
    pub fn as_slice(&self) -> &[u8] {
        &self.arena[..self.len]
    }

    /// Forget the recorded bytes.  The arena itself is kept.
    pub fn reset(&mut self) {
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.arena.len()
    }

    pub fn remaining(&self) -> usize {
        self.arena.len() - self.len
    }

    /// `true` once no further byte can be stored.
    pub fn is_full(&self) -> bool {
        self.len == self.arena.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
