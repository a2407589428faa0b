//! Recording state machine.
//!
//! The whole start/stop decision is one pure function, [`transition`], fed
//! once per poll with the polled [`PollOutcome`] and the [`FailureCounter`]:
//!
//! ```text
//! Idle  ──Recording(true)──────────────────────▶ Armed   (Begin)
//! Idle  ──Recording(false) / Inconclusive──────▶ Idle
//! Armed ──Recording(true)──────────────────────▶ Armed
//! Armed ──Inconclusive, count < threshold──────▶ Armed
//! Armed ──Inconclusive, count ≥ threshold──────▶ Idle    (Flush: FailureThreshold)
//! Armed ──Recording(false)─────────────────────▶ Idle    (Flush: RemoteStop)
//! ```
//!
//! A full capture buffer and agent shutdown stop a recording outside the
//! poll tick; see [`StopReason`].

use std::fmt;

// ---------------------------------------------------------------------------
// RecordingState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingState {
    /// Not capturing; waiting for the controller to ask for a recording.
    #[default]
    Idle,

    /// Capturing into the buffer on every loop iteration.
    Armed,
}

impl RecordingState {
    pub fn label(&self) -> &'static str {
        match self {
            RecordingState::Idle => "idle",
            RecordingState::Armed => "armed",
        }
    }
}

// ---------------------------------------------------------------------------
// PollOutcome
// ---------------------------------------------------------------------------

/// Result of one status poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The controller answered with this flag.
    Recording(bool),

    /// No usable answer: transport failure, bad status or unreadable body.
    Inconclusive,
}

impl PollOutcome {
    pub fn is_conclusive(&self) -> bool {
        matches!(self, PollOutcome::Recording(_))
    }
}

// ---------------------------------------------------------------------------
// FailureCounter
// ---------------------------------------------------------------------------

/// Consecutive inconclusive polls, compared against a threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureCounter {
    count: u32,
    threshold: u32,
}

impl FailureCounter {
    /// `threshold` is clamped to at least 1.
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold: threshold.max(1),
        }
    }

    /// Count `outcome`: conclusive polls clear the counter, inconclusive
    /// ones add to it.
    pub fn observe(&mut self, outcome: PollOutcome) {
        if outcome.is_conclusive() {
            self.count = 0;
        } else {
            self.count = self.count.saturating_add(1);
        }
    }

    pub fn reached(&self) -> bool {
        self.count >= self.threshold
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

// ---------------------------------------------------------------------------
// StopReason / Action
// ---------------------------------------------------------------------------

/// Why an armed recording was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The controller said `recording: false`.
    RemoteStop,

    /// Too many inconclusive polls in a row.
    FailureThreshold,

    /// The capture buffer reached capacity.
    BufferFull,

    /// The agent itself is stopping.
    Shutdown,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::RemoteStop => "remote stop",
            StopReason::FailureThreshold => "status failure threshold",
            StopReason::BufferFull => "buffer full",
            StopReason::Shutdown => "shutdown",
        })
    }
}

/// What the recorder must do after a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing changes.
    None,

    /// Start a new recording: reset buffer and summary, drop stale samples.
    Begin,

    /// Keep capturing.
    Continue,

    /// Upload what was captured, then reset.
    Flush(StopReason),
}

// ---------------------------------------------------------------------------
// transition
// ---------------------------------------------------------------------------

/// Apply one poll outcome.  Updates `counter` and returns the next state and
/// the action that gets there.
pub fn transition(
    state: RecordingState,
    outcome: PollOutcome,
    counter: &mut FailureCounter,
) -> (RecordingState, Action) {
    counter.observe(outcome);

    match (state, outcome) {
        (RecordingState::Idle, PollOutcome::Recording(true)) => {
            (RecordingState::Armed, Action::Begin)
        }
        (RecordingState::Idle, _) => (RecordingState::Idle, Action::None),

        (RecordingState::Armed, PollOutcome::Recording(true)) => {
            (RecordingState::Armed, Action::Continue)
        }
        (RecordingState::Armed, PollOutcome::Recording(false)) => {
            (RecordingState::Idle, Action::Flush(StopReason::RemoteStop))
        }
        (RecordingState::Armed, PollOutcome::Inconclusive) if counter.reached() => {
            (RecordingState::Idle, Action::Flush(StopReason::FailureThreshold))
        }
        (RecordingState::Armed, PollOutcome::Inconclusive) => {
            (RecordingState::Armed, Action::Continue)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
