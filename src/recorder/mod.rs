//! Recording control: the state machine, the owned recorder context and the
//! loop that drives both.
//!
//! # Architecture
//!
//! ```text
//! Agent::run()  ← single cooperative loop on a current-thread runtime
//!        │
//!        ├─ WifiLink down → net::connect (per-profile timeout)
//!        │
//!        ├─ every poll_interval
//!        │     StatusPoller::poll → transition() → Begin / Flush(reason)
//!        │
//!        └─ while Armed
//!              AudioSource::read → QualityAnalyzer → CaptureBuffer
//!              buffer full → Flush(BufferFull) → Uploader::upload
//! ```

pub mod machine;
pub mod runner;
pub mod state;

pub use machine::{CaptureStep, FlushReport, Recorder};
pub use runner::{Agent, Tick};
pub use state::{transition, Action, FailureCounter, PollOutcome, RecordingState, StopReason};
