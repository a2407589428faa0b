//! Capture agent: records microphone audio when a remote controller asks
//! for it and uploads each finished recording over HTTP.
//!
//! | Module | Role |
//! |---|---|
//! | [`config`] | `settings.toml`, platform paths, validation |
//! | [`audio`] | sample source, quality analysis, capture arena |
//! | [`net`] | stored network profiles, link, device identity |
//! | [`remote`] | status polling and upload clients |
//! | [`recorder`] | state machine, recorder context, control loop |

pub mod audio;
pub mod config;
pub mod net;
pub mod recorder;
pub mod remote;
