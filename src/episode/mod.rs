//! Episode module: drives the agent through benchmark episodes and records
//! what happened.
//!
//! - [`runner`] -- the decision loop and the per-environment run.
//! - [`log`] -- the incrementally rewritten `episode_log.json`.
//! - [`video`] -- per-episode `video.mp4` through ffmpeg.
//! - [`types`] -- step log entries and run summaries.

pub mod log;
pub mod runner;
pub mod types;
pub mod video;

pub use log::EpisodeLog;
pub use runner::{episode_count, EpisodeRunner};
pub use types::{EpisodeSummary, RunSummary, StepLogEntry};
pub use video::VideoRecorder;
