//! OpenIPTV input service
//!
//! Host-facing side of the client: the input service that owns the shared
//! server connection, the playback session that adapts host callbacks onto
//! the timeshift controller, and the recording session that schedules
//! server-side recordings.

pub mod host;
pub mod recording;
pub mod service;
pub mod session;

#[cfg(test)]
mod testing;

pub use host::{HostNotifier, Notice, TimeShiftStatus, TvInputSession, TvRecordingSession, VideoUnavailableReason};
pub use recording::{ProgramInfo, ProgramResolver, RecordingSession};
pub use service::{InputService, TuneRegistry};
pub use session::{SessionState, TvSession};
