//! Host-framework seams: the callbacks the host drives sessions with and the
//! notifications sessions send back.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use openiptv_core::Locator;
use openiptv_player::{Surface, TrackDescriptor, TrackType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeShiftStatus {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoUnavailableReason {
    Unknown,
    Tuning,
    WeakSignal,
    Buffering,
}

/// Transient, user-visible message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Rewind is simulated with discrete seeks
    RewindEmulated,
    /// A trick-play request could not be delivered; playback continues
    TrickPlayFailed { operation: &'static str, reason: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RewindEmulated => write!(f, "Fast rewind not supported, emulating"),
            Self::TrickPlayFailed { operation, reason } => {
                write!(f, "Unable to {operation}: {reason}")
            }
        }
    }
}

/// Notifications delivered to the host
pub trait HostNotifier: Send + Sync {
    fn time_shift_status_changed(&self, status: TimeShiftStatus);

    fn video_unavailable(&self, reason: VideoUnavailableReason);

    fn video_available(&self);

    fn content_allowed(&self);

    fn tracks_changed(&self, tracks: &[TrackDescriptor]);

    fn track_selected(&self, track_type: TrackType, track_id: Option<&str>);

    fn notice(&self, notice: Notice);

    fn tuned(&self, channel: &Locator);

    fn recording_stopped(&self, program: Option<&Locator>);

    fn recording_error(&self, reason: &str);
}

/// Callbacks the host issues on a playback session, serialized by the host
#[async_trait]
pub trait TvInputSession: Send + Sync {
    async fn on_tune(&self, channel: Locator) -> bool;

    async fn on_release(&self);

    fn on_set_surface(&self, surface: Option<Arc<dyn Surface>>) -> bool;

    fn on_set_stream_volume(&self, volume: f32);

    fn on_set_stream_mute(&self);

    fn on_set_caption_enabled(&self, enabled: bool);

    fn on_time_shift_get_start_position(&self) -> i64;

    fn on_time_shift_get_current_position(&self) -> i64;

    async fn on_time_shift_set_playback_params(&self, speed: f32);

    async fn on_time_shift_seek_to(&self, time_ms: i64);

    async fn on_time_shift_pause(&self);

    async fn on_time_shift_resume(&self);

    async fn on_time_shift_play(&self, recorded: Locator);

    fn on_select_track(&self, track_type: TrackType, track_id: &str) -> bool;
}

/// Callbacks the host issues on a recording session
#[async_trait]
pub trait TvRecordingSession: Send + Sync {
    async fn on_tune(&self, channel: Locator);

    async fn on_start_recording(&self, program: Option<Locator>);

    async fn on_stop_recording(&self);

    async fn on_release(&self);
}
