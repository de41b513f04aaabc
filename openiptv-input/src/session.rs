//! Playback session
//!
//! Adapts host callbacks onto the timeshift controller and reports the
//! outcome back through the [`HostNotifier`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use openiptv_core::time::INVALID_POSITION_MS;
use openiptv_core::{Error, Locator};
use openiptv_player::{ControllerState, Surface, TimeshiftController, TrackDescriptor, TrackListener, TrackSelectionMap, TrackType};

use crate::host::{HostNotifier, Notice, TimeShiftStatus, TvInputSession, VideoUnavailableReason};
use crate::service::TuneRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Tuning,
    Playing,
    Paused,
    Rewinding,
    Released,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Forwards controller track reports to the host
struct TrackForwarder {
    notifier: Arc<dyn HostNotifier>,
}

impl TrackListener for TrackForwarder {
    fn on_tracks(&self, tracks: &[TrackDescriptor], selected: &TrackSelectionMap) {
        self.notifier.tracks_changed(tracks);
        for (track_type, track_id) in selected {
            self.notifier.track_selected(*track_type, Some(track_id));
        }
    }
}

pub struct TvSession {
    session_id: u64,
    input_id: String,
    controller: TimeshiftController,
    notifier: Arc<dyn HostNotifier>,
    registry: TuneRegistry,
    state: Mutex<SessionState>,
    tuned: Mutex<Option<Locator>>,
}

impl TvSession {
    #[must_use]
    pub fn new(
        session_id: u64,
        input_id: impl Into<String>,
        controller: TimeshiftController,
        notifier: Arc<dyn HostNotifier>,
        registry: TuneRegistry,
    ) -> Self {
        controller.add_listener(Arc::new(TrackForwarder {
            notifier: Arc::clone(&notifier),
        }));
        Self {
            session_id,
            input_id: input_id.into(),
            controller,
            notifier,
            registry,
            state: Mutex::new(SessionState::Idle),
            tuned: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn session_id(&self) -> u64 {
        self.session_id
    }

    #[must_use]
    pub fn input_id(&self) -> &str {
        &self.input_id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    #[must_use]
    pub fn tuned_channel(&self) -> Option<Locator> {
        self.tuned.lock().clone()
    }

    /// Controller driving this session; the pipeline reports track changes here
    #[must_use]
    pub const fn controller(&self) -> &TimeshiftController {
        &self.controller
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    fn is_released(&self, callback: &'static str) -> bool {
        let released = self.state() == SessionState::Released;
        if released {
            warn!(session_id = self.session_id, callback, "Ignoring callback on released session");
        }
        released
    }

    fn trick_play_failed(&self, operation: &'static str, error: &Error) {
        warn!(session_id = self.session_id, operation, error = %error, "Trick-play failed");
        self.notifier.notice(Notice::TrickPlayFailed {
            operation,
            reason: error.to_string(),
        });
        self.notifier
            .time_shift_status_changed(TimeShiftStatus::Unavailable);
    }

    fn tune_failed(&self, locator: &Locator, error: &Error) {
        warn!(session_id = self.session_id, locator = %locator, error = %error, "Tune failed");
        self.notifier
            .video_unavailable(VideoUnavailableReason::Unknown);
        self.notifier
            .time_shift_status_changed(TimeShiftStatus::Unavailable);
        self.set_state(SessionState::Idle);
    }

    fn start_playback(&self) {
        if let Err(e) = self.controller.start() {
            warn!(session_id = self.session_id, error = %e, "Failed to start playback");
        }
        self.set_state(SessionState::Playing);
    }
}

#[async_trait]
impl TvInputSession for TvSession {
    async fn on_tune(&self, channel: Locator) -> bool {
        if self.is_released("on_tune") {
            return false;
        }
        info!(session_id = self.session_id, channel = %channel, "Tune requested");

        self.registry.release_session(self.session_id);
        if let Err(e) = self.registry.claim(&channel, self.session_id) {
            self.tune_failed(&channel, &e);
            return false;
        }

        self.notifier
            .time_shift_status_changed(TimeShiftStatus::Available);
        self.set_state(SessionState::Tuning);
        if let Err(e) = self.controller.prepare(&channel, false).await {
            self.registry.release_session(self.session_id);
            self.tune_failed(&channel, &e);
            return false;
        }

        self.notifier
            .video_unavailable(VideoUnavailableReason::Tuning);
        self.notifier.content_allowed();
        self.notifier.video_available();
        self.start_playback();

        *self.tuned.lock() = Some(channel);
        true
    }

    async fn on_release(&self) {
        {
            let mut state = self.state.lock();
            if *state == SessionState::Released {
                return;
            }
            *state = SessionState::Released;
        }
        self.controller.stop().await;
        self.registry.release_session(self.session_id);
        self.tuned.lock().take();
        info!(session_id = self.session_id, "Session released");
    }

    fn on_set_surface(&self, surface: Option<Arc<dyn Surface>>) -> bool {
        if self.is_released("on_set_surface") {
            return false;
        }
        match self.controller.set_surface(surface) {
            Ok(()) => true,
            Err(e) => {
                warn!(session_id = self.session_id, error = %e, "Failed to set surface");
                false
            }
        }
    }

    fn on_set_stream_volume(&self, volume: f32) {
        if self.is_released("on_set_stream_volume") {
            return;
        }
        self.controller.change_volume(volume);
    }

    fn on_set_stream_mute(&self) {
        if self.is_released("on_set_stream_mute") {
            return;
        }
        self.controller.change_volume(0.0);
    }

    fn on_set_caption_enabled(&self, enabled: bool) {
        debug!(session_id = self.session_id, enabled, "Captions not supported");
    }

    fn on_time_shift_get_start_position(&self) -> i64 {
        if self.is_released("on_time_shift_get_start_position") {
            return INVALID_POSITION_MS;
        }
        self.controller.timeshift_start_position()
    }

    fn on_time_shift_get_current_position(&self) -> i64 {
        if self.is_released("on_time_shift_get_current_position") {
            return INVALID_POSITION_MS;
        }
        self.controller.timeshift_current_position()
    }

    async fn on_time_shift_set_playback_params(&self, speed: f32) {
        if self.is_released("on_time_shift_set_playback_params") {
            return;
        }
        debug!(session_id = self.session_id, speed, "Playback params requested");

        if let Err(e) = self.controller.set_speed(speed).await {
            self.trick_play_failed("change speed", &e);
            return;
        }
        match self.controller.state() {
            ControllerState::Rewinding => {
                self.set_state(SessionState::Rewinding);
                self.notifier.notice(Notice::RewindEmulated);
            }
            ControllerState::Playing => self.set_state(SessionState::Playing),
            ControllerState::Paused => self.set_state(SessionState::Paused),
            state => debug!(session_id = self.session_id, speed, %state, "Playback params had no effect"),
        }
    }

    async fn on_time_shift_seek_to(&self, time_ms: i64) {
        if self.is_released("on_time_shift_seek_to") {
            return;
        }
        let state = self.state();
        if matches!(state, SessionState::Idle | SessionState::Tuning) {
            debug!(session_id = self.session_id, time_ms, %state, "Ignoring seek before playback");
            return;
        }
        let resume_after = matches!(state, SessionState::Playing | SessionState::Rewinding);
        debug!(session_id = self.session_id, time_ms, resume_after, "Seek requested");

        if let Err(e) = self.controller.seek(time_ms).await {
            self.set_state(SessionState::Paused);
            self.trick_play_failed("seek", &e);
            return;
        }
        self.set_state(SessionState::Paused);

        if resume_after {
            match self.controller.resume().await {
                Ok(()) => self.set_state(SessionState::Playing),
                Err(e) => self.trick_play_failed("resume", &e),
            }
        }
    }

    async fn on_time_shift_pause(&self) {
        if self.is_released("on_time_shift_pause") {
            return;
        }
        self.set_state(SessionState::Paused);
        if let Err(e) = self.controller.pause().await {
            self.trick_play_failed("pause", &e);
        }
    }

    async fn on_time_shift_resume(&self) {
        if self.is_released("on_time_shift_resume") {
            return;
        }
        match self.controller.resume().await {
            Ok(()) => self.set_state(SessionState::Playing),
            Err(e) => self.trick_play_failed("resume", &e),
        }
    }

    async fn on_time_shift_play(&self, recorded: Locator) {
        if self.is_released("on_time_shift_play") {
            return;
        }
        info!(session_id = self.session_id, recording = %recorded, "Playing recording");

        self.registry.release_session(self.session_id);
        self.notifier
            .time_shift_status_changed(TimeShiftStatus::Available);
        self.set_state(SessionState::Tuning);
        if let Err(e) = self.controller.prepare(&recorded, true).await {
            self.tune_failed(&recorded, &e);
            return;
        }

        self.notifier
            .video_unavailable(VideoUnavailableReason::Tuning);
        self.start_playback();
        self.notifier.content_allowed();
        self.notifier.video_available();
        *self.tuned.lock() = Some(recorded);
    }

    fn on_select_track(&self, track_type: TrackType, track_id: &str) -> bool {
        if self.is_released("on_select_track") {
            return false;
        }
        match self.controller.select_track(track_type, track_id) {
            Ok(true) => {
                self.notifier.track_selected(track_type, Some(track_id));
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(session_id = self.session_id, error = %e, "Failed to select track");
                false
            }
        }
    }
}
