//! Timeshift controller
//!
//! Orchestrates the subscription data source, the rewinder and the playback
//! pipeline for one session. Host positions are milliseconds; everything
//! below this layer is microseconds.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use openiptv_core::config::{RecordingConfig, TimeshiftConfig};
use openiptv_core::protocol::MessageDispatcher;
use openiptv_core::time::{ms_to_us, now_ms, us_to_ms, INVALID_POSITION_MS};
use openiptv_core::{Error, Locator, Result};

use crate::data_source::{SeekOutcome, SubscriptionDataSource, SubscriptionDataSourceFactory};
use crate::pipeline::{MediaSource, PlaybackPipeline, Surface};
use crate::rewinder::{RewindRequest, Rewinder};
use crate::speed::{self, EMULATED_REWIND_SPEED};
use crate::tracks::{compute_tracks, MappedTrackInfo, TrackDescriptor, TrackSelection, TrackSelectionMap, TrackType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Prepared,
    Playing,
    Paused,
    Seeking,
    Rewinding,
    Released,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Receives the handled tracks every time the pipeline reports a change
pub trait TrackListener: Send + Sync {
    fn on_tracks(&self, tracks: &[TrackDescriptor], selected: &TrackSelectionMap);
}

pub struct TimeshiftController {
    pipeline: Arc<dyn PlaybackPipeline>,
    factory: SubscriptionDataSourceFactory,
    rewinder: Rewinder,
    timeshift: TimeshiftConfig,
    recording: RecordingConfig,
    state: Mutex<ControllerState>,
    is_recording: AtomicBool,
    surface: Mutex<Option<Arc<dyn Surface>>>,
    volume: Mutex<f32>,
    listeners: Mutex<Vec<Arc<dyn TrackListener>>>,
}

impl TimeshiftController {
    #[must_use]
    pub fn new(
        pipeline: Arc<dyn PlaybackPipeline>,
        dispatcher: Arc<dyn MessageDispatcher>,
        timeshift: TimeshiftConfig,
        recording: RecordingConfig,
    ) -> Self {
        Self {
            rewinder: Rewinder::new(Arc::clone(&pipeline), timeshift.rewind_tick()),
            factory: SubscriptionDataSourceFactory::new(dispatcher, timeshift.clone()),
            pipeline,
            timeshift,
            recording,
            state: Mutex::new(ControllerState::Idle),
            is_recording: AtomicBool::new(false),
            surface: Mutex::new(None),
            volume: Mutex::new(1.0),
            listeners: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn state(&self) -> ControllerState {
        *self.state.lock()
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.is_recording.load(Ordering::SeqCst)
    }

    /// The open subscription, if any
    #[must_use]
    pub fn current_data_source(&self) -> Option<Arc<SubscriptionDataSource>> {
        self.factory.current_data_source()
    }

    fn set_state(&self, state: ControllerState) {
        *self.state.lock() = state;
    }

    /// Paused, unless nothing was ever prepared
    fn hold_paused(&self) {
        let mut state = self.state.lock();
        if !matches!(*state, ControllerState::Idle | ControllerState::Released) {
            *state = ControllerState::Paused;
        }
    }

    fn ensure_active(&self, operation: &'static str) -> Result<()> {
        if self.state() == ControllerState::Released {
            debug!(operation, "Controller already released");
            return Err(Error::Released);
        }
        Ok(())
    }

    /// Hand `locator` to the pipeline. Live channels go through a
    /// subscription, recordings are fetched over HTTP.
    pub async fn prepare(&self, locator: &Locator, is_recording: bool) -> Result<()> {
        self.ensure_active("prepare")?;
        self.rewinder.stop();
        self.close_data_source().await;
        self.is_recording.store(is_recording, Ordering::SeqCst);

        let source = if is_recording {
            self.recorded_source(locator)?
        } else {
            let data_source = self.factory.create(locator.clone());
            if let Err(e) = data_source.open().await {
                self.factory.take_current();
                return Err(e);
            }
            MediaSource::Subscription(data_source)
        };

        if let Err(e) = self.pipeline.prepare(source) {
            warn!(locator = %locator, error = %e, "Pipeline rejected source");
            self.close_data_source().await;
            return Err(e);
        }

        self.set_state(ControllerState::Prepared);
        info!(locator = %locator, is_recording, "Prepared playback");
        Ok(())
    }

    fn recorded_source(&self, locator: &Locator) -> Result<MediaSource> {
        let url = format!("{}{}", self.recording.base_url, locator.id()?);
        let credential = STANDARD.encode(format!(
            "{}:{}",
            self.recording.username, self.recording.password
        ));

        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), format!("Basic {credential}"));
        headers.insert("User-Agent".to_string(), self.recording.user_agent.clone());
        Ok(MediaSource::Progressive { url, headers })
    }

    pub fn start(&self) -> Result<()> {
        self.ensure_active("start")?;
        if self.state() == ControllerState::Idle {
            return Err(Error::InvalidState {
                operation: "start",
                state: ControllerState::Idle.to_string(),
            });
        }
        self.pipeline.set_play_when_ready(true);
        self.set_state(ControllerState::Playing);
        Ok(())
    }

    /// Safe in any state
    pub async fn pause(&self) -> Result<()> {
        if self.state() == ControllerState::Released {
            return Ok(());
        }
        self.pipeline.set_play_when_ready(false);
        self.rewinder.stop();
        self.hold_paused();

        match self.factory.current_data_source() {
            Some(data_source) => data_source.pause().await,
            None => Ok(()),
        }
    }

    pub async fn resume(&self) -> Result<()> {
        self.ensure_active("resume")?;
        self.rewinder.stop();
        self.pipeline.set_playback_rate(1.0);

        if let Some(data_source) = self.factory.current_data_source() {
            data_source.resume().await?;
        } else if !self.is_recording() {
            warn!("Unable to resume subscription, no data source available");
        }

        self.pipeline.set_play_when_ready(true);
        self.set_state(ControllerState::Playing);
        Ok(())
    }

    /// Apply a host trick-play multiplier. `0` pauses; anything below `1`
    /// is emulated by the rewinder.
    pub async fn set_speed(&self, multiplier: f32) -> Result<()> {
        self.ensure_active("set_speed")?;
        if speed::is_paused(multiplier) {
            return self.pause().await;
        }

        // anchor before stopping so a running rewind continues from where it is
        let anchor_ms = self.timeshift_current_position();
        self.pipeline.set_play_when_ready(false);
        self.rewinder.stop();

        let data_source = self.factory.current_data_source();
        if data_source.is_none() && !self.is_recording() {
            warn!(multiplier, "Unable to change speed, no data source available");
            self.hold_paused();
            return Ok(());
        }

        if speed::is_rewind(multiplier) {
            let request = match &data_source {
                Some(data_source) => {
                    let status = data_source.status();
                    let Some(origin_us) = status.timeshift_start else {
                        warn!(multiplier, "Unable to rewind, timeshift buffer start not reported yet");
                        self.hold_paused();
                        return data_source.pause().await;
                    };
                    data_source.set_speed(EMULATED_REWIND_SPEED).await?;
                    let min_target_us = status.start_pts.unwrap_or(0).max(0);
                    RewindRequest {
                        multiplier,
                        anchor_ms,
                        floor_ms: us_to_ms(origin_us.saturating_add(min_target_us)),
                        origin_us,
                        min_target_us,
                    }
                }
                None => RewindRequest {
                    multiplier,
                    anchor_ms,
                    floor_ms: 0,
                    origin_us: 0,
                    min_target_us: 0,
                },
            };
            self.rewinder.start(request);
            self.set_state(ControllerState::Rewinding);
            info!(multiplier, anchor_ms, "Emulating rewind");
            return Ok(());
        }

        if let Some(data_source) = &data_source {
            data_source.set_speed(speed::host_to_protocol(multiplier)).await?;
        }
        self.pipeline.set_playback_rate(multiplier);
        self.pipeline.set_play_when_ready(true);
        self.set_state(ControllerState::Playing);
        Ok(())
    }

    /// Earliest seekable position in ms, `-1` when unknown
    #[must_use]
    pub fn timeshift_start_position(&self) -> i64 {
        if self.is_recording() {
            return 0;
        }
        let Some(data_source) = self.factory.current_data_source() else {
            warn!("Unable to get timeshift start position, no data source available");
            return INVALID_POSITION_MS;
        };
        data_source
            .timeshift_start_time()
            .map_or(INVALID_POSITION_MS, us_to_ms)
    }

    /// Current position in ms, `-1` when unknown
    #[must_use]
    pub fn timeshift_current_position(&self) -> i64 {
        if let Some(position) = self.rewinder.current_position() {
            return position;
        }
        if self.is_recording() {
            return us_to_ms(self.pipeline.current_position_us());
        }
        let Some(data_source) = self.factory.current_data_source() else {
            warn!("Unable to get timeshift current position, no data source available");
            return INVALID_POSITION_MS;
        };
        let offset_ms = us_to_ms(data_source.timeshift_offset_pts());
        (now_ms() + offset_ms).max(self.timeshift_start_position())
    }

    /// Seek to `time_ms`. Playback is left paused.
    pub async fn seek(&self, time_ms: i64) -> Result<()> {
        self.ensure_active("seek")?;
        if self.state() == ControllerState::Idle {
            return Err(Error::InvalidState {
                operation: "seek",
                state: ControllerState::Idle.to_string(),
            });
        }
        self.pause().await?;
        self.set_state(ControllerState::Seeking);
        let result = self.seek_paused(time_ms).await;
        self.set_state(ControllerState::Paused);
        result
    }

    async fn seek_paused(&self, time_ms: i64) -> Result<()> {
        if self.is_recording() {
            self.pipeline.seek_to(ms_to_us(time_ms).max(0));
            return Ok(());
        }
        let Some(data_source) = self.factory.current_data_source() else {
            warn!(time_ms, "Unable to seek, no data source available");
            return Ok(());
        };

        let status = data_source.status();
        let target = ms_to_us(time_ms)
            .saturating_sub(status.timeshift_start.unwrap_or(0))
            .max(status.start_pts.unwrap_or(0));
        debug!(time_ms, target, "Seeking subscription");

        let ack = data_source.seek(target).await?;
        match ack.wait(self.timeshift.seek_ack_timeout()).await {
            SeekOutcome::Confirmed(landed) => debug!(target, landed = ?landed, "Seek confirmed"),
            SeekOutcome::TimedOut => warn!(
                target,
                timeout_ms = self.timeshift.seek_ack_timeout_ms,
                "Seek not confirmed in time, continuing"
            ),
            SeekOutcome::Abandoned => warn!(target, "Seek superseded before confirmation"),
            SeekOutcome::NotIssued => {}
        }

        self.pipeline.seek_to(target);
        Ok(())
    }

    /// Attach a surface; the one it replaces goes back to the host
    pub fn set_surface(&self, surface: Option<Arc<dyn Surface>>) -> Result<()> {
        self.ensure_active("set_surface")?;
        self.pipeline.set_surface(surface.clone());

        let previous = std::mem::replace(&mut *self.surface.lock(), surface.clone());
        if let Some(previous) = previous {
            let same = surface.as_ref().is_some_and(|s| Arc::ptr_eq(s, &previous));
            if !same {
                if let Err(e) = previous.release() {
                    warn!(error = %e, "Failed to release replaced surface");
                }
            }
        }
        Ok(())
    }

    pub fn change_volume(&self, volume: f32) {
        *self.volume.lock() = volume;
        self.pipeline.set_volume(volume);
    }

    #[must_use]
    pub fn current_volume(&self) -> f32 {
        *self.volume.lock()
    }

    pub fn select_track(&self, track_type: TrackType, track_id: &str) -> Result<bool> {
        self.ensure_active("select_track")?;
        Ok(self.pipeline.select_track(track_type, track_id))
    }

    pub fn add_listener(&self, listener: Arc<dyn TrackListener>) {
        self.listeners.lock().push(listener);
    }

    /// Called by the pipeline when its track set or selections change
    pub fn handle_tracks_changed(&self, mapped: &MappedTrackInfo, selections: &[Option<TrackSelection>]) {
        let (tracks, selected) = compute_tracks(mapped, selections);
        debug!(tracks = tracks.len(), selected = selected.len(), "Tracks changed");

        let listeners = self.listeners.lock().clone();
        for listener in &listeners {
            listener.on_tracks(&tracks, &selected);
        }
    }

    /// Release everything. Each step runs even when an earlier one fails.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state == ControllerState::Released {
                return;
            }
            *state = ControllerState::Released;
        }

        self.rewinder.stop();
        if let Err(e) = self.pipeline.release() {
            warn!(error = %e, "Failed to release pipeline");
        }
        let surface = self.surface.lock().take();
        if let Some(surface) = surface {
            if let Err(e) = surface.release() {
                warn!(error = %e, "Failed to release surface");
            }
        }
        self.close_data_source().await;
        info!("Controller released");
    }

    async fn close_data_source(&self) {
        if let Some(data_source) = self.factory.take_current() {
            if let Err(e) = data_source.close().await {
                warn!(
                    subscription_id = data_source.subscription_id(),
                    error = %e,
                    "Failed to close data source"
                );
            }
        }
    }
}
