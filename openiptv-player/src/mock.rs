//! In-memory stand-ins for the server connection, the playback pipeline and
//! the display surface, for tests that run without a server or decoder.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use openiptv_core::protocol::{ClientMessage, DispatchError, MessageDispatcher, ServerEvent};
use openiptv_core::{Error, Result};

use crate::pipeline::{MediaSource, PlaybackPipeline, Surface};
use crate::tracks::TrackType;

/// Let spawned tasks drain what has been pushed to them
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// Records every sent message and routes pushed events to registered
/// subscriptions
#[derive(Default)]
pub struct MockDispatcher {
    sent: Mutex<Vec<ClientMessage>>,
    routes: Mutex<HashMap<u32, mpsc::UnboundedSender<ServerEvent>>>,
    last_subscription: Mutex<Option<u32>>,
    fail_sends: AtomicBool,
    auto_ack_seeks: AtomicBool,
}

impl MockDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer every seek with a skip to the requested position
    pub fn with_auto_ack() -> Arc<Self> {
        let dispatcher = Self::default();
        dispatcher.auto_ack_seeks.store(true, Ordering::SeqCst);
        Arc::new(dispatcher)
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Deliver `event` to `subscription_id`. Dropped when nobody listens.
    pub fn push(&self, subscription_id: u32, event: ServerEvent) {
        if let Some(route) = self.routes.lock().get(&subscription_id) {
            let _ = route.send(event);
        }
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().clone()
    }

    pub fn speeds(&self) -> Vec<i32> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                ClientMessage::SubscriptionSpeed { speed, .. } => Some(*speed),
                _ => None,
            })
            .collect()
    }

    pub fn seeks(&self) -> Vec<i64> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                ClientMessage::SubscriptionSeek { pts, .. } => Some(*pts),
                _ => None,
            })
            .collect()
    }

    pub fn last_subscription_id(&self) -> Option<u32> {
        *self.last_subscription.lock()
    }

    pub fn is_registered(&self, subscription_id: u32) -> bool {
        self.routes.lock().contains_key(&subscription_id)
    }
}

#[async_trait]
impl MessageDispatcher for MockDispatcher {
    async fn send(&self, message: ClientMessage) -> std::result::Result<(), DispatchError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(DispatchError::Closed);
        }
        if let ClientMessage::SubscriptionSeek {
            subscription_id,
            pts,
        } = message
        {
            if self.auto_ack_seeks.load(Ordering::SeqCst) {
                self.push(subscription_id, ServerEvent::SubscriptionSkip { time: Some(pts) });
            }
        }
        self.sent.lock().push(message);
        Ok(())
    }

    fn register_subscription(&self, subscription_id: u32) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.lock().insert(subscription_id, tx);
        *self.last_subscription.lock() = Some(subscription_id);
        rx
    }

    fn unregister_subscription(&self, subscription_id: u32) {
        self.routes.lock().remove(&subscription_id);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineCall {
    Prepare { subscription: bool },
    PlayWhenReady(bool),
    PlaybackRate(f32),
    SeekTo(i64),
    SetSurface(bool),
    Volume(f32),
    SelectTrack(TrackType, String),
    Release,
}

#[derive(Default)]
pub struct MockPipeline {
    calls: Mutex<Vec<PipelineCall>>,
    source: Mutex<Option<MediaSource>>,
    position_us: AtomicI64,
    fail_prepare: AtomicBool,
    fail_release: AtomicBool,
}

impl MockPipeline {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail_prepare(&self, fail: bool) {
        self.fail_prepare.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_release(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }

    pub fn set_position_us(&self, position_us: i64) {
        self.position_us.store(position_us, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<PipelineCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn seeks(&self) -> Vec<i64> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                PipelineCall::SeekTo(position) => Some(*position),
                _ => None,
            })
            .collect()
    }

    /// Last value passed to `set_play_when_ready`
    pub fn play_when_ready(&self) -> Option<bool> {
        self.calls.lock().iter().rev().find_map(|c| match c {
            PipelineCall::PlayWhenReady(play) => Some(*play),
            _ => None,
        })
    }

    pub fn prepared_source(&self) -> Option<MediaSource> {
        self.source.lock().clone()
    }

    fn record(&self, call: PipelineCall) {
        self.calls.lock().push(call);
    }
}

impl PlaybackPipeline for MockPipeline {
    fn prepare(&self, source: MediaSource) -> Result<()> {
        self.record(PipelineCall::Prepare {
            subscription: source.is_subscription(),
        });
        if self.fail_prepare.load(Ordering::SeqCst) {
            return Err(Error::Pipeline("unsupported source".to_string()));
        }
        *self.source.lock() = Some(source);
        Ok(())
    }

    fn set_play_when_ready(&self, play_when_ready: bool) {
        self.record(PipelineCall::PlayWhenReady(play_when_ready));
    }

    fn set_playback_rate(&self, rate: f32) {
        self.record(PipelineCall::PlaybackRate(rate));
    }

    fn seek_to(&self, position_us: i64) {
        self.position_us.store(position_us, Ordering::SeqCst);
        self.record(PipelineCall::SeekTo(position_us));
    }

    fn current_position_us(&self) -> i64 {
        self.position_us.load(Ordering::SeqCst)
    }

    fn set_surface(&self, surface: Option<Arc<dyn Surface>>) {
        self.record(PipelineCall::SetSurface(surface.is_some()));
    }

    fn set_volume(&self, volume: f32) {
        self.record(PipelineCall::Volume(volume));
    }

    fn select_track(&self, track_type: TrackType, track_id: &str) -> bool {
        self.record(PipelineCall::SelectTrack(track_type, track_id.to_string()));
        true
    }

    fn release(&self) -> Result<()> {
        self.record(PipelineCall::Release);
        self.source.lock().take();
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(Error::Pipeline("decoder already gone".to_string()));
        }
        Ok(())
    }
}

/// Surface that refuses to be released twice
#[derive(Debug, Default)]
pub struct MockSurface {
    releases: AtomicUsize,
}

impl MockSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl Surface for MockSurface {
    fn release(&self) -> Result<()> {
        if self.releases.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(Error::Pipeline("surface already released".to_string()));
        }
        Ok(())
    }
}
