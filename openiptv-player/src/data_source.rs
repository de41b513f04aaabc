//! Subscription data source
//!
//! Adapts the bytes the server pushes for one subscription into the
//! sequential reads the playback pipeline performs, and turns controller
//! trick-play calls into protocol messages.
//!
//! Control calls are fire-and-forget: the server answers on the pushed
//! stream, which the receive task folds into a [`TimeshiftStatus`] snapshot.
//! The only answer anybody waits for is the seek confirmation, exposed as a
//! [`SeekAck`].

use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use openiptv_core::config::TimeshiftConfig;
use openiptv_core::protocol::{ClientMessage, MessageDispatcher, ServerEvent};
use openiptv_core::{Error, Locator, Result};

use crate::speed::{NORMAL_SPEED, PAUSED_SPEED};

/// Subscription ids must be unique per server connection, which sessions share
static NEXT_SUBSCRIPTION_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Open,
    Closed,
}

/// Timeshift state of one subscription. Times are microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeshiftStatus {
    /// Server wall-clock time at which the timeshift buffer begins.
    /// Set once by the subscription start; `None` for recorded assets.
    pub timeshift_start: Option<i64>,
    /// Earliest PTS still retained in the server buffer
    pub start_pts: Option<i64>,
    pub end_pts: Option<i64>,
    /// Signed drift between the local read position and the server clock
    pub offset_pts: i64,
    pub buffer_full: bool,
    pub current_speed: i32,
}

impl Default for TimeshiftStatus {
    fn default() -> Self {
        Self {
            timeshift_start: None,
            start_pts: None,
            end_pts: None,
            offset_pts: 0,
            buffer_full: false,
            current_speed: NORMAL_SPEED,
        }
    }
}

#[derive(Debug, Default)]
struct ReadBuffer {
    chunks: VecDeque<Bytes>,
    len: usize,
    ended: bool,
}

impl ReadBuffer {
    /// Append a payload, dropping the oldest chunks beyond `max`. Returns the
    /// number of bytes dropped.
    fn push(&mut self, payload: Bytes, max: usize) -> usize {
        self.len += payload.len();
        self.chunks.push_back(payload);

        let mut dropped = 0;
        while self.len > max {
            let Some(oldest) = self.chunks.pop_front() else {
                break;
            };
            self.len -= oldest.len();
            dropped += oldest.len();
        }
        dropped
    }

    fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let mut written = 0;
        while written < buf.len() {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let n = front.len().min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&front[..n]);
            front.advance(n);
            written += n;
            if front.is_empty() {
                self.chunks.pop_front();
            }
        }
        self.len -= written;
        written
    }

    fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }
}

/// State touched by both the receive task and the host/pipeline callers
struct Shared {
    subscription_id: u32,
    status: Mutex<TimeshiftStatus>,
    buffer: Mutex<ReadBuffer>,
    data_ready: Notify,
    pending_seek: Mutex<Option<oneshot::Sender<Option<i64>>>>,
    max_buffered_bytes: usize,
}

impl Shared {
    fn apply(&self, event: ServerEvent) {
        match event {
            ServerEvent::SubscriptionStart { timeshift_start } => {
                let mut status = self.status.lock();
                if status.timeshift_start.is_none() {
                    status.timeshift_start = timeshift_start;
                }
                info!(
                    subscription_id = self.subscription_id,
                    timeshift_start = ?status.timeshift_start,
                    "Subscription started"
                );
            }
            ServerEvent::TimeshiftStatus {
                full,
                shift,
                start,
                end,
            } => {
                let mut status = self.status.lock();
                status.buffer_full = full;
                status.offset_pts = -shift;
                status.start_pts = start;
                status.end_pts = end;
            }
            ServerEvent::MuxPacket { payload, .. } => {
                let dropped = self
                    .buffer
                    .lock()
                    .push(payload, self.max_buffered_bytes);
                if dropped > 0 {
                    warn!(
                        subscription_id = self.subscription_id,
                        dropped_bytes = dropped,
                        "Read buffer full, dropped oldest data"
                    );
                }
                self.data_ready.notify_one();
            }
            ServerEvent::SubscriptionSkip { time } => match self.pending_seek.lock().take() {
                Some(ack) => {
                    // receiver may have timed out already
                    let _ = ack.send(time);
                }
                None => debug!(
                    subscription_id = self.subscription_id,
                    time = ?time,
                    "Skip without pending seek"
                ),
            },
            ServerEvent::SubscriptionSpeed { speed } => {
                self.status.lock().current_speed = speed;
                debug!(subscription_id = self.subscription_id, speed, "Server speed changed");
            }
            ServerEvent::SubscriptionStop { reason } => {
                info!(
                    subscription_id = self.subscription_id,
                    reason = reason.as_deref().unwrap_or("none"),
                    "Subscription stopped by server"
                );
                self.finish();
            }
        }
    }

    fn finish(&self) {
        self.buffer.lock().ended = true;
        self.data_ready.notify_one();
    }
}

async fn receive_loop(
    shared: Arc<Shared>,
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => shared.apply(event),
                None => {
                    debug!(subscription_id = shared.subscription_id, "Event stream closed");
                    shared.finish();
                    break;
                }
            },
        }
    }
}

/// Result of waiting for a seek confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOutcome {
    /// Server confirmed; carries where playback landed when reported
    Confirmed(Option<i64>),
    TimedOut,
    /// A newer seek or teardown replaced this one
    Abandoned,
    /// No seek was sent because no subscription was established
    NotIssued,
}

/// Pending confirmation of a `subscriptionSeek`
#[derive(Debug)]
pub struct SeekAck {
    receiver: Option<oneshot::Receiver<Option<i64>>>,
}

impl SeekAck {
    const fn not_issued() -> Self {
        Self { receiver: None }
    }

    pub async fn wait(self, timeout: Duration) -> SeekOutcome {
        let Some(receiver) = self.receiver else {
            return SeekOutcome::NotIssued;
        };
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(landed)) => SeekOutcome::Confirmed(landed),
            Ok(Err(_)) => SeekOutcome::Abandoned,
            Err(_) => SeekOutcome::TimedOut,
        }
    }
}

/// One server subscription, readable by the pipeline
pub struct SubscriptionDataSource {
    locator: Locator,
    subscription_id: u32,
    timeshift_period_secs: u32,
    dispatcher: Arc<dyn MessageDispatcher>,
    phase: Mutex<Phase>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl SubscriptionDataSource {
    fn new(locator: Locator, dispatcher: Arc<dyn MessageDispatcher>, config: &TimeshiftConfig) -> Self {
        let subscription_id = NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            locator,
            subscription_id,
            timeshift_period_secs: config.timeshift_period_secs,
            dispatcher,
            phase: Mutex::new(Phase::Created),
            shared: Arc::new(Shared {
                subscription_id,
                status: Mutex::new(TimeshiftStatus::default()),
                buffer: Mutex::new(ReadBuffer::default()),
                data_ready: Notify::new(),
                pending_seek: Mutex::new(None),
                max_buffered_bytes: config.max_buffered_bytes,
            }),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub const fn locator(&self) -> &Locator {
        &self.locator
    }

    #[must_use]
    pub const fn subscription_id(&self) -> u32 {
        self.subscription_id
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.phase.lock() == Phase::Open
    }

    /// Subscribe and start receiving pushed events
    pub async fn open(&self) -> Result<()> {
        let channel_id = self.locator.id()?;
        {
            let mut phase = self.phase.lock();
            match *phase {
                Phase::Open => return Ok(()),
                Phase::Closed => {
                    return Err(Error::InvalidState {
                        operation: "open",
                        state: "Closed".to_string(),
                    })
                }
                Phase::Created => *phase = Phase::Open,
            }
        }

        let events = self.dispatcher.register_subscription(self.subscription_id);
        let span = tracing::debug_span!("subscription", subscription_id = self.subscription_id);
        tokio::spawn(
            receive_loop(Arc::clone(&self.shared), events, self.cancel.clone()).instrument(span),
        );

        let subscribe = ClientMessage::Subscribe {
            channel_id,
            subscription_id: self.subscription_id,
            timeshift_period: self.timeshift_period_secs,
        };
        if let Err(e) = self.dispatcher.send(subscribe).await {
            warn!(
                subscription_id = self.subscription_id,
                locator = %self.locator,
                error = %e,
                "Failed to subscribe"
            );
            *self.phase.lock() = Phase::Closed;
            self.cancel.cancel();
            self.dispatcher.unregister_subscription(self.subscription_id);
            return Err(e.into());
        }

        info!(
            subscription_id = self.subscription_id,
            locator = %self.locator,
            channel_id,
            "Subscription opened"
        );
        Ok(())
    }

    /// Read buffered bytes, waiting until data arrives. `Ok(0)` means the
    /// stream ended or the source was closed.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            {
                let mut buffer = self.shared.buffer.lock();
                if buffer.len > 0 {
                    return Ok(buffer.read_into(buf));
                }
                if buffer.ended {
                    return Ok(0);
                }
            }
            self.shared.data_ready.notified().await;
        }
    }

    pub async fn pause(&self) -> Result<()> {
        self.send_speed("pause", PAUSED_SPEED).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.send_speed("resume", NORMAL_SPEED).await
    }

    pub async fn set_speed(&self, speed: i32) -> Result<()> {
        self.send_speed("set_speed", speed).await
    }

    /// Ask the server to move the subscription to `pts`. Bytes buffered for
    /// the old position are discarded.
    pub async fn seek(&self, pts: i64) -> Result<SeekAck> {
        if !self.is_open() {
            warn!(locator = %self.locator, pts, "Unable to seek, no subscription established");
            return Ok(SeekAck::not_issued());
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        *self.shared.pending_seek.lock() = Some(ack_tx);

        let message = ClientMessage::SubscriptionSeek {
            subscription_id: self.subscription_id,
            pts,
        };
        if let Err(e) = self.dispatcher.send(message).await {
            self.shared.pending_seek.lock().take();
            warn!(subscription_id = self.subscription_id, error = %e, "Failed to send seek");
            return Err(e.into());
        }
        self.shared.buffer.lock().clear();

        debug!(subscription_id = self.subscription_id, pts, "Seek requested");
        Ok(SeekAck {
            receiver: Some(ack_rx),
        })
    }

    /// Unsubscribe and wake any pending reader. Safe to call repeatedly.
    pub async fn close(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.phase.lock(), Phase::Closed);
        if previous == Phase::Closed {
            return Ok(());
        }

        self.cancel.cancel();
        self.shared.pending_seek.lock().take();
        self.shared.finish();

        if previous == Phase::Open {
            self.dispatcher.unregister_subscription(self.subscription_id);
            self.dispatcher
                .send(ClientMessage::Unsubscribe {
                    subscription_id: self.subscription_id,
                })
                .await?;
            info!(subscription_id = self.subscription_id, "Subscription closed");
        }
        Ok(())
    }

    #[must_use]
    pub fn status(&self) -> TimeshiftStatus {
        *self.shared.status.lock()
    }

    #[must_use]
    pub fn timeshift_start_time(&self) -> Option<i64> {
        self.status().timeshift_start
    }

    #[must_use]
    pub fn timeshift_start_pts(&self) -> Option<i64> {
        self.status().start_pts
    }

    #[must_use]
    pub fn timeshift_offset_pts(&self) -> i64 {
        self.status().offset_pts
    }

    #[must_use]
    pub fn current_speed(&self) -> i32 {
        self.status().current_speed
    }

    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.shared.buffer.lock().len
    }

    async fn send_speed(&self, operation: &'static str, speed: i32) -> Result<()> {
        if !self.is_open() {
            warn!(
                locator = %self.locator,
                operation,
                "No subscription established, ignoring speed change"
            );
            return Ok(());
        }

        let message = ClientMessage::SubscriptionSpeed {
            subscription_id: self.subscription_id,
            speed,
        };
        self.dispatcher.send(message).await.map_err(|e| {
            warn!(
                subscription_id = self.subscription_id,
                operation,
                speed,
                error = %e,
                "Failed to send speed change"
            );
            Error::from(e)
        })
    }
}

impl Drop for SubscriptionDataSource {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Creates data sources and remembers the one currently in use
pub struct SubscriptionDataSourceFactory {
    dispatcher: Arc<dyn MessageDispatcher>,
    config: TimeshiftConfig,
    current: Mutex<Option<Arc<SubscriptionDataSource>>>,
}

impl SubscriptionDataSourceFactory {
    #[must_use]
    pub fn new(dispatcher: Arc<dyn MessageDispatcher>, config: TimeshiftConfig) -> Self {
        Self {
            dispatcher,
            config,
            current: Mutex::new(None),
        }
    }

    /// Build a data source for `locator`; it becomes current
    pub fn create(&self, locator: Locator) -> Arc<SubscriptionDataSource> {
        let source = Arc::new(SubscriptionDataSource::new(
            locator,
            Arc::clone(&self.dispatcher),
            &self.config,
        ));
        *self.current.lock() = Some(Arc::clone(&source));
        source
    }

    /// The current data source, or `None` until it has been opened
    #[must_use]
    pub fn current_data_source(&self) -> Option<Arc<SubscriptionDataSource>> {
        self.current
            .lock()
            .as_ref()
            .filter(|source| source.is_open())
            .cloned()
    }

    /// Forget the current data source regardless of its phase
    pub fn take_current(&self) -> Option<Arc<SubscriptionDataSource>> {
        self.current.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{settle, MockDispatcher};

    fn channel() -> Locator {
        Locator::parse("content://android.media.tv/channel/42").unwrap()
    }

    fn factory(dispatcher: &Arc<MockDispatcher>) -> SubscriptionDataSourceFactory {
        SubscriptionDataSourceFactory::new(dispatcher.clone(), TimeshiftConfig::default())
    }

    #[tokio::test]
    async fn test_controls_before_open_are_noops() {
        let dispatcher = MockDispatcher::new();
        let factory = factory(&dispatcher);
        let source = factory.create(channel());

        assert!(factory.current_data_source().is_none());
        source.pause().await.unwrap();
        source.resume().await.unwrap();
        source.set_speed(300).await.unwrap();
        let ack = source.seek(1_000).await.unwrap();

        assert_eq!(ack.wait(Duration::from_millis(10)).await, SeekOutcome::NotIssued);
        assert!(dispatcher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_open_subscribes_and_tracks_status() {
        let dispatcher = MockDispatcher::new();
        let factory = factory(&dispatcher);
        let source = factory.create(channel());
        source.open().await.unwrap();

        let id = source.subscription_id();
        assert_eq!(
            dispatcher.sent(),
            vec![ClientMessage::Subscribe {
                channel_id: 42,
                subscription_id: id,
                timeshift_period: 3600,
            }]
        );
        assert!(factory.current_data_source().is_some());

        dispatcher.push(id, ServerEvent::SubscriptionStart { timeshift_start: Some(1_000_000) });
        dispatcher.push(
            id,
            ServerEvent::TimeshiftStatus {
                full: false,
                shift: 2_500_000,
                start: Some(400_000),
                end: Some(9_000_000),
            },
        );
        // a second start must not move the buffer origin
        dispatcher.push(id, ServerEvent::SubscriptionStart { timeshift_start: Some(7_000_000) });
        dispatcher.push(id, ServerEvent::SubscriptionSpeed { speed: 200 });
        settle().await;

        assert_eq!(source.timeshift_start_time(), Some(1_000_000));
        assert_eq!(source.timeshift_offset_pts(), -2_500_000);
        assert_eq!(source.timeshift_start_pts(), Some(400_000));
        assert_eq!(source.current_speed(), 200);
    }

    #[tokio::test]
    async fn test_read_delivers_pushed_bytes_in_order() {
        let dispatcher = MockDispatcher::new();
        let source = factory(&dispatcher).create(channel());
        source.open().await.unwrap();
        let id = source.subscription_id();

        dispatcher.push(id, ServerEvent::MuxPacket { pts: 0, payload: Bytes::from_static(b"abc") });
        dispatcher.push(id, ServerEvent::MuxPacket { pts: 1, payload: Bytes::from_static(b"defg") });

        let mut buf = [0u8; 5];
        let n = source.read(&mut buf).await.unwrap();
        let mut received = buf[..n].to_vec();
        while received.len() < 7 {
            let n = source.read(&mut buf).await.unwrap();
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received, b"abcdefg");

        dispatcher.push(id, ServerEvent::SubscriptionStop { reason: Some("eof".to_string()) });
        assert_eq!(source.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_buffer_drops_oldest_when_full() {
        let dispatcher = MockDispatcher::new();
        let config = TimeshiftConfig {
            max_buffered_bytes: 4,
            ..TimeshiftConfig::default()
        };
        let source = SubscriptionDataSourceFactory::new(dispatcher.clone(), config).create(channel());
        source.open().await.unwrap();
        let id = source.subscription_id();

        dispatcher.push(id, ServerEvent::MuxPacket { pts: 0, payload: Bytes::from_static(b"old") });
        dispatcher.push(id, ServerEvent::MuxPacket { pts: 1, payload: Bytes::from_static(b"new") });
        settle().await;

        assert_eq!(source.buffered_bytes(), 3);
        let mut buf = [0u8; 8];
        let n = source.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"new");
    }

    #[tokio::test]
    async fn test_speed_messages() {
        let dispatcher = MockDispatcher::new();
        let source = factory(&dispatcher).create(channel());
        source.open().await.unwrap();

        source.pause().await.unwrap();
        source.resume().await.unwrap();
        source.set_speed(-100).await.unwrap();

        assert_eq!(dispatcher.speeds(), vec![0, 100, -100]);
    }

    #[tokio::test]
    async fn test_seek_is_confirmed_by_skip() {
        let dispatcher = MockDispatcher::new();
        let source = factory(&dispatcher).create(channel());
        source.open().await.unwrap();
        let id = source.subscription_id();

        let ack = source.seek(5_000_000).await.unwrap();
        dispatcher.push(id, ServerEvent::SubscriptionSkip { time: Some(4_990_000) });

        assert_eq!(
            ack.wait(Duration::from_secs(1)).await,
            SeekOutcome::Confirmed(Some(4_990_000))
        );
        assert_eq!(dispatcher.seeks(), vec![5_000_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_times_out_without_skip() {
        let dispatcher = MockDispatcher::new();
        let source = factory(&dispatcher).create(channel());
        source.open().await.unwrap();

        let ack = source.seek(5_000_000).await.unwrap();
        assert_eq!(ack.wait(Duration::from_millis(500)).await, SeekOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_newer_seek_abandons_older() {
        let dispatcher = MockDispatcher::new();
        let source = factory(&dispatcher).create(channel());
        source.open().await.unwrap();

        let first = source.seek(1_000).await.unwrap();
        let _second = source.seek(2_000).await.unwrap();

        assert_eq!(first.wait(Duration::from_secs(1)).await, SeekOutcome::Abandoned);
    }

    #[tokio::test]
    async fn test_send_failures_propagate() {
        let dispatcher = MockDispatcher::new();
        let source = factory(&dispatcher).create(channel());
        source.open().await.unwrap();

        dispatcher.set_fail_sends(true);
        assert!(matches!(source.pause().await, Err(Error::Dispatch(_))));
        assert!(matches!(source.seek(10).await, Err(Error::Dispatch(_))));
    }

    #[tokio::test]
    async fn test_failed_seek_keeps_buffered_bytes() {
        let dispatcher = MockDispatcher::new();
        let source = factory(&dispatcher).create(channel());
        source.open().await.unwrap();
        let id = source.subscription_id();

        dispatcher.push(id, ServerEvent::MuxPacket { pts: 0, payload: Bytes::from_static(b"keep") });
        settle().await;
        dispatcher.set_fail_sends(true);
        assert!(source.seek(10).await.is_err());
        assert_eq!(source.buffered_bytes(), 4);

        dispatcher.set_fail_sends(false);
        source.seek(10).await.unwrap();
        assert_eq!(source.buffered_bytes(), 0);
    }

    #[tokio::test]
    async fn test_failed_subscribe_closes_source() {
        let dispatcher = MockDispatcher::new();
        dispatcher.set_fail_sends(true);
        let factory = factory(&dispatcher);
        let source = factory.create(channel());

        assert!(source.open().await.is_err());
        assert!(!source.is_open());
        assert!(factory.current_data_source().is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dispatcher = MockDispatcher::new();
        let source = factory(&dispatcher).create(channel());
        source.open().await.unwrap();
        let id = source.subscription_id();

        source.close().await.unwrap();
        source.close().await.unwrap();
        source.pause().await.unwrap();

        let unsubscribes = dispatcher
            .sent()
            .into_iter()
            .filter(|m| matches!(m, ClientMessage::Unsubscribe { .. }))
            .count();
        assert_eq!(unsubscribes, 1);
        assert!(dispatcher.speeds().is_empty());
        assert!(!dispatcher.is_registered(id));

        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf).await.unwrap(), 0);
    }
}
