//! Emulated rewind.
//!
//! Neither the pipeline nor the server can play backwards, so the rewinder
//! keeps a synthetic position clock that runs backwards from an anchor and
//! periodically seeks the pipeline to it.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

use openiptv_core::time::ms_to_us;

use crate::pipeline::PlaybackPipeline;

/// Parameters of one rewind run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewindRequest {
    /// Host multiplier; only its magnitude matters
    pub multiplier: f32,
    /// Position (ms) the clock starts from
    pub anchor_ms: i64,
    /// Position (ms) the clock never goes below
    pub floor_ms: i64,
    /// Pipeline position zero expressed in the clock's time base (µs)
    pub origin_us: i64,
    /// Lowest pipeline position (µs) a tick may seek to
    pub min_target_us: i64,
}

#[derive(Debug, Clone, Copy)]
struct RewindClock {
    started: Instant,
    anchor_ms: i64,
    floor_ms: i64,
    rate: f64,
}

impl RewindClock {
    fn new(request: &RewindRequest) -> Self {
        Self {
            started: Instant::now(),
            anchor_ms: request.anchor_ms,
            floor_ms: request.floor_ms.min(request.anchor_ms),
            rate: f64::from(request.multiplier.abs()),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn position_ms(&self) -> i64 {
        let elapsed_ms = self.started.elapsed().as_millis() as f64;
        let travelled = (elapsed_ms * self.rate) as i64;
        self.anchor_ms.saturating_sub(travelled).max(self.floor_ms)
    }
}

struct ActiveRewind {
    clock: RewindClock,
    cancel: CancellationToken,
}

/// Drives the pipeline backwards by discrete seeks. At most one rewind task
/// exists at a time.
pub struct Rewinder {
    pipeline: Arc<dyn PlaybackPipeline>,
    tick: Duration,
    active: Mutex<Option<ActiveRewind>>,
}

impl Rewinder {
    #[must_use]
    pub fn new(pipeline: Arc<dyn PlaybackPipeline>, tick: Duration) -> Self {
        Self {
            pipeline,
            tick,
            active: Mutex::new(None),
        }
    }

    /// Start rewinding, replacing any rewind already in progress
    pub fn start(&self, request: RewindRequest) {
        self.stop();

        let clock = RewindClock::new(&request);
        let cancel = CancellationToken::new();
        let span = tracing::debug_span!("rewind", multiplier = request.multiplier);
        tokio::spawn(
            Self::rewind_loop(
                Arc::clone(&self.pipeline),
                clock,
                request,
                self.tick,
                cancel.clone(),
            )
            .instrument(span),
        );

        debug!(
            multiplier = request.multiplier,
            anchor_ms = request.anchor_ms,
            floor_ms = clock.floor_ms,
            "Rewind started"
        );
        *self.active.lock() = Some(ActiveRewind { clock, cancel });
    }

    /// Stop the rewind task. Does nothing when no rewind is running.
    pub fn stop(&self) {
        if let Some(active) = self.active.lock().take() {
            active.cancel.cancel();
            debug!(position_ms = active.clock.position_ms(), "Rewind stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Synthetic position in ms, `None` when not rewinding
    #[must_use]
    pub fn current_position(&self) -> Option<i64> {
        self.active.lock().as_ref().map(|active| active.clock.position_ms())
    }

    async fn rewind_loop(
        pipeline: Arc<dyn PlaybackPipeline>,
        clock: RewindClock,
        request: RewindRequest,
        tick: Duration,
        cancel: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // first tick completes immediately; the pipeline is already there
        interval.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let target_us = ms_to_us(clock.position_ms())
                        .saturating_sub(request.origin_us)
                        .max(request.min_target_us)
                        .max(0);
                    pipeline.seek_to(target_us);
                }
            }
        }
    }
}

impl Drop for Rewinder {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{settle, MockPipeline};

    const TICK: Duration = Duration::from_millis(250);

    fn request(multiplier: f32) -> RewindRequest {
        RewindRequest {
            multiplier,
            anchor_ms: 60_000,
            floor_ms: 10_000,
            origin_us: 0,
            min_target_us: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_runs_backwards_proportionally() {
        let pipeline = MockPipeline::new();
        let rewinder = Rewinder::new(pipeline.clone(), TICK);

        rewinder.start(request(-8.0));
        assert!(rewinder.is_running());
        assert_eq!(rewinder.current_position(), Some(60_000));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(rewinder.current_position(), Some(52_000));

        rewinder.start(request(-2.0));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(rewinder.current_position(), Some(58_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_never_below_floor() {
        let pipeline = MockPipeline::new();
        let rewinder = Rewinder::new(pipeline.clone(), TICK);

        rewinder.start(request(-128.0));
        tokio::time::advance(Duration::from_secs(10)).await;

        assert_eq!(rewinder.current_position(), Some(10_000));
        assert!(rewinder.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_seek_pipeline_monotonically() {
        let pipeline = MockPipeline::new();
        let rewinder = Rewinder::new(pipeline.clone(), TICK);

        rewinder.start(RewindRequest {
            origin_us: 5_000_000,
            ..request(-8.0)
        });
        settle().await;
        for _ in 0..4 {
            tokio::time::advance(TICK).await;
            settle().await;
        }

        let seeks = pipeline.seeks();
        assert_eq!(seeks.len(), 4);
        assert!(seeks.windows(2).all(|w| w[1] <= w[0]), "seeks {seeks:?}");
        assert_eq!(seeks[0], ms_to_us(58_000) - 5_000_000);
        assert!(seeks.iter().all(|s| *s >= 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_never_seek_below_min_target() {
        let pipeline = MockPipeline::new();
        let rewinder = Rewinder::new(pipeline.clone(), TICK);

        rewinder.start(RewindRequest {
            min_target_us: 20_000_000,
            ..request(-128.0)
        });
        settle().await;
        for _ in 0..8 {
            tokio::time::advance(TICK).await;
            settle().await;
        }

        let seeks = pipeline.seeks();
        assert_eq!(seeks.len(), 8);
        assert!(seeks.iter().all(|s| *s >= 20_000_000), "seeks {seeks:?}");
        assert_eq!(seeks.last(), Some(&20_000_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_immediate_and_idempotent() {
        let pipeline = MockPipeline::new();
        let rewinder = Rewinder::new(pipeline.clone(), TICK);

        rewinder.stop();
        rewinder.start(request(-2.0));
        settle().await;
        rewinder.stop();
        rewinder.stop();

        assert!(!rewinder.is_running());
        assert_eq!(rewinder.current_position(), None);

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(pipeline.seeks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_leaves_single_task() {
        let pipeline = MockPipeline::new();
        let rewinder = Rewinder::new(pipeline.clone(), TICK);

        rewinder.start(request(-2.0));
        rewinder.start(request(-8.0));
        settle().await;
        tokio::time::advance(TICK).await;
        settle().await;

        assert_eq!(pipeline.seeks().len(), 1);
    }
}
