//! Contract the controller requires from the decode/render pipeline and the
//! display surface.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use openiptv_core::Result;

use crate::data_source::SubscriptionDataSource;
use crate::tracks::TrackType;

/// Where the pipeline pulls its bytes from
#[derive(Clone)]
pub enum MediaSource {
    /// Live subscription fed by the server connection
    Subscription(Arc<SubscriptionDataSource>),
    /// Recorded asset fetched over HTTP
    Progressive {
        url: String,
        headers: HashMap<String, String>,
    },
}

impl MediaSource {
    #[must_use]
    pub const fn is_subscription(&self) -> bool {
        matches!(self, Self::Subscription(_))
    }
}

impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscription(source) => f
                .debug_tuple("Subscription")
                .field(&source.locator().as_str())
                .finish(),
            // headers carry credentials
            Self::Progressive { url, .. } => {
                f.debug_struct("Progressive").field("url", url).finish_non_exhaustive()
            }
        }
    }
}

/// Display surface handed over by the host
pub trait Surface: Send + Sync {
    /// Give the surface back to the host. Fails when it was already released.
    fn release(&self) -> Result<()>;
}

/// Playback pipeline driven by the controller.
///
/// Positions and seek targets are microseconds relative to the start of the
/// prepared source.
pub trait PlaybackPipeline: Send + Sync {
    fn prepare(&self, source: MediaSource) -> Result<()>;

    fn set_play_when_ready(&self, play_when_ready: bool);

    fn set_playback_rate(&self, rate: f32);

    fn seek_to(&self, position_us: i64);

    fn current_position_us(&self) -> i64;

    fn set_surface(&self, surface: Option<Arc<dyn Surface>>);

    fn set_volume(&self, volume: f32);

    fn select_track(&self, track_type: TrackType, track_id: &str) -> bool;

    fn release(&self) -> Result<()>;
}
