//! OpenIPTV player
//!
//! Bridges a push-based server subscription to a pull-based, seekable
//! playback pipeline and reconciles the server's program clock with the
//! host's wall-clock trick-play model.
//!
//! ## Architecture
//!
//! - **`TimeshiftController`**: Orchestrates prepare, trick-play and teardown
//! - **`SubscriptionDataSource`**: Pushed stream in, sequential reads out
//! - **`Rewinder`**: Emulates rewind with periodic discrete seeks
//! - **`speed`**: Host multipliers ↔ protocol speed codes
//! - **`tracks`**: Host-visible track descriptors and selections

pub mod controller;
pub mod data_source;
pub mod pipeline;
pub mod rewinder;
pub mod speed;
pub mod tracks;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use controller::{ControllerState, TimeshiftController, TrackListener};
pub use data_source::{SeekOutcome, SubscriptionDataSource, SubscriptionDataSourceFactory, TimeshiftStatus};
pub use pipeline::{MediaSource, PlaybackPipeline, Surface};
pub use rewinder::{RewindRequest, Rewinder};
pub use tracks::{TrackDescriptor, TrackSelectionMap, TrackType};
