//! Protocol messages exchanged with the tuner/DVR server and the connection
//! seams the rest of the workspace talks through.
//!
//! Framing and the receive loop belong to the connection layer; this module
//! only fixes the shape of what is sent and what is pushed back per
//! subscription.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::ConnectionConfig;

/// Messages the client sends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Subscribe {
        channel_id: u32,
        subscription_id: u32,
        timeshift_period: u32,
    },
    #[serde(rename_all = "camelCase")]
    Unsubscribe { subscription_id: u32 },
    #[serde(rename_all = "camelCase")]
    SubscriptionSpeed { subscription_id: u32, speed: i32 },
    #[serde(rename_all = "camelCase")]
    SubscriptionSeek { subscription_id: u32, pts: i64 },
    /// `start`/`stop` are seconds since the Unix epoch
    #[serde(rename_all = "camelCase")]
    AddDvrEntry { event_id: u32, start: i64, stop: i64 },
}

impl ClientMessage {
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::SubscriptionSpeed { .. } => "subscriptionSpeed",
            Self::SubscriptionSeek { .. } => "subscriptionSeek",
            Self::AddDvrEntry { .. } => "addDvrEntry",
        }
    }
}

/// Events the server pushes for one subscription. All times are microseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Subscription granted. Live streams carry the wall-clock time at which
    /// the timeshift buffer begins; recorded assets carry none.
    SubscriptionStart { timeshift_start: Option<i64> },
    /// Periodic buffer report. `shift` is how far playback lags the live edge.
    TimeshiftStatus {
        full: bool,
        shift: i64,
        start: Option<i64>,
        end: Option<i64>,
    },
    /// Transport payload for the playback pipeline
    MuxPacket { pts: i64, payload: Bytes },
    /// Server confirmation of a seek; `time` is where playback actually landed
    SubscriptionSkip { time: Option<i64> },
    /// Server confirmation of a speed change
    SubscriptionSpeed { speed: i32 },
    SubscriptionStop { reason: Option<String> },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("connection closed")]
    Closed,
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("send failed: {0}")]
    Io(String),
}

/// Outbound half of the server connection plus per-subscription routing of
/// pushed events.
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    async fn send(&self, message: ClientMessage) -> Result<(), DispatchError>;

    /// Route every event for `subscription_id` to the returned receiver
    fn register_subscription(&self, subscription_id: u32) -> mpsc::UnboundedReceiver<ServerEvent>;

    fn unregister_subscription(&self, subscription_id: u32);
}

/// Establishes the shared server connection
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> crate::Result<Arc<dyn MessageDispatcher>>;
}
