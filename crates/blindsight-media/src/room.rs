//! Media room abstraction.
//!
//! The transport (room connection, track negotiation, decoding) lives outside
//! the bridge. Implementations of [`MediaRoom`] expose the participant list,
//! a queue of track events, and per-track frame subscriptions.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;

use blindsight_core::error::Result;
use blindsight_core::types::{Frame, Participant, TrackHandle};

/// Frames of one subscribed track. Ends when the track is unpublished or the
/// connection drops; a new subscription is needed to resume.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// An open subscription to a track's frames.
pub struct FrameSubscription {
    pub id: String,
    pub frames: FrameStream,
}

/// Track availability change reported by the room.
#[derive(Debug, Clone)]
pub enum TrackEvent {
    /// A remote track was subscribed and can be ingested.
    Subscribed { track: TrackHandle },
    /// A previously subscribed track went away.
    Unsubscribed { track_id: String },
}

pub type TrackEventReceiver = mpsc::UnboundedReceiver<TrackEvent>;

/// The room service as seen by the bridge.
#[async_trait]
pub trait MediaRoom: Send + Sync + 'static {
    /// Room name, for logs.
    fn name(&self) -> &str;

    /// Remote participants in discovery order, each with its published tracks.
    async fn remote_participants(&self) -> Vec<Participant>;

    /// Receive track events from now on. Earlier publications are only
    /// visible through [`MediaRoom::remote_participants`].
    async fn track_events(&self) -> Result<TrackEventReceiver>;

    /// Open a frame subscription for `track`.
    async fn subscribe(&self, track: &TrackHandle) -> Result<FrameSubscription>;

    /// Release a subscription opened by [`MediaRoom::subscribe`].
    async fn unsubscribe(&self, subscription_id: &str) -> Result<()>;
}
