//! In-process room — publishes tracks and frames without any transport.
//!
//! Used by the `simulate` command and by tests. Frames are delivered to every
//! open subscription of the track they are sent on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use blindsight_core::error::{BlindsightError, Result};
use blindsight_core::types::{Frame, Participant, TrackHandle};

use crate::room::{FrameSubscription, MediaRoom, TrackEvent, TrackEventReceiver};

#[derive(Default)]
struct LocalRoomInner {
    participants: Vec<Participant>,
    listeners: Vec<mpsc::UnboundedSender<TrackEvent>>,
    subscriptions: HashMap<String, Subscriber>,
    next_subscription: u64,
}

struct Subscriber {
    track_id: String,
    /// `None` once the track ended; the entry stays until unsubscribed.
    tx: Option<mpsc::UnboundedSender<Result<Frame>>>,
}

impl LocalRoomInner {
    fn notify(&mut self, event: TrackEvent) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn is_published(&self, track_id: &str) -> bool {
        self.participants
            .iter()
            .any(|p| p.tracks.iter().any(|t| t.track_id == track_id))
    }
}

/// An in-process [`MediaRoom`].
#[derive(Clone)]
pub struct LocalRoom {
    name: String,
    inner: Arc<Mutex<LocalRoomInner>>,
}

impl LocalRoom {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inner: Arc::new(Mutex::new(LocalRoomInner::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LocalRoomInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish `track` on behalf of its participant and announce it to listeners.
    pub fn publish(&self, track: TrackHandle) -> TrackPublisher {
        let mut inner = self.lock();
        match inner
            .participants
            .iter()
            .position(|p| p.identity == track.participant)
        {
            Some(index) => inner.participants[index].tracks.push(track.clone()),
            None => inner.participants.push(Participant {
                identity: track.participant.clone(),
                tracks: vec![track.clone()],
            }),
        }
        inner.notify(TrackEvent::Subscribed {
            track: track.clone(),
        });
        debug!(room = %self.name, track_id = %track.track_id, "Track published");

        TrackPublisher {
            room: self.clone(),
            track,
        }
    }

    /// Number of subscriptions not yet released.
    pub fn active_subscriptions(&self) -> usize {
        self.lock().subscriptions.len()
    }

    /// Number of unreleased subscriptions on `track_id`.
    pub fn subscriptions_for(&self, track_id: &str) -> usize {
        self.lock()
            .subscriptions
            .values()
            .filter(|s| s.track_id == track_id)
            .count()
    }
}

#[async_trait]
impl MediaRoom for LocalRoom {
    fn name(&self) -> &str {
        &self.name
    }

    async fn remote_participants(&self) -> Vec<Participant> {
        self.lock().participants.clone()
    }

    async fn track_events(&self) -> Result<TrackEventReceiver> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().listeners.push(tx);
        Ok(rx)
    }

    async fn subscribe(&self, track: &TrackHandle) -> Result<FrameSubscription> {
        let mut inner = self.lock();
        if !inner.is_published(&track.track_id) {
            return Err(BlindsightError::Room(format!(
                "Track {} is not published in room {}",
                track.track_id, self.name
            )));
        }

        inner.next_subscription += 1;
        let id = format!("sub-{}", inner.next_subscription);
        let (tx, rx) = mpsc::unbounded_channel();
        inner.subscriptions.insert(
            id.clone(),
            Subscriber {
                track_id: track.track_id.clone(),
                tx: Some(tx),
            },
        );
        debug!(room = %self.name, track_id = %track.track_id, subscription = %id, "Subscribed");

        Ok(FrameSubscription {
            id,
            frames: Box::pin(UnboundedReceiverStream::new(rx)),
        })
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        if self.lock().subscriptions.remove(subscription_id).is_some() {
            debug!(room = %self.name, subscription = subscription_id, "Unsubscribed");
        }
        Ok(())
    }
}

/// Sending side of a track published in a [`LocalRoom`].
pub struct TrackPublisher {
    room: LocalRoom,
    track: TrackHandle,
}

impl TrackPublisher {
    pub fn track(&self) -> &TrackHandle {
        &self.track
    }

    /// Deliver `frame` to every open subscription. Returns how many received it.
    pub fn send(&self, frame: Frame) -> usize {
        let inner = self.room.lock();
        inner
            .subscriptions
            .values()
            .filter(|s| s.track_id == self.track.track_id)
            .filter_map(|s| s.tx.as_ref())
            .filter(|tx| tx.send(Ok(frame.clone())).is_ok())
            .count()
    }

    /// Report a source error to subscribers and end their streams.
    pub fn fail(&self, message: &str) {
        let mut inner = self.room.lock();
        for sub in inner
            .subscriptions
            .values_mut()
            .filter(|s| s.track_id == self.track.track_id)
        {
            if let Some(tx) = sub.tx.take() {
                let _ = tx.send(Err(BlindsightError::Room(message.to_string())));
            }
        }
    }

    /// Withdraw the track: end open streams and announce the removal.
    pub fn unpublish(self) {
        let mut inner = self.room.lock();
        for participant in inner.participants.iter_mut() {
            participant
                .tracks
                .retain(|t| t.track_id != self.track.track_id);
        }
        for sub in inner
            .subscriptions
            .values_mut()
            .filter(|s| s.track_id == self.track.track_id)
        {
            sub.tx = None;
        }
        inner.notify(TrackEvent::Unsubscribed {
            track_id: self.track.track_id.clone(),
        });
    }
}
