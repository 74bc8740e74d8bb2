//! Track supervision — keeps at most one ingest bound to the active video track.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use blindsight_core::config::VisionConfig;
use blindsight_core::error::{BlindsightError, Result};
use blindsight_core::types::TrackHandle;

use crate::frame_slot::FrameSlot;
use crate::ingest::{IngestReport, IngestTask, StreamIngest};
use crate::room::{MediaRoom, TrackEvent, TrackEventReceiver};

enum SupervisorState {
    Idle,
    Active(IngestTask),
}

/// Owns the active ingest and replaces it when the video source changes.
pub struct TrackSupervisor {
    room: Arc<dyn MediaRoom>,
    slot: Arc<FrameSlot>,
    stop_timeout: Duration,
    progress_log_every: u64,
    state: SupervisorState,
}

impl TrackSupervisor {
    pub fn new(room: Arc<dyn MediaRoom>, slot: Arc<FrameSlot>, vision: &VisionConfig) -> Self {
        Self {
            room,
            slot,
            stop_timeout: Duration::from_millis(vision.stop_timeout_ms),
            progress_log_every: vision.progress_log_every,
            state: SupervisorState::Idle,
        }
    }

    /// Track the active ingest is bound to, if any.
    pub fn active_track(&self) -> Option<&TrackHandle> {
        match &self.state {
            SupervisorState::Idle => None,
            SupervisorState::Active(task) => Some(task.track()),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SupervisorState::Active(_))
    }

    /// Pick up a video track that is already published when the session starts.
    ///
    /// Only the first remote participant is considered, and only its first
    /// video track; later participants are reached through track events.
    pub async fn on_session_entry(&mut self) -> Result<()> {
        let participants = self.room.remote_participants().await;
        let Some(participant) = participants.first() else {
            debug!(room = self.room.name(), "No remote participants at session entry");
            return Ok(());
        };

        match participant.first_video_track() {
            Some(track) => {
                info!(
                    participant = %participant.identity,
                    track_id = %track.track_id,
                    "Subscribing to existing video track"
                );
                self.activate(track.clone()).await
            }
            None => {
                debug!(participant = %participant.identity, "First participant has no video track");
                Ok(())
            }
        }
    }

    /// Switch ingest to a newly available track.
    ///
    /// The previous ingest is stopped, and confirmed stopped, before the new
    /// one is started. Non-video tracks and the already-active track are ignored.
    pub async fn on_track_available(&mut self, track: TrackHandle) -> Result<()> {
        if !track.is_video() {
            debug!(track_id = %track.track_id, "Ignoring non-video track");
            return Ok(());
        }
        if let SupervisorState::Active(task) = &self.state {
            if task.track().track_id == track.track_id && !task.is_finished() {
                debug!(track_id = %track.track_id, "Track already being ingested");
                return Ok(());
            }
        }

        info!(
            participant = %track.participant,
            track_id = %track.track_id,
            "New video track subscribed"
        );
        self.activate(track).await
    }

    /// Stop ingesting `track_id` if it is the active track. The slot keeps its last frame.
    pub async fn on_track_unavailable(&mut self, track_id: &str) -> Result<()> {
        let is_current = self
            .active_track()
            .is_some_and(|t| t.track_id == track_id);
        if !is_current {
            return Ok(());
        }
        info!(track_id, "Active video track went away");
        self.stop_active().await.map(|_| ())
    }

    /// Stop the active ingest, if any, and clear the slot.
    pub async fn shutdown(&mut self) -> Result<Option<IngestReport>> {
        let report = self.stop_active().await;
        self.slot.clear();
        info!(room = self.room.name(), "Track supervisor shut down");
        report
    }

    async fn activate(&mut self, track: TrackHandle) -> Result<()> {
        self.stop_active().await?;

        let ingest = StreamIngest::new(track.clone(), self.slot.clone(), self.room.clone())
            .with_progress_log_every(self.progress_log_every);
        match ingest.start().await {
            Ok(task) => {
                self.state = SupervisorState::Active(task);
                Ok(())
            }
            Err(e) if e.is_session_fatal() => Err(e),
            Err(e) => {
                // Subscription failures are the room's concern; wait for the next track.
                warn!(track_id = %track.track_id, %e, "Could not start ingest");
                Ok(())
            }
        }
    }

    async fn stop_active(&mut self) -> Result<Option<IngestReport>> {
        let SupervisorState::Active(mut task) =
            std::mem::replace(&mut self.state, SupervisorState::Idle)
        else {
            return Ok(None);
        };

        let report = task.stop(self.stop_timeout).await?;
        debug!(
            ingest_id = %report.ingest_id,
            frames = report.frames,
            exit = ?report.exit,
            "Previous ingest stopped"
        );
        Ok(Some(report))
    }
}

/// Run `supervisor` against the room's track events until `cancel` fires.
///
/// Events are handled one at a time, so back-to-back replacements never
/// overlap. On cancellation the supervisor is shut down and the slot cleared.
/// A session-fatal fault ends the watcher early with that error.
pub fn spawn_watcher(
    mut supervisor: TrackSupervisor,
    mut events: TrackEventReceiver,
    cancel: CancellationToken,
) -> JoinHandle<Result<Option<IngestReport>>> {
    tokio::spawn(async move {
        loop {
            let handled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(TrackEvent::Subscribed { track }) => {
                        supervisor.on_track_available(track).await
                    }
                    Some(TrackEvent::Unsubscribed { track_id }) => {
                        supervisor.on_track_unavailable(&track_id).await
                    }
                    None => {
                        debug!("Track event queue closed, waiting for session end");
                        cancel.cancelled().await;
                        break;
                    }
                },
            };

            if let Err(e) = handled {
                error!(%e, "Track supervisor fault, tearing down");
                let _ = supervisor.shutdown().await;
                return Err(e);
            }
        }

        supervisor.shutdown().await
    })
}

/// Convert a join failure of the watcher task into a supervisor error.
pub fn watcher_join_error(e: tokio::task::JoinError) -> BlindsightError {
    BlindsightError::Supervisor(format!("Track watcher task failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalRoom;
    use blindsight_core::types::{Frame, PixelFormat, TrackKind};

    fn frame(tag: u8) -> Frame {
        Frame::new(2, 2, PixelFormat::Rgba, vec![tag; 16])
    }

    async fn wait_for_generation(slot: &FrameSlot, generation: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while slot.generation() < generation {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("slot never reached generation");
    }

    fn supervisor(room: &LocalRoom, slot: &Arc<FrameSlot>) -> TrackSupervisor {
        TrackSupervisor::new(Arc::new(room.clone()), slot.clone(), &VisionConfig::default())
    }

    #[tokio::test]
    async fn test_entry_without_participants_stays_idle() {
        let room = LocalRoom::new("sup");
        let slot = Arc::new(FrameSlot::new());
        let mut sup = supervisor(&room, &slot);

        sup.on_session_entry().await.unwrap();
        assert!(!sup.is_active());
        assert!(sup.shutdown().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entry_picks_first_participants_first_video_track() {
        let room = LocalRoom::new("sup");
        room.publish(TrackHandle {
            track_id: "TR_mic".into(),
            track_name: "microphone".into(),
            kind: TrackKind::Audio,
            participant: "alice".into(),
        });
        room.publish(TrackHandle::video("TR_cam", "camera", "alice"));
        room.publish(TrackHandle::video("TR_screen", "screen", "alice"));
        room.publish(TrackHandle::video("TR_bob", "camera", "bob"));

        let slot = Arc::new(FrameSlot::new());
        let mut sup = supervisor(&room, &slot);
        sup.on_session_entry().await.unwrap();

        assert_eq!(sup.active_track().unwrap().track_id, "TR_cam");
        assert_eq!(room.active_subscriptions(), 1);
        assert_eq!(room.subscriptions_for("TR_cam"), 1);
    }

    #[tokio::test]
    async fn test_replacement_stops_old_before_new_writes() {
        let room = LocalRoom::new("sup");
        let slot = Arc::new(FrameSlot::new());
        let a = room.publish(TrackHandle::video("TR_a", "camera", "alice"));
        let mut sup = supervisor(&room, &slot);
        sup.on_session_entry().await.unwrap();

        a.send(frame(1));
        wait_for_generation(&slot, 1).await;

        let b = room.publish(TrackHandle::video("TR_b", "camera", "bob"));
        sup.on_track_available(b.track().clone()).await.unwrap();

        assert_eq!(sup.active_track().unwrap().track_id, "TR_b");
        assert_eq!(room.subscriptions_for("TR_a"), 0);
        assert_eq!(room.subscriptions_for("TR_b"), 1);
        // A can no longer reach the slot.
        assert_eq!(a.send(frame(2)), 0);

        b.send(frame(3));
        wait_for_generation(&slot, 2).await;
        assert_eq!(slot.read().unwrap().frame.data[0], 3);
    }

    #[tokio::test]
    async fn test_non_video_and_duplicate_tracks_ignored() {
        let room = LocalRoom::new("sup");
        let slot = Arc::new(FrameSlot::new());
        let cam = room.publish(TrackHandle::video("TR_cam", "camera", "alice"));
        let mut sup = supervisor(&room, &slot);
        sup.on_session_entry().await.unwrap();
        let ingest_owner = slot.writer();

        sup.on_track_available(cam.track().clone()).await.unwrap();
        sup.on_track_available(TrackHandle {
            track_id: "TR_mic".into(),
            track_name: "microphone".into(),
            kind: TrackKind::Audio,
            participant: "alice".into(),
        })
        .await
        .unwrap();

        assert_eq!(slot.writer(), ingest_owner);
        assert_eq!(room.active_subscriptions(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_track_goes_idle_and_keeps_frame() {
        let room = LocalRoom::new("sup");
        let slot = Arc::new(FrameSlot::new());
        let cam = room.publish(TrackHandle::video("TR_cam", "camera", "alice"));
        let mut sup = supervisor(&room, &slot);
        sup.on_session_entry().await.unwrap();

        cam.send(frame(5));
        wait_for_generation(&slot, 1).await;

        sup.on_track_unavailable("TR_other").await.unwrap();
        assert!(sup.is_active());

        sup.on_track_unavailable("TR_cam").await.unwrap();
        assert!(!sup.is_active());
        assert_eq!(slot.read().unwrap().frame.data[0], 5);
        assert_eq!(room.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_ingest_and_clears_slot() {
        let room = LocalRoom::new("sup");
        let slot = Arc::new(FrameSlot::new());
        let cam = room.publish(TrackHandle::video("TR_cam", "camera", "alice"));
        let mut sup = supervisor(&room, &slot);
        sup.on_session_entry().await.unwrap();
        cam.send(frame(1));
        wait_for_generation(&slot, 1).await;

        let report = sup.shutdown().await.unwrap().unwrap();
        assert_eq!(report.exit, crate::ingest::IngestExit::Cancelled);
        assert!(slot.is_empty());
        assert!(slot.writer().is_none());
        assert_eq!(room.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_watcher_serializes_back_to_back_replacements() {
        let room = LocalRoom::new("sup");
        let slot = Arc::new(FrameSlot::new());
        let sup = supervisor(&room, &slot);
        let events = room.track_events().await.unwrap();
        let cancel = CancellationToken::new();
        let watcher = spawn_watcher(sup, events, cancel.clone());

        let publishers: Vec<_> = (0..5)
            .map(|i| room.publish(TrackHandle::video(&format!("TR_{i}"), "camera", "alice")))
            .collect();

        tokio::time::timeout(Duration::from_secs(5), async {
            while room.subscriptions_for("TR_4") == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        // Only the last track is still subscribed.
        assert_eq!(room.active_subscriptions(), 1);
        for earlier in &publishers[..4] {
            assert_eq!(earlier.send(frame(0)), 0);
        }
        assert_eq!(publishers[4].send(frame(4)), 1);
        wait_for_generation(&slot, 1).await;

        cancel.cancel();
        let report = watcher.await.unwrap().unwrap().unwrap();
        assert_eq!(report.track_id, "TR_4");
        assert!(slot.is_empty());
        assert_eq!(room.active_subscriptions(), 0);
    }
}
