//! Vision session — wires a media room, the frame ingest, and a conversation engine.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use blindsight_core::config::Config;
use blindsight_core::error::Result;
use blindsight_media::supervisor::watcher_join_error;
use blindsight_media::{FrameSlot, IngestReport, MediaRoom, TrackSupervisor, spawn_watcher};

use crate::engine::{ConversationEngine, TurnHook};
use crate::injector::TurnInjector;
use crate::prompt::{build_instructions, greeting_instructions};

/// One conversation with one room.
///
/// Dropping the session cancels the background ingest without waiting for it;
/// call [`VisionSession::shutdown`] for an orderly teardown.
pub struct VisionSession {
    room_name: String,
    slot: Arc<FrameSlot>,
    injector: Arc<TurnInjector>,
    engine: Arc<dyn ConversationEngine>,
    cancel: CancellationToken,
    watcher: Option<JoinHandle<Result<Option<IngestReport>>>>,
}

impl VisionSession {
    /// Enter the room, start ingesting any existing video track, and start the conversation.
    pub async fn start(
        room: Arc<dyn MediaRoom>,
        engine: Arc<dyn ConversationEngine>,
        config: &Config,
    ) -> Result<Self> {
        let vision = config.vision();
        let slot = Arc::new(FrameSlot::new());
        info!(room = room.name(), agent = %config.agent_name(), "Starting vision session");

        // Listen first so a track published during the entry scan is not missed.
        let events = room.track_events().await?;
        let mut supervisor = TrackSupervisor::new(room.clone(), slot.clone(), &vision);
        if let Err(e) = supervisor.on_session_entry().await {
            let _ = supervisor.shutdown().await;
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let watcher = spawn_watcher(supervisor, events, cancel.clone());

        let mut session = Self {
            room_name: room.name().to_string(),
            injector: Arc::new(TurnInjector::from_config(slot.clone(), &vision)),
            slot,
            engine,
            cancel,
            watcher: Some(watcher),
        };

        if let Err(e) = session.begin_conversation(config).await {
            error!(%e, "Conversation engine failed to start");
            let _ = session.shutdown().await;
            return Err(e);
        }

        info!(room = %session.room_name, "Vision session started");
        Ok(session)
    }

    async fn begin_conversation(&self, config: &Config) -> Result<()> {
        let hook: Arc<dyn TurnHook> = self.injector.clone();
        self.engine.start(&build_instructions(config), hook).await?;
        self.engine
            .generate_reply(&greeting_instructions(config))
            .await
    }

    pub fn room_name(&self) -> &str {
        &self.room_name
    }

    pub fn slot(&self) -> &Arc<FrameSlot> {
        &self.slot
    }

    pub fn injector(&self) -> &Arc<TurnInjector> {
        &self.injector
    }

    /// Whether the background track watcher is still running.
    pub fn is_running(&self) -> bool {
        self.watcher.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Resolve when the track watcher ends on its own, which only happens on a
    /// session-fatal fault. The caller should then [`shutdown`](Self::shutdown).
    pub async fn closed(&mut self) -> Result<()> {
        let Some(watcher) = self.watcher.as_mut() else {
            return Ok(());
        };
        let result = watcher.await.map_err(watcher_join_error).and_then(|r| r);
        self.watcher = None;
        if let Err(e) = &result {
            error!(room = %self.room_name, %e, "Vision session aborted");
        }
        result.map(|_| ())
    }

    /// Stop the ingest, clear the frame slot, and close the conversation.
    pub async fn shutdown(&mut self) -> Result<Option<IngestReport>> {
        self.cancel.cancel();
        let report = match self.watcher.take() {
            Some(watcher) => watcher.await.map_err(watcher_join_error).and_then(|r| r),
            None => Ok(None),
        };

        if let Err(e) = self.engine.close().await {
            warn!(%e, "Conversation engine did not close cleanly");
        }
        self.slot.clear();
        info!(room = %self.room_name, "Vision session ended");
        report
    }
}

impl Drop for VisionSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
