//! Session tests — drive a full vision session against an in-process room.
//!
//! Run with: `cargo test -p blindsight-agent --test session`

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use blindsight_agent::{ConversationEngine, TurnHook, VisionSession};
use blindsight_core::config::{AgentConfig, Config, VisionConfig};
use blindsight_core::error::{BlindsightError, Result};
use blindsight_core::types::{Frame, Participant, PixelFormat, TrackHandle, TurnMessage};
use blindsight_media::{FrameSlot, FrameSubscription, LocalRoom, MediaRoom, TrackEventReceiver};

/// Engine that records what the session asks of it and runs turns on demand.
#[derive(Default)]
struct ScriptedEngine {
    hook: Mutex<Option<Arc<dyn TurnHook>>>,
    instructions: Mutex<Option<String>>,
    replies: Mutex<Vec<String>>,
    closed: Mutex<bool>,
}

impl ScriptedEngine {
    fn turn(&self, text: &str) -> TurnMessage {
        let hook = self
            .hook
            .lock()
            .unwrap()
            .clone()
            .expect("engine not started");
        let mut message = TurnMessage::user(text);
        hook.on_user_turn_completed(&mut message);
        message
    }
}

#[async_trait]
impl ConversationEngine for ScriptedEngine {
    async fn start(&self, instructions: &str, hook: Arc<dyn TurnHook>) -> Result<()> {
        *self.instructions.lock().unwrap() = Some(instructions.to_string());
        *self.hook.lock().unwrap() = Some(hook);
        Ok(())
    }

    async fn generate_reply(&self, instructions: &str) -> Result<()> {
        self.replies.lock().unwrap().push(instructions.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

fn frame(tag: u8) -> Frame {
    Frame::new(4, 4, PixelFormat::I420, vec![tag; 24])
}

fn attached_tag(message: &TurnMessage) -> Option<u8> {
    let frames: Vec<_> = message.frames().collect();
    assert!(frames.len() <= 1, "more than one frame attached");
    frames.first().map(|f| f.data[0])
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

async fn wait_for_generation(slot: &FrameSlot, generation: u64) {
    wait_until("slot generation", || slot.generation() >= generation).await;
}

async fn start(room: &LocalRoom, engine: &Arc<ScriptedEngine>, config: &Config) -> VisionSession {
    VisionSession::start(Arc::new(room.clone()), engine.clone(), config)
        .await
        .expect("session start")
}

#[tokio::test]
async fn test_turn_gets_frame_current_at_turn_time() {
    let room = LocalRoom::new("living-room");
    let cam = room.publish(TrackHandle::video("TR_a", "camera", "alice"));
    let engine = Arc::new(ScriptedEngine::default());
    let mut session = start(&room, &engine, &Config::default()).await;

    for tag in 1..=3 {
        cam.send(frame(tag));
    }
    wait_for_generation(session.slot(), 3).await;
    let turn = engine.turn("what is in front of me?");

    for tag in 4..=5 {
        cam.send(frame(tag));
    }

    assert_eq!(attached_tag(&turn), Some(3));
    assert_eq!(turn.notices().count(), 0);
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_no_track_yields_fallback_notice() {
    let room = LocalRoom::new("empty-room");
    let engine = Arc::new(ScriptedEngine::default());
    let mut session = start(&room, &engine, &Config::default()).await;

    let turn = engine.turn("can you see me?");

    assert_eq!(attached_tag(&turn), None);
    assert_eq!(turn.notices().count(), 1);
    assert!(session.shutdown().await.unwrap().is_none());
}

#[tokio::test]
async fn test_replacement_only_shows_new_track() {
    let room = LocalRoom::new("living-room");
    let a = room.publish(TrackHandle::video("TR_a", "camera", "alice"));
    let engine = Arc::new(ScriptedEngine::default());
    let mut session = start(&room, &engine, &Config::default()).await;

    a.send(frame(1));
    wait_for_generation(session.slot(), 1).await;
    assert_eq!(attached_tag(&engine.turn("before")), Some(1));

    let b = room.publish(TrackHandle::video("TR_b", "camera", "bob"));
    wait_until("switch to TR_b", || {
        room.subscriptions_for("TR_b") == 1 && room.subscriptions_for("TR_a") == 0
    })
    .await;

    // Old track frames no longer reach the session.
    assert_eq!(a.send(frame(2)), 0);
    b.send(frame(20));
    wait_for_generation(session.slot(), 2).await;

    for text in ["after", "again"] {
        assert_eq!(attached_tag(&engine.turn(text)), Some(20));
    }
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_late_track_is_picked_up() {
    let room = LocalRoom::new("hallway");
    let engine = Arc::new(ScriptedEngine::default());
    let mut session = start(&room, &engine, &Config::default()).await;
    assert_eq!(attached_tag(&engine.turn("anyone?")), None);

    let cam = room.publish(TrackHandle::video("TR_late", "camera", "carol"));
    wait_until("late subscription", || room.subscriptions_for("TR_late") == 1).await;
    cam.send(frame(7));
    wait_for_generation(session.slot(), 1).await;

    assert_eq!(attached_tag(&engine.turn("now?")), Some(7));
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_track_loss_keeps_last_frame() {
    let room = LocalRoom::new("kitchen");
    let cam = room.publish(TrackHandle::video("TR_a", "camera", "alice"));
    let engine = Arc::new(ScriptedEngine::default());
    let mut session = start(&room, &engine, &Config::default()).await;

    cam.send(frame(5));
    wait_for_generation(session.slot(), 1).await;
    cam.unpublish();
    wait_until("subscription release", || room.active_subscriptions() == 0).await;

    assert_eq!(attached_tag(&engine.turn("still there?")), Some(5));
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_ingest_and_clears_slot() {
    let room = LocalRoom::new("office");
    let cam = room.publish(TrackHandle::video("TR_a", "camera", "alice"));
    let engine = Arc::new(ScriptedEngine::default());
    let mut session = start(&room, &engine, &Config::default()).await;

    cam.send(frame(1));
    wait_for_generation(session.slot(), 1).await;

    let report = session.shutdown().await.unwrap().expect("active ingest report");
    assert_eq!(report.track_id, "TR_a");
    assert_eq!(report.exit, blindsight_media::IngestExit::Cancelled);
    assert!(session.slot().is_empty());
    assert!(!session.is_running());
    assert_eq!(room.active_subscriptions(), 0);
    assert!(*engine.closed.lock().unwrap());

    // Turns after teardown fall back rather than seeing a frame from a dead stream.
    assert_eq!(attached_tag(&engine.turn("bye")), None);
}

#[tokio::test]
async fn test_engine_receives_instructions_and_greeting() {
    let room = LocalRoom::new("lobby");
    let engine = Arc::new(ScriptedEngine::default());
    let config = Config {
        agent: Some(AgentConfig {
            name: Some("front-desk".into()),
            instructions: None,
            greeting: Some("Say 'blindsight connected'.".into()),
        }),
        ..Config::default()
    };
    let mut session = start(&room, &engine, &config).await;

    let instructions = engine.instructions.lock().unwrap().clone().unwrap();
    assert!(instructions.contains("visually impaired"));
    assert_eq!(
        *engine.replies.lock().unwrap(),
        vec!["Say 'blindsight connected'.".to_string()]
    );
    session.shutdown().await.unwrap();
}

/// Room whose unsubscribe never completes, so ingests can never confirm stopping.
struct StuckRoom(LocalRoom);

#[async_trait]
impl MediaRoom for StuckRoom {
    fn name(&self) -> &str {
        self.0.name()
    }
    async fn remote_participants(&self) -> Vec<Participant> {
        self.0.remote_participants().await
    }
    async fn track_events(&self) -> Result<TrackEventReceiver> {
        self.0.track_events().await
    }
    async fn subscribe(&self, track: &TrackHandle) -> Result<FrameSubscription> {
        self.0.subscribe(track).await
    }
    async fn unsubscribe(&self, _subscription_id: &str) -> Result<()> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_stop_aborts_session() {
    let room = LocalRoom::new("stuck");
    room.publish(TrackHandle::video("TR_a", "camera", "alice"));
    let engine = Arc::new(ScriptedEngine::default());
    let config = Config {
        vision: Some(VisionConfig {
            stop_timeout_ms: 100,
            ..VisionConfig::default()
        }),
        ..Config::default()
    };
    let mut session = VisionSession::start(Arc::new(StuckRoom(room.clone())), engine.clone(), &config)
        .await
        .unwrap();

    room.publish(TrackHandle::video("TR_b", "camera", "bob"));

    let err = session.closed().await.unwrap_err();
    assert!(matches!(
        err,
        BlindsightError::CancellationTimeout { ref track_id, waited_ms: 100 } if track_id == "TR_a"
    ));
    assert!(!session.is_running());

    session.shutdown().await.unwrap();
    assert!(session.slot().is_empty());
    assert!(*engine.closed.lock().unwrap());
}
