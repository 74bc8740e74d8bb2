//! Local simulation of a full session against an in-process room with synthetic frames.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use blindsight_agent::{ConversationEngine, TurnHook, VisionSession};
use blindsight_core::config::Config;
use blindsight_core::error::Result;
use blindsight_core::types::{Frame, PixelFormat, TrackHandle, TurnContent, TurnMessage};
use blindsight_media::{LocalRoom, TrackPublisher};

const FRAME_WIDTH: u32 = 64;
const FRAME_HEIGHT: u32 = 48;

pub struct SimulateOptions {
    pub fps: u32,
    pub turns: u32,
    pub turn_interval: Duration,
    /// Publish a second video track right before this turn.
    pub swap_before_turn: Option<u32>,
    /// Publish the camera only after the session has started.
    pub late_join: bool,
}

/// Stands in for the speech pipeline: prints replies, runs turns on request.
#[derive(Default)]
struct ConsoleEngine {
    hook: Mutex<Option<Arc<dyn TurnHook>>>,
}

impl ConsoleEngine {
    fn complete_turn(&self, text: &str) -> Option<TurnMessage> {
        let hook = self.hook.lock().unwrap_or_else(|e| e.into_inner()).clone()?;
        let mut message = TurnMessage::user(text);
        hook.on_user_turn_completed(&mut message);
        Some(message)
    }
}

#[async_trait]
impl ConversationEngine for ConsoleEngine {
    async fn start(&self, instructions: &str, hook: Arc<dyn TurnHook>) -> Result<()> {
        *self.hook.lock().unwrap_or_else(|e| e.into_inner()) = Some(hook);
        info!(instruction_chars = instructions.len(), "Conversation started");
        Ok(())
    }

    async fn generate_reply(&self, instructions: &str) -> Result<()> {
        println!("assistant> [reply to: {instructions}]");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.hook.lock().unwrap_or_else(|e| e.into_inner()).take();
        info!("Conversation closed");
        Ok(())
    }
}

/// Publish synthetic frames on `publisher` at `fps` until `stop` fires.
fn spawn_producer(publisher: TrackPublisher, fps: u32, stop: CancellationToken) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(fps.max(1))));
        let mut sent: u64 = 0;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    sent += 1;
                    let luma = (sent % 256) as u8;
                    let len = (FRAME_WIDTH * FRAME_HEIGHT * 3 / 2) as usize;
                    publisher.send(Frame::new(FRAME_WIDTH, FRAME_HEIGHT, PixelFormat::I420, vec![luma; len]));
                }
            }
        }
        sent
    })
}

fn print_turn(turn: u32, message: &TurnMessage) {
    for item in &message.content {
        match item {
            TurnContent::Text { text } => println!("user> {text}"),
            TurnContent::Frame { frame } => println!(
                "  [turn {turn}] frame {}x{} {:?}, {} bytes, captured {}",
                frame.width,
                frame.height,
                frame.format,
                frame.byte_len(),
                frame.captured_at.format("%H:%M:%S%.3f")
            ),
            TurnContent::Notice { text } => println!("  [turn {turn}] notice: {text}"),
        }
    }
}

pub async fn run(config: &Config, opts: SimulateOptions) -> anyhow::Result<()> {
    let room = LocalRoom::new("simulated-room");
    let camera = TrackHandle::video("TR_camera", "camera", "user");
    let stop = CancellationToken::new();
    let mut producers = Vec::new();

    if !opts.late_join {
        producers.push(spawn_producer(room.publish(camera.clone()), opts.fps, stop.clone()));
    }

    let engine = Arc::new(ConsoleEngine::default());
    let mut session = VisionSession::start(Arc::new(room.clone()), engine.clone(), config).await?;

    if opts.late_join {
        producers.push(spawn_producer(room.publish(camera), opts.fps, stop.clone()));
    }

    let script = async {
        for turn in 1..=opts.turns {
            tokio::time::sleep(opts.turn_interval).await;
            if opts.swap_before_turn == Some(turn) {
                info!("Switching to a second video track");
                let screen = TrackHandle::video("TR_screen", "screen", "user-2");
                producers.push(spawn_producer(room.publish(screen), opts.fps, stop.clone()));
            }
            if let Some(message) = engine.complete_turn(&format!("Turn {turn}: what do you see?")) {
                print_turn(turn, &message);
            }
        }
    };

    let outcome = tokio::select! {
        result = session.closed() => result.map_err(anyhow::Error::from),
        _ = script => Ok(()),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    };

    stop.cancel();
    let mut frames_sent = 0;
    for producer in producers {
        frames_sent += producer.await.unwrap_or(0);
    }

    let report = session.shutdown().await?;
    println!("frames published: {frames_sent}");
    if let Some(report) = report {
        println!(
            "last ingest: track {} ingested {} frames ({:?})",
            report.track_id, report.frames, report.exit
        );
    }
    outcome
}
