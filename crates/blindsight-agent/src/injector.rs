//! Turn injector — attaches the slot's frame, or a fallback notice, to each user turn.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use blindsight_core::config::VisionConfig;
use blindsight_core::types::{TurnContent, TurnMessage};
use blindsight_media::FrameSlot;

use crate::engine::TurnHook;

/// Notice appended when no frame can be attached.
pub const DEFAULT_FALLBACK_NOTICE: &str = "[SYSTEM: No camera frame is available for this turn. \
The user's video feed is not streaming right now. Tell the user you cannot see their camera at \
the moment instead of describing a scene.]";

/// Why a turn got the fallback notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// Nothing in the slot.
    NoFrame,
    /// The held frame is older than the staleness limit.
    Stale { age: Duration },
}

/// What was appended to a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectOutcome {
    Attached { generation: u64, reused: bool },
    Fallback { reason: FallbackReason },
}

pub struct TurnInjector {
    slot: Arc<FrameSlot>,
    stale_after: Option<Duration>,
    notice: String,
    // Generation attached on the previous turn, 0 when none.
    last_generation: AtomicU64,
}

impl TurnInjector {
    pub fn new(slot: Arc<FrameSlot>) -> Self {
        Self {
            slot,
            stale_after: None,
            notice: DEFAULT_FALLBACK_NOTICE.to_string(),
            last_generation: AtomicU64::new(0),
        }
    }

    pub fn from_config(slot: Arc<FrameSlot>, vision: &VisionConfig) -> Self {
        let notice = vision
            .fallback_notice
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(DEFAULT_FALLBACK_NOTICE)
            .to_string();
        Self {
            stale_after: vision.stale_after_ms.map(Duration::from_millis),
            notice,
            ..Self::new(slot)
        }
    }

    /// Append exactly one item to `message`: the latest frame, or the fallback notice.
    pub fn inject(&self, message: &mut TurnMessage) -> InjectOutcome {
        let reason = match self.slot.read() {
            Some(held) => {
                let age = held.written_at.elapsed();
                match self.stale_after {
                    Some(limit) if age > limit => FallbackReason::Stale { age },
                    _ => {
                        let previous = self.last_generation.swap(held.generation, Ordering::AcqRel);
                        let reused = previous == held.generation;
                        message.push(TurnContent::Frame { frame: held.frame });
                        if reused {
                            debug!(generation = held.generation, "Reattaching unchanged video frame");
                        } else {
                            info!(generation = held.generation, "Attaching latest video frame to user message");
                        }
                        return InjectOutcome::Attached {
                            generation: held.generation,
                            reused,
                        };
                    }
                }
            }
            None => FallbackReason::NoFrame,
        };

        self.last_generation.store(0, Ordering::Release);
        message.push(TurnContent::Notice {
            text: self.notice.clone(),
        });
        warn!(?reason, "No video frame available, adding fallback notice");
        InjectOutcome::Fallback { reason }
    }
}

impl TurnHook for TurnInjector {
    fn on_user_turn_completed(&self, message: &mut TurnMessage) {
        self.inject(message);
    }
}
