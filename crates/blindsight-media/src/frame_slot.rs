//! Latest-frame slot — a single-entry, overwrite-on-write frame holder.
//!
//! Writes swap in a whole new snapshot, so a reader always sees either the
//! previous or the next frame, never a half-written one. Older frames are not
//! queued; they are released as soon as the last reader drops them.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use tokio::time::Instant;
use tracing::trace;

use blindsight_core::error::{BlindsightError, Result};
use blindsight_core::types::Frame;

/// A frame as stored in the slot.
#[derive(Debug, Clone)]
pub struct SlotFrame {
    pub frame: Arc<Frame>,
    /// Increases by one with every write; never reused, not even after `clear`.
    pub generation: u64,
    pub written_at: Instant,
}

#[derive(Debug, Default)]
struct SlotState {
    generation: u64,
    current: Option<SlotFrame>,
}

/// Holds the most recently observed frame.
#[derive(Debug, Default)]
pub struct FrameSlot {
    state: ArcSwap<SlotState>,
    writer: Mutex<Option<String>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held frame. Returns the generation assigned to it.
    pub fn write(&self, frame: Arc<Frame>) -> u64 {
        let now = Instant::now();
        let previous = self.state.rcu(|prev| {
            let generation = prev.generation + 1;
            Arc::new(SlotState {
                generation,
                current: Some(SlotFrame {
                    frame: frame.clone(),
                    generation,
                    written_at: now,
                }),
            })
        });
        let generation = previous.generation + 1;
        trace!(generation, "Frame slot written");
        generation
    }

    /// The most recently written frame, or `None` if the slot is empty.
    pub fn read(&self) -> Option<SlotFrame> {
        self.state.load().current.clone()
    }

    /// Reset to empty. The generation counter keeps counting.
    pub fn clear(&self) {
        self.state.rcu(|prev| {
            Arc::new(SlotState {
                generation: prev.generation,
                current: None,
            })
        });
    }

    pub fn is_empty(&self) -> bool {
        self.state.load().current.is_none()
    }

    /// Generation of the last write, 0 if nothing was ever written.
    pub fn generation(&self) -> u64 {
        self.state.load().generation
    }

    /// Claim exclusive write access for `owner`.
    ///
    /// Fails with [`BlindsightError::ConcurrentWriter`] while another writer
    /// holds the claim. The claim is released when the returned writer drops.
    pub fn claim_writer(self: &Arc<Self>, owner: &str) -> Result<SlotWriter> {
        let mut holder = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = holder.as_ref() {
            return Err(BlindsightError::ConcurrentWriter {
                holder: current.clone(),
                contender: owner.to_string(),
            });
        }
        *holder = Some(owner.to_string());
        Ok(SlotWriter {
            slot: self.clone(),
            owner: owner.to_string(),
        })
    }

    /// Current writer, if one holds the claim.
    pub fn writer(&self) -> Option<String> {
        self.writer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Exclusive write access to a [`FrameSlot`].
#[derive(Debug)]
pub struct SlotWriter {
    slot: Arc<FrameSlot>,
    owner: String,
}

impl SlotWriter {
    pub fn write(&self, frame: Arc<Frame>) -> u64 {
        self.slot.write(frame)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

impl Drop for SlotWriter {
    fn drop(&mut self) {
        let mut holder = self.slot.writer.lock().unwrap_or_else(|e| e.into_inner());
        if holder.as_deref() == Some(self.owner.as_str()) {
            *holder = None;
        }
    }
}
