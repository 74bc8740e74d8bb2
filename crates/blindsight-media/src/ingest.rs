//! Stream ingest — consumes one track's frames into a [`FrameSlot`].

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use blindsight_core::error::{BlindsightError, Result};
use blindsight_core::types::TrackHandle;

use crate::frame_slot::{FrameSlot, SlotWriter};
use crate::room::{FrameSubscription, MediaRoom};

/// Why an ingest loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestExit {
    /// Stopped on request.
    Cancelled,
    /// The frame stream closed (track unpublished or connection lost).
    TrackEnded,
    /// The frame stream yielded an error.
    SourceError(String),
    /// The ingest task itself failed.
    Failed(String),
}

/// Summary of a finished ingest.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub ingest_id: String,
    pub track_id: String,
    pub frames: u64,
    pub exit: IngestExit,
}

/// Binds one track to one frame slot.
pub struct StreamIngest {
    track: TrackHandle,
    slot: Arc<FrameSlot>,
    room: Arc<dyn MediaRoom>,
    progress_log_every: u64,
}

impl StreamIngest {
    pub fn new(track: TrackHandle, slot: Arc<FrameSlot>, room: Arc<dyn MediaRoom>) -> Self {
        Self {
            track,
            slot,
            room,
            progress_log_every: 100,
        }
    }

    /// Log progress every `n` frames; 0 disables progress logs.
    pub fn with_progress_log_every(mut self, n: u64) -> Self {
        self.progress_log_every = n;
        self
    }

    /// Claim the slot, subscribe to the track, and start consuming frames.
    ///
    /// Fails with [`BlindsightError::ConcurrentWriter`] if another ingest
    /// still owns the slot; nothing is subscribed in that case.
    pub async fn start(self) -> Result<IngestTask> {
        let ingest_id = format!("ingest-{}", uuid::Uuid::new_v4());
        let writer = self.slot.claim_writer(&ingest_id)?;
        let subscription = self.room.subscribe(&self.track).await?;

        let cancel = CancellationToken::new();
        let consumer = IngestLoop {
            ingest_id: ingest_id.clone(),
            track: self.track.clone(),
            writer,
            room: self.room,
            cancel: cancel.clone(),
            progress_log_every: self.progress_log_every,
        };

        info!(
            ingest_id = %ingest_id,
            track_id = %self.track.track_id,
            participant = %self.track.participant,
            "Started video frame ingest"
        );
        let join = tokio::spawn(consumer.run(subscription));

        Ok(IngestTask {
            id: ingest_id,
            track: self.track,
            cancel,
            join: Some(join),
            report: None,
            timed_out_after: None,
        })
    }
}

struct IngestLoop {
    ingest_id: String,
    track: TrackHandle,
    writer: SlotWriter,
    room: Arc<dyn MediaRoom>,
    cancel: CancellationToken,
    progress_log_every: u64,
}

impl IngestLoop {
    async fn run(self, subscription: FrameSubscription) -> IngestReport {
        let FrameSubscription {
            id: subscription_id,
            mut frames,
        } = subscription;
        let mut count: u64 = 0;

        let exit = loop {
            tokio::select! {
                // Cancellation wins over a ready frame.
                biased;
                _ = self.cancel.cancelled() => break IngestExit::Cancelled,
                next = frames.next() => match next {
                    Some(Ok(frame)) => {
                        let generation = self.writer.write(Arc::new(frame));
                        count += 1;
                        if self.progress_log_every > 0 && count % self.progress_log_every == 0 {
                            debug!(
                                track = %self.track.track_name,
                                frames = count,
                                generation,
                                "Buffered video frame"
                            );
                        }
                    }
                    Some(Err(e)) => {
                        warn!(track_id = %self.track.track_id, %e, "Frame source error, ending ingest");
                        break IngestExit::SourceError(e.to_string());
                    }
                    None => {
                        info!(track_id = %self.track.track_id, frames = count, "Frame stream ended");
                        break IngestExit::TrackEnded;
                    }
                },
            }
        };

        // No write can happen past this point.
        drop(frames);
        drop(self.writer);

        if let Err(e) = self.room.unsubscribe(&subscription_id).await {
            warn!(subscription = %subscription_id, %e, "Failed to release frame subscription");
        }

        debug!(ingest_id = %self.ingest_id, frames = count, ?exit, "Ingest terminated");
        IngestReport {
            ingest_id: self.ingest_id,
            track_id: self.track.track_id,
            frames: count,
            exit,
        }
    }
}

/// Handle to a running ingest.
///
/// Dropping the handle requests cancellation but does not wait for it.
pub struct IngestTask {
    id: String,
    track: TrackHandle,
    cancel: CancellationToken,
    join: Option<JoinHandle<IngestReport>>,
    report: Option<IngestReport>,
    timed_out_after: Option<u64>,
}

impl IngestTask {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn track(&self) -> &TrackHandle {
        &self.track
    }

    /// Whether the consumption loop has exited.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }

    /// Cancel the loop and wait until it has exited and unsubscribed.
    ///
    /// Idempotent: later calls return the same report. If the loop does not
    /// confirm within `timeout` the task is aborted and
    /// [`BlindsightError::CancellationTimeout`] is returned.
    pub async fn stop(&mut self, timeout: Duration) -> Result<IngestReport> {
        if let Some(report) = &self.report {
            return Ok(report.clone());
        }
        if let Some(waited_ms) = self.timed_out_after {
            return Err(self.timeout_error(waited_ms));
        }

        self.cancel.cancel();
        let Some(join) = self.join.as_mut() else {
            return Err(BlindsightError::Ingest(format!(
                "Ingest {} has no task to stop",
                self.id
            )));
        };

        let report = match tokio::time::timeout(timeout, join).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                error!(ingest_id = %self.id, %e, "Ingest task failed");
                IngestReport {
                    ingest_id: self.id.clone(),
                    track_id: self.track.track_id.clone(),
                    frames: 0,
                    exit: IngestExit::Failed(e.to_string()),
                }
            }
            Err(_) => {
                let waited_ms = timeout.as_millis() as u64;
                error!(
                    ingest_id = %self.id,
                    track_id = %self.track.track_id,
                    waited_ms,
                    "Ingest did not confirm cancellation"
                );
                if let Some(join) = self.join.take() {
                    join.abort();
                }
                self.timed_out_after = Some(waited_ms);
                return Err(self.timeout_error(waited_ms));
            }
        };

        self.join = None;
        self.report = Some(report.clone());
        Ok(report)
    }

    fn timeout_error(&self, waited_ms: u64) -> BlindsightError {
        BlindsightError::CancellationTimeout {
            track_id: self.track.track_id.clone(),
            waited_ms,
        }
    }
}

impl Drop for IngestTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
