//! Video ingest pipeline — latest-frame slot, per-track ingest, track supervision.
//!
//! A [`TrackSupervisor`] keeps at most one [`StreamIngest`] running against the
//! room's active video track. The ingest writes every arriving frame into a
//! shared [`FrameSlot`], which the turn path reads on demand.

pub mod frame_slot;
pub mod ingest;
pub mod local;
pub mod room;
pub mod supervisor;

pub use frame_slot::{FrameSlot, SlotFrame, SlotWriter};
pub use ingest::{IngestExit, IngestReport, IngestTask, StreamIngest};
pub use local::{LocalRoom, TrackPublisher};
pub use room::{FrameStream, FrameSubscription, MediaRoom, TrackEvent, TrackEventReceiver};
pub use supervisor::{spawn_watcher, TrackSupervisor};
