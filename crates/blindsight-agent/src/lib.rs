//! Vision assistant — attaches the latest camera frame to each user turn.
//!
//! A [`VisionSession`] wires a media room to a conversation engine: the room's
//! video track is ingested into a frame slot in the background, and the
//! [`TurnInjector`] reads that slot each time the user finishes speaking.

pub mod engine;
pub mod injector;
pub mod prompt;
pub mod session;

pub use engine::{ConversationEngine, TurnHook};
pub use injector::{FallbackReason, InjectOutcome, TurnInjector};
pub use session::VisionSession;
