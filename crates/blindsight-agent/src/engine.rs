//! Conversation engine interface.
//!
//! Speech recognition, the response model and speech synthesis live behind
//! [`ConversationEngine`]. The bridge only needs to hook into the moment a
//! user turn is complete and to ask for an unprompted reply.

use std::sync::Arc;

use async_trait::async_trait;

use blindsight_core::error::Result;
use blindsight_core::types::TurnMessage;

/// Called by the engine once per completed user turn, before the response
/// model sees the message. Must not block.
pub trait TurnHook: Send + Sync {
    fn on_user_turn_completed(&self, message: &mut TurnMessage);
}

#[async_trait]
pub trait ConversationEngine: Send + Sync {
    /// Begin the conversation with the given assistant instructions.
    async fn start(&self, instructions: &str, hook: Arc<dyn TurnHook>) -> Result<()>;

    /// Produce a reply without waiting for user speech.
    async fn generate_reply(&self, instructions: &str) -> Result<()>;

    /// End the conversation.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
