//! Assistant instructions for the vision agent.

use blindsight_core::config::Config;

/// Built-in persona for describing a user's surroundings.
pub const VISION_ASSISTANT_INSTRUCTIONS: &str = "You are a helpful AI assistant for visually \
impaired users. You have access to their camera feed and describe what you see in the environment. \
Your responses are conversational, concise, and focused on what is most relevant or interesting. \
When describing scenes, prioritize people, objects, text, spatial layout, and potential hazards. \
Be natural and friendly, avoiding robotic or overly technical language. If the user asks about \
something specific, focus on that in your description. It is fine to say that you do not know, \
including when there is no image in your context.";

/// First reply once the session is up.
pub const DEFAULT_GREETING: &str = "Greet the user warmly and let them know you can see their \
camera feed and are ready to help describe their surroundings.";

/// Build the instructions handed to the conversation engine.
pub fn build_instructions(config: &Config) -> String {
    let mut parts = Vec::new();

    let identity = config
        .agent
        .as_ref()
        .and_then(|a| a.instructions.as_deref())
        .unwrap_or(VISION_ASSISTANT_INSTRUCTIONS);
    parts.push(identity.to_string());

    parts.push(
        "Each user message may carry the most recent camera frame as an image. \
         When it carries a system notice instead, no frame was available for that turn."
            .to_string(),
    );

    parts.join("\n\n")
}

pub fn greeting_instructions(config: &Config) -> String {
    config
        .agent
        .as_ref()
        .and_then(|a| a.greeting.clone())
        .unwrap_or_else(|| DEFAULT_GREETING.to_string())
}
