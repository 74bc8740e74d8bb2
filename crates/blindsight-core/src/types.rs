use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pixel layout of a decoded frame buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    #[default]
    I420,
    Nv12,
    Rgba,
    Bgra,
}

/// A decoded video frame as delivered by the room service.
///
/// The bridge never inspects the pixel data; it only moves frames around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    /// Create a frame stamped with the current time.
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            data,
            captured_at: Utc::now(),
        }
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// Media kind of a published track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Identifies one subscribed track and the participant that published it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackHandle {
    pub track_id: String,
    pub track_name: String,
    pub kind: TrackKind,
    pub participant: String,
}

impl TrackHandle {
    pub fn video(track_id: &str, track_name: &str, participant: &str) -> Self {
        Self {
            track_id: track_id.to_string(),
            track_name: track_name.to_string(),
            kind: TrackKind::Video,
            participant: participant.to_string(),
        }
    }

    pub fn is_video(&self) -> bool {
        self.kind == TrackKind::Video
    }
}

/// A remote participant and the tracks it currently publishes, in publication order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub identity: String,
    pub tracks: Vec<TrackHandle>,
}

impl Participant {
    /// The first published video track, if any.
    pub fn first_video_track(&self) -> Option<&TrackHandle> {
        self.tracks.iter().find(|t| t.is_video())
    }
}

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One content item of a turn message.
#[derive(Debug, Clone)]
pub enum TurnContent {
    /// Transcribed speech.
    Text { text: String },
    /// Visual context for the response model.
    Frame { frame: Arc<Frame> },
    /// Advisory note for the response model, never spoken verbatim.
    Notice { text: String },
}

/// The user-turn payload handed to the response model.
#[derive(Debug, Clone)]
pub struct TurnMessage {
    pub role: TurnRole,
    pub content: Vec<TurnContent>,
    pub timestamp: DateTime<Utc>,
}

impl TurnMessage {
    /// Create a user turn from transcribed text.
    pub fn user(text: &str) -> Self {
        Self {
            role: TurnRole::User,
            content: vec![TurnContent::Text {
                text: text.to_string(),
            }],
            timestamp: Utc::now(),
        }
    }

    pub fn push(&mut self, item: TurnContent) {
        self.content.push(item);
    }

    /// Frames attached to this turn.
    pub fn frames(&self) -> impl Iterator<Item = &Arc<Frame>> {
        self.content.iter().filter_map(|c| match c {
            TurnContent::Frame { frame } => Some(frame),
            _ => None,
        })
    }

    /// Advisory notices attached to this turn.
    pub fn notices(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|c| match c {
            TurnContent::Notice { text } => Some(text.as_str()),
            _ => None,
        })
    }

    /// Concatenated transcript text.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                TurnContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
