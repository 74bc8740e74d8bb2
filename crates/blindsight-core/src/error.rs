use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlindsightError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Room error: {0}")]
    Room(String),

    #[error("Ingest error: {0}")]
    Ingest(String),

    #[error("Supervisor error: {0}")]
    Supervisor(String),

    #[error("Engine error: {0}")]
    Engine(String),

    /// An ingest did not confirm termination within the supervisor's bound.
    #[error("Ingest for track {track_id} did not stop within {waited_ms}ms")]
    CancellationTimeout { track_id: String, waited_ms: u64 },

    /// A second writer tried to claim a slot that already has one.
    #[error("Frame slot already owned by {holder}, rejected writer {contender}")]
    ConcurrentWriter { holder: String, contender: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BlindsightError {
    /// Whether the session has to be torn down after this error.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::CancellationTimeout { .. } | Self::ConcurrentWriter { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BlindsightError>;
