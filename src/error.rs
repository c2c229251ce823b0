//! Error types for the mentora pipeline.

/// Top-level error type for the voice tutoring system.
#[derive(Debug, thiserror::Error)]
pub enum MentorError {
    /// Audio device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Malformed audio payload (e.g. a PCM buffer with a partial sample).
    #[error("codec error: {0}")]
    Codec(String),

    /// Live session transport or protocol error.
    #[error("session error: {0}")]
    Session(String),

    /// One-shot generative API error (TTS, image).
    #[error("API error: {0}")]
    Api(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, MentorError>;
