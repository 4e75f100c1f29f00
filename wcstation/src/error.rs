//! Error types for wcstation

/// Errors raised by the station core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Tracklist file not found: {0}")]
    TracklistNotFound(String),

    #[error("Tracklist {0} contains no tracks")]
    EmptyTracklist(String),

    #[error("Failed to spawn encoder process: {0}")]
    EncoderSpawn(std::io::Error),

    #[error("Encoder process exposes no stdout pipe")]
    EncoderNoStdout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Specialized Result type for wcstation
pub type Result<T> = std::result::Result<T, Error>;
