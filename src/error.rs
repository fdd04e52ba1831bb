//! Error types for voiceforge.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Candle tensor/model error.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// Corpus layout or metadata error (missing metadata file, missing
    /// audio directory, empty surviving dataset).
    #[error("corpus: {0}")]
    Corpus(String),

    /// Audio processing error (decode, STFT, resampling, WAV I/O).
    #[error("audio: {0}")]
    Audio(String),

    /// Phoneme segmentation error.
    #[error("phoneme: {0}")]
    Phoneme(String),

    /// Training loop error.
    #[error("training: {0}")]
    Training(String),

    /// Another training run already holds the process-wide run slot.
    #[error("a training run is already in progress")]
    AlreadyRunning,

    /// Artifact export error. The checkpoint on disk is unaffected.
    #[error("export: {0}")]
    Export(String),

    /// Invalid configuration.
    #[error("config: {0}")]
    Config(String),

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<hound::Error> for Error {
    fn from(error: hound::Error) -> Self {
        Error::Audio(error.to_string())
    }
}

impl From<symphonia::core::errors::Error> for Error {
    fn from(error: symphonia::core::errors::Error) -> Self {
        Error::Audio(error.to_string())
    }
}
