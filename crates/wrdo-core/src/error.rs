//! Error types for the WRDO turn pipeline

use std::fmt;
use thiserror::Error;

/// Result type alias for a single upstream adapter call
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure of one call to an external service (speech-to-text, emotion, completion).
///
/// Every adapter returns this instead of unwinding, so the orchestrator can match on it.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("service unreachable: {0}")]
    Unreachable(String),

    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("audio read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("adapter misconfigured: {0}")]
    Config(String),
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AdapterError::Timeout(err.to_string())
        } else if err.is_decode() {
            AdapterError::Malformed(err.to_string())
        } else {
            AdapterError::Unreachable(err.to_string())
        }
    }
}

/// Which upstream stage of a turn failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transcription,
    Emotion,
    Reply,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Transcription => "transcription",
            Stage::Emotion => "emotion classifier",
            Stage::Reply => "reply generator",
        })
    }
}

/// Errors that abort a turn. No record is written when one of these is returned.
#[derive(Error, Debug)]
pub enum TurnError {
    #[error("invalid input: {0}")]
    ClientInput(String),

    #[error("{stage} failed: {source}")]
    Upstream {
        stage: Stage,
        #[source]
        source: AdapterError,
    },

    #[error("could not stage audio: {0}")]
    Staging(#[from] std::io::Error),
}

impl TurnError {
    pub fn upstream(stage: Stage) -> impl FnOnce(AdapterError) -> TurnError {
        move |source| TurnError::Upstream { stage, source }
    }

    /// True when the caller sent something unusable (maps to a 4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(self, TurnError::ClientInput(_))
    }
}

/// Errors from the crumb log.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("record encoding failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("document log request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("document log returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid store credentials: {0}")]
    Credentials(String),

    #[error("turn writer queue is full")]
    QueueFull,

    #[error("turn writer is closed")]
    Closed,
}

/// Errors raised while loading configuration or building clients at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("http client build failed: {0}")]
    Client(#[from] reqwest::Error),

    #[error("store open failed: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
