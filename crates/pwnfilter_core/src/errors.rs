use std::fmt;
use thiserror::Error;

/// Pipeline stage a fatal error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Read,
    Route,
    Insert,
    Serialize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Read => "read",
            Stage::Route => "route",
            Stage::Insert => "insert",
            Stage::Serialize => "serialize",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum PwnError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Persist: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("Config: {0}")]
    Config(String),

    #[error("{stage} stage failed: {message}")]
    Stage { stage: Stage, message: String },

    #[error("Corrupt container: {0}")]
    Corrupt(String),

    #[error("Integrity: expected digest {expected}, got {actual}")]
    Integrity { expected: String, actual: String },
}

impl PwnError {
    pub fn stage(stage: Stage, message: impl fmt::Display) -> Self {
        PwnError::Stage { stage, message: message.to_string() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        PwnError::Config(message.into())
    }
}

pub type Result<T> = std::result::Result<T, PwnError>;
