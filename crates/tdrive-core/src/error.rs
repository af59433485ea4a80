use thiserror::Error;

pub type TdriveResult<T> = Result<T, TdriveError>;

#[derive(Debug, Error)]
pub enum TdriveError {
    /// The native bridge rejected a cancel/pause/resume command.
    #[error("bridge error: {0}")]
    Bridge(String),

    #[error("invalid progress event: {0}")]
    InvalidEvent(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
