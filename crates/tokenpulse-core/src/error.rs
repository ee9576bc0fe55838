use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PulseError {
    #[error("not initialized: run 'tokenpulse config init'")]
    NotInitialized,

    #[error("token not found: {0}")]
    TokenNotFound(String),

    #[error("invalid identifier '{0}': must be 20-128 alphanumeric characters")]
    InvalidIdentifier(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("token store error: {0}")]
    Store(String),

    #[error("alert delivery failed: {0}")]
    Alert(String),

    #[error(transparent)]
    Scheduler(#[from] pulse_scheduler::SchedulerError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PulseError>;

/// Failure of a single upstream request.
///
/// Transient variants are retried by the batch fetch client; the rest end
/// the chunk immediately.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("upstream server error: HTTP {status}")]
    Server { status: u16 },

    #[error("upstream rejected request: HTTP {status}")]
    Rejected { status: u16 },

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("could not decode upstream response: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited { .. }
                | FetchError::Server { .. }
                | FetchError::Timeout
                | FetchError::Transport(_)
        )
    }
}
