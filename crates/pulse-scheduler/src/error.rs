use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job id must not be empty")]
    EmptyId,

    #[error("recurring job '{0}' has a zero interval")]
    ZeroInterval(String),

    #[error("max_concurrent must be at least 1")]
    ZeroConcurrency,
}
