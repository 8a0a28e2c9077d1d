use thiserror::Error;

/// Failure modes for the scheduler.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SchedulerError {
    #[error("invalid cron expression {expr:?}: {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("failed to submit event: {0}")]
    SubmitFailed(String),
}
