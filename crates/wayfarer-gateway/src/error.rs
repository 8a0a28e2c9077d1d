use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("queue full (capacity reached)")]
    QueueFull,

    #[error("gateway is not running")]
    NotRunning,

    #[error("gateway is already running")]
    AlreadyRunning,

    #[error("consumer failed: {0}")]
    ConsumerFailed(String),
}
