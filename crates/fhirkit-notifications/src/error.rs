use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("invalid channel configuration: {0}")]
    InvalidConfig(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("delivery timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("unsupported channel: {0:?}")]
    UnsupportedChannel(fhirkit_subscriptions::ChannelType),
}
