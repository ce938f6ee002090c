//! Errors surfaced by the SMART Auth Manager (spec §4.8, C8).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SmartError {
    #[error("invalid client: {0}")]
    InvalidClient(String),

    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid token")]
    InvalidToken,

    #[error("pkce verification failed")]
    PkceVerificationFailed,

    #[error("authorization code or token expired")]
    Expired,
}

impl SmartError {
    /// The OAuth 2.0 `error` field value for this failure (RFC 6749 §5.2).
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidGrant(_) | Self::PkceVerificationFailed | Self::Expired => "invalid_grant",
            Self::InvalidScope(_) => "invalid_scope",
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidToken => "invalid_token",
        }
    }
}
