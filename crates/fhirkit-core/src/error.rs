//! Language-neutral error kinds shared across the fhirkit core (see design
//! note §7, Error Handling Design). Each layer returns its own error; the
//! HTTP boundary is the only place that maps these onto a status code and an
//! `OperationOutcome`.

use thiserror::Error;

/// Core error type returned by the interaction parser, version adapter, and
/// anything else in `fhirkit-core`.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed request: {0}")]
    Parse(String),

    #[error("unsupported content type: {0}")]
    UnsupportedMediaType(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid FHIR id: {0}")]
    InvalidId(#[from] crate::id::IdError),

    #[error("invalid FHIR instant: {0}")]
    InvalidDateTime(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("time formatting error: {0}")]
    Time(#[from] time::error::Format),

    #[error("time parsing error: {0}")]
    TimeParse(#[from] time::error::Parse),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn invalid_date_time(message: impl Into<String>) -> Self {
        Self::InvalidDateTime(message.into())
    }

    /// Classification used to pick an HTTP status and an `OperationOutcome`
    /// issue code at the transport boundary.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Parse(_) | Self::InvalidId(_) | Self::InvalidDateTime(_) | Self::Json(_) => {
                ErrorCategory::Invalid
            }
            Self::UnsupportedMediaType(_) => ErrorCategory::UnsupportedMediaType,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::Conflict(_) => ErrorCategory::Conflict,
            Self::PreconditionFailed(_) => ErrorCategory::PreconditionFailed,
            Self::Unauthorized(_) => ErrorCategory::Unauthorized,
            Self::Forbidden(_) => ErrorCategory::Forbidden,
            Self::Url(_) => ErrorCategory::Invalid,
            Self::Time(_) | Self::TimeParse(_) | Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// The HTTP status this error maps to.
    pub fn http_status(&self) -> u16 {
        match self.category() {
            ErrorCategory::Invalid => 400,
            ErrorCategory::UnsupportedMediaType => 415,
            ErrorCategory::NotFound => 404,
            ErrorCategory::Conflict => 409,
            ErrorCategory::PreconditionFailed => 412,
            ErrorCategory::Unauthorized => 401,
            ErrorCategory::Forbidden => 403,
            ErrorCategory::Internal => 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Invalid,
    UnsupportedMediaType,
    NotFound,
    Conflict,
    PreconditionFailed,
    Unauthorized,
    Forbidden,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Invalid => "invalid",
            Self::UnsupportedMediaType => "unsupported-media-type",
            Self::NotFound => "not-found",
            Self::Conflict => "conflict",
            Self::PreconditionFailed => "precondition-failed",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
