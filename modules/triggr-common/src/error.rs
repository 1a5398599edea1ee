use thiserror::Error;

/// Error taxonomy for the whole node. Each variant maps to one HTTP status;
/// background tasks log these instead of surfacing them per-request.
#[derive(Error, Debug, Clone)]
pub enum TriggrError {
    #[error("Validation error: {message}")]
    Validation { message: String, line: Option<u32> },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Chain error: {0}")]
    Chain(String),
}

pub type Result<T> = std::result::Result<T, TriggrError>;

impl TriggrError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            line: None,
        }
    }

    pub fn validation_at(message: impl Into<String>, line: u32) -> Self {
        Self::Validation {
            message: message.into(),
            line: Some(line),
        }
    }

    /// HTTP status this error surfaces as.
    pub fn status(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::Unauthorized => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::RateLimited => 429,
            Self::Storage(_) => 500,
            Self::Chain(_) => 502,
        }
    }

    /// Stable machine-readable code for the error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::RateLimited => "rate_limited",
            Self::Storage(_) => "storage_error",
            Self::Chain(_) => "chain_error",
        }
    }
}
