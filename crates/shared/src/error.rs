use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    NotFound,
    Conflict,
    Unavailable,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Operator input that must be re-entered. Never mutates state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid phone number '{0}'")]
    InvalidPhone(String),
    #[error("account {0} is already registered")]
    DuplicatePhone(String),
    #[error("account count must be a positive integer, got '{0}'")]
    InvalidCount(String),
    #[error("unrecognized duration '{0}', expected e.g. 1h, 30m, 10s")]
    InvalidDuration(String),
    #[error("duration must be positive, got '{0}'")]
    NonPositiveDuration(String),
    #[error("link is empty")]
    EmptyLink,
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    #[error("malformed confirmation token")]
    MalformedToken,
    #[error("broadcast text is empty")]
    EmptyMessage,
    #[error("broadcast target is empty")]
    EmptyTarget,
}

impl From<ValidationError> for ApiError {
    fn from(value: ValidationError) -> Self {
        Self::new(ErrorCode::Validation, value.to_string())
    }
}
