use std::time::Duration;

use thiserror::Error;

use crate::models::response::{InvalidRequestResponse, ThrottledResponse};

/// A payload that Amplitude would reject, caught before it is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("item {index}: must provide at least one of user_id and device_id")]
    MissingIdentity { index: usize },
    #[error("item {index}: event_type must not be empty")]
    MissingEventType { index: usize },
    #[error("item {index}: group_type and group_value must not be empty")]
    MissingGroup { index: usize },
    #[error("item {index}: {field} must be at least {min} characters long")]
    IdTooShort {
        index: usize,
        field: &'static str,
        min: u32,
    },
    #[error("nothing to send")]
    EmptyPayload,
}

impl ValidationError {
    /// Re-targets the error at the item with the given index, for errors
    /// that refer to a single item.
    pub(crate) fn at(self, index: usize) -> Self {
        match self {
            ValidationError::MissingIdentity { .. } => ValidationError::MissingIdentity { index },
            ValidationError::MissingEventType { .. } => {
                ValidationError::MissingEventType { index }
            }
            ValidationError::MissingGroup { .. } => ValidationError::MissingGroup { index },
            ValidationError::IdTooShort { field, min, .. } => {
                ValidationError::IdTooShort { index, field, min }
            }
            ValidationError::EmptyPayload => ValidationError::EmptyPayload,
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid payload: {0}")]
    Validation(#[from] ValidationError),
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to send request: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid request: {}", .0.error)]
    InvalidRequest(Box<InvalidRequestResponse>),
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("throttled: {}", .response.error)]
    Throttled {
        response: Box<ThrottledResponse>,
        retry_after: Option<Duration>,
    },
    #[error("server error ({status}): {body}")]
    Server { status: u16, body: String },
    #[error("unexpected status code ({status}): {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("failed to decode response {body:?}: {source}")]
    Decode {
        source: serde_json::Error,
        body: String,
    },
}

impl Error {
    /// Whether sending the same request again might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Throttled { .. } | Error::Server { .. } => true,
            Error::Transport(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }

    /// The server-provided delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Throttled { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
