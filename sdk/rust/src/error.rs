//! Errors of the MRS SDK.
//!
//! Every failure carries an [`ErrorCode`] so callers can branch on the kind of
//! failure without parsing messages. Server supplied messages are kept
//! verbatim; the raw error document, when there is one, is available under
//! the `response` extension.

use mrs_core::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // Transport
    NetworkError,
    Timeout,

    // Responses
    NotAuthenticated,
    NotFound,
    HttpError,
    InvalidResponse,

    // Addressing
    InvalidUrl,
    HttpsNotSupported,

    // Payloads
    SerializeError,
    DeserializeError,

    // Request building
    InvalidFilter,
    ReadOnlyField,
    ConfigurationError,

    AuthError,

    // Asynchronous tasks
    TaskError,
    TaskCancelled,
    TaskTimeout,

    InternalError,
}

impl ErrorCode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkError => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
            Self::NotFound => "NOT_FOUND",
            Self::HttpError => "HTTP_ERROR",
            Self::InvalidResponse => "INVALID_RESPONSE",
            Self::InvalidUrl => "INVALID_URL",
            Self::HttpsNotSupported => "HTTPS_NOT_SUPPORTED",
            Self::SerializeError => "SERIALIZE_ERROR",
            Self::DeserializeError => "DESERIALIZE_ERROR",
            Self::InvalidFilter => "INVALID_FILTER",
            Self::ReadOnlyField => "READ_ONLY_FIELD",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
            Self::AuthError => "AUTH_ERROR",
            Self::TaskError => "TASK_ERROR",
            Self::TaskCancelled => "TASK_CANCELLED",
            Self::TaskTimeout => "TASK_TIMEOUT",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Code for a non-2xx reply.
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 => Self::NotAuthenticated,
            404 => Self::NotFound,
            _ => Self::HttpError,
        }
    }

    /// Transport failures that may succeed when sent again.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError | Self::Timeout)
    }

    /// Failures caused by the request or the caller's state.
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotAuthenticated
                | Self::NotFound
                | Self::InvalidUrl
                | Self::InvalidFilter
                | Self::ReadOnlyField
                | Self::ConfigurationError
                | Self::AuthError
        )
    }

    /// Failures on the service side, including a task that ended in ERROR.
    pub const fn is_server_error(&self) -> bool {
        matches!(self, Self::InternalError | Self::TaskError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An SDK failure.
#[derive(Error, Debug, Clone, Serialize)]
#[error("[{code}] {message}")]
pub struct MrsError {
    pub code: ErrorCode,
    pub message: String,
    /// HTTP status of the reply that failed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[source]
    #[serde(skip)]
    pub source: Option<Box<MrsError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<HashMap<String, Value>>,
}

impl MrsError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status: None,
            source: None,
            extensions: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Keeps the lower level failure this one was derived from.
    pub fn with_source(mut self, source: MrsError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extensions
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extensions.as_ref()?.get(key)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthError, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message)
    }

    pub fn serialize(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SerializeError, message)
    }

    pub fn deserialize(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DeserializeError, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidResponse, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn is_client_error(&self) -> bool {
        self.code.is_client_error()
    }

    pub fn is_server_error(&self) -> bool {
        self.code.is_server_error()
    }
}

impl From<CoreError> for MrsError {
    fn from(error: CoreError) -> Self {
        let code = match &error {
            CoreError::ReadOnlyField(_) | CoreError::UndeletableField(_) => ErrorCode::ReadOnlyField,
            CoreError::InvalidDocument(_) => ErrorCode::DeserializeError,
            _ => ErrorCode::InvalidFilter,
        };
        Self::new(code, error.to_string())
    }
}

pub type MrsResult<T> = std::result::Result<T, MrsError>;

/// Maps foreign errors onto an [`ErrorCode`], keeping their message.
pub trait ResultExt<T> {
    fn map_mrs_err(self, code: ErrorCode) -> MrsResult<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn map_mrs_err(self, code: ErrorCode) -> MrsResult<T> {
        self.map_err(|e| MrsError::new(code, e.to_string()))
    }
}
