//! Wire envelope and error taxonomy shared by both HTTP surfaces.
//!
//! Every successful response is `{"status": "ok", "payload": ...}`; every
//! failure is `{"status": "error", "code": <taxonomy>, "reason": ...}`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy visible at the API surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Invalid request, unknown entity or forbidden state transition.
    AppError,
    /// The store failed.
    BackendError,
    /// A worker RPC failed.
    BackendNetworkError,
    /// Reserved.
    ConcurrencyError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AppError => "app_error",
            Self::BackendError => "backend_error",
            Self::BackendNetworkError => "backend_network_error",
            Self::ConcurrencyError => "concurrency_error",
        };
        f.write_str(name)
    }
}

/// Response envelope for master and worker APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ApiResponse<T> {
    /// Success, carrying the handler payload.
    Ok {
        /// Handler-specific payload.
        payload: T,
    },
    /// Failure, carrying the taxonomy code and a human-readable reason.
    Error {
        /// Taxonomy code.
        code: ErrorCode,
        /// Human-readable reason.
        reason: String,
    },
}

impl<T> ApiResponse<T> {
    /// Wrap a payload in the success envelope.
    pub fn ok(payload: T) -> Self {
        Self::Ok { payload }
    }

    /// Wrap an error in the failure envelope.
    pub fn error(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::Error {
            code,
            reason: reason.into(),
        }
    }

    /// Unwrap the payload, turning the error arm into an [`ApiError`].
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the envelope carries the error arm.
    pub fn into_payload(self) -> Result<T, ApiError> {
        match self {
            Self::Ok { payload } => Ok(payload),
            Self::Error { code, reason } => Err(ApiError { code, reason }),
        }
    }
}

/// Which captured log of a task to read: stdout (`out`) or stderr (`err`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    /// The task's captured stdout.
    Out,
    /// The task's captured stderr.
    Err,
}

impl LogStream {
    /// The path segment used on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Out => "out",
            Self::Err => "err",
        }
    }

    /// The log file name the worker writes.
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Out => "stdout.log",
            Self::Err => "stderr.log",
        }
    }
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogStream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "out" => Ok(Self::Out),
            "err" => Ok(Self::Err),
            other => Err(format!("log type can be only 'out' or 'err', got '{other}'")),
        }
    }
}

/// An error envelope decoded on the client side.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {reason}")]
pub struct ApiError {
    /// Taxonomy code reported by the server.
    pub code: ErrorCode,
    /// Reason reported by the server.
    pub reason: String,
}
