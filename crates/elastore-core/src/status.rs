//! Result envelopes
//!
//! Every fallible operation on [`StorageService`](crate::StorageService) and
//! [`FileHandle`](crate::FileHandle) reports through [`Status`], or through
//! [`StatusOr`] when it also produces a value.
//!
//! Invariants:
//! - a failed `Status` always carries a non-empty message
//! - a failed `StatusOr` never carries a value

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminated kind of an envelope
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Ok,
    InvalidArgument,
    NotFound,
    AlreadyExists,
    NotWriteable,
    ResourceExhausted,
    Unavailable,
    Internal,
}

impl StatusCode {
    /// Get the code string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::NotWriteable => "NOT_WRITEABLE",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Success/failure envelope: `{ok, message}` plus its kind
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    ok: bool,
    message: String,
    code: StatusCode,
}

impl Status {
    /// A successful status
    pub fn success() -> Self {
        Self {
            ok: true,
            message: StatusCode::Ok.as_str().to_string(),
            code: StatusCode::Ok,
        }
    }

    /// A failed status.
    ///
    /// An empty message is replaced by the code name; `StatusCode::Ok` is
    /// reported as `Internal` since a failure cannot carry the success kind.
    pub fn error(code: StatusCode, message: impl Into<String>) -> Self {
        let code = match code {
            StatusCode::Ok => StatusCode::Internal,
            other => other,
        };
        let mut message = message.into();
        if message.trim().is_empty() {
            message = code.as_str().to_string();
        }
        Self {
            ok: false,
            message,
            code,
        }
    }

    /// Whether the operation succeeded
    pub fn ok(&self) -> bool {
        self.ok
    }

    /// Human-readable outcome; describes the failure when `ok()` is false
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Kind of the outcome
    pub fn code(&self) -> StatusCode {
        self.code
    }

    /// Bridge to `Result` so callers can use `?`
    pub fn into_result(self) -> Result<(), Status> {
        if self.ok {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::success()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ok {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for Status {}

impl From<StorageError> for Status {
    fn from(err: StorageError) -> Self {
        Status::error(err.code(), err.to_string())
    }
}

impl From<crate::Result<()>> for Status {
    fn from(result: crate::Result<()>) -> Self {
        match result {
            Ok(()) => Status::success(),
            Err(e) => e.into(),
        }
    }
}

/// Envelope for operations that also produce a value.
///
/// The value is only present when the status is ok.
#[derive(Debug)]
pub struct StatusOr<T> {
    status: Status,
    value: Option<T>,
}

impl<T> StatusOr<T> {
    /// A successful result carrying `value`
    pub fn from_value(value: T) -> Self {
        Self {
            status: Status::success(),
            value: Some(value),
        }
    }

    /// A failed result; a successful `status` is rejected as `Internal`
    pub fn from_status(status: Status) -> Self {
        let status = if status.ok() {
            Status::error(StatusCode::Internal, "success status without a value")
        } else {
            status
        };
        Self {
            status,
            value: None,
        }
    }

    /// The outcome
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Whether the operation succeeded
    pub fn ok(&self) -> bool {
        self.status.ok()
    }

    /// Borrow the value; `None` after a failure
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Take the value; `None` after a failure
    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// The value, or `T::default()` after a failure
    pub fn value_or_default(self) -> T
    where
        T: Default,
    {
        self.value.unwrap_or_default()
    }

    /// Bridge to `Result` so callers can use `?`
    pub fn into_result(self) -> Result<T, Status> {
        match self.value {
            Some(value) if self.status.ok() => Ok(value),
            _ => Err(self.status),
        }
    }
}

impl<T> From<crate::Result<T>> for StatusOr<T> {
    fn from(result: crate::Result<T>) -> Self {
        match result {
            Ok(value) => Self::from_value(value),
            Err(e) => Self::from_status(e.into()),
        }
    }
}
