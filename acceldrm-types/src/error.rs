//! Error taxonomy shared by every acceldrm crate.
//!
//! Each [`DrmError`] variant maps to a stable numeric [`ErrorCode`]. The code
//! travels with asynchronous error messages as an `[errCode=N]` token so
//! callback consumers can recover it from plain text.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Numeric error codes exposed to callers and embedded in async messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ErrorCode {
    BadArg = 1,
    BadFormat = 2,
    ExternFail = 3,
    BadUsage = 4,
    BadFrequency = 5,
    WsReqError = 10001,
    WsMayRetry = 10002,
    WsTimedOut = 10003,
    WsError = 10004,
    CtlrError = 20001,
    Fatal = 90001,
    Debug = 99999,
}

impl ErrorCode {
    /// Every known code, in ascending numeric order.
    pub const ALL: [ErrorCode; 12] = [
        Self::BadArg,
        Self::BadFormat,
        Self::ExternFail,
        Self::BadUsage,
        Self::BadFrequency,
        Self::WsReqError,
        Self::WsMayRetry,
        Self::WsTimedOut,
        Self::WsError,
        Self::CtlrError,
        Self::Fatal,
        Self::Debug,
    ];

    /// Returns the numeric value of this code.
    #[must_use]
    pub const fn value(self) -> u32 {
        self as u32
    }

    /// Looks up a code by its numeric value.
    #[must_use]
    pub fn from_value(value: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.value() == value)
    }

    /// Returns the symbolic name used in logs (e.g. `DRMBadArg`).
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::BadArg => "DRMBadArg",
            Self::BadFormat => "DRMBadFormat",
            Self::ExternFail => "DRMExternFail",
            Self::BadUsage => "DRMBadUsage",
            Self::BadFrequency => "DRMBadFrequency",
            Self::WsReqError => "DRMWSReqError",
            Self::WsMayRetry => "DRMWSMayRetry",
            Self::WsTimedOut => "DRMWSTimedOut",
            Self::WsError => "DRMWSError",
            Self::CtlrError => "DRMCtlrError",
            Self::Fatal => "DRMFatal",
            Self::Debug => "DRMDebug",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors raised by the licensing engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrmError {
    /// Invalid parameter value or contract violation.
    #[error("invalid argument: {0}")]
    BadArg(String),

    /// Malformed JSON, licence or mailbox payload.
    #[error("malformed payload: {0}")]
    BadFormat(String),

    /// Valid arguments used in an invalid state.
    #[error("invalid usage: {0}")]
    BadUsage(String),

    /// Clock calibration mismatch or infeasible detection period.
    #[error("frequency error: {0}")]
    BadFrequency(String),

    /// Hardware self-test or register access failure.
    #[error("controller error: {0}")]
    CtlrError(String),

    /// The web service rejected the request.
    #[error("web service rejected the request (HTTP {status}): {message}")]
    WsReqError { status: u16, message: String },

    /// Transient network failure, eligible for retry.
    #[error("transient web service failure: {0}")]
    WsMayRetry(String),

    /// Retry budget exhausted.
    #[error("web service request timed out after {attempts} attempt(s): {message}")]
    WsTimedOut { attempts: u32, message: String },

    /// Any other web service failure.
    #[error("web service error: {0}")]
    WsError(String),

    /// Local I/O, filesystem or TLS failure.
    #[error("external failure: {0}")]
    ExternFail(String),

    /// Unsupported feature or irrecoverable state.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// Manually triggered error used to exercise the async callback path.
    #[error("debug error: {0}")]
    Debug(String),
}

impl DrmError {
    /// Returns the numeric code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::BadArg(_) => ErrorCode::BadArg,
            Self::BadFormat(_) => ErrorCode::BadFormat,
            Self::BadUsage(_) => ErrorCode::BadUsage,
            Self::BadFrequency(_) => ErrorCode::BadFrequency,
            Self::CtlrError(_) => ErrorCode::CtlrError,
            Self::WsReqError { .. } => ErrorCode::WsReqError,
            Self::WsMayRetry(_) => ErrorCode::WsMayRetry,
            Self::WsTimedOut { .. } => ErrorCode::WsTimedOut,
            Self::WsError(_) => ErrorCode::WsError,
            Self::ExternFail(_) => ErrorCode::ExternFail,
            Self::Fatal(_) => ErrorCode::Fatal,
            Self::Debug(_) => ErrorCode::Debug,
        }
    }

    /// Returns true if the failure is transient and the request may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WsMayRetry(_))
    }

    /// Renders the message delivered to async callbacks, with the
    /// `[errCode=N]` token appended.
    #[must_use]
    pub fn async_message(&self) -> String {
        format!("{self} [errCode={}]", self.code().value())
    }
}

impl From<serde_json::Error> for DrmError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadFormat(err.to_string())
    }
}

impl From<std::io::Error> for DrmError {
    fn from(err: std::io::Error) -> Self {
        Self::ExternFail(err.to_string())
    }
}

/// Result type for engine operations.
pub type DrmResult<T> = Result<T, DrmError>;

/// Extracts the numeric code from an `[errCode=N]` token in a message.
#[must_use]
pub fn parse_error_code(message: &str) -> Option<u32> {
    let start = message.rfind("[errCode=")? + "[errCode=".len();
    let rest = &message[start..];
    let end = rest.find(']')?;
    rest[..end].trim().parse().ok()
}
