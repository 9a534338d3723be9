//! Error taxonomy for the interop core
//!
//! Every failure surfaces as an [`InteropError`]. Releasing an unknown handle is not an
//! error: `free`/`close` report it by returning `false`.

use crate::thunk::CallingConvention;
use thiserror::Error;

/// Win32 error codes produced by the wait/event bridge.
pub mod win32 {
    /// The handle is invalid.
    pub const ERROR_INVALID_HANDLE: u32 = 6;
    /// Not enough memory resources are available.
    pub const ERROR_NOT_ENOUGH_MEMORY: u32 = 8;
    /// The parameter is incorrect.
    pub const ERROR_INVALID_PARAMETER: u32 = 87;
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, InteropError>;

/// Errors raised by the interop core
#[derive(Error, Debug)]
pub enum InteropError {
    #[error("invalid encoding selector {0}")]
    InvalidEncoding(u32),

    #[error("out of memory: failed to allocate {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("calling convention mismatch: callback declares {declared}, stub requested {requested}")]
    CallingConventionMismatch {
        declared: CallingConvention,
        requested: CallingConvention,
    },

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("configuration error: {0}")]
    Config(#[from] tether_config::ConfigError),
}

impl InteropError {
    pub(crate) fn invalid_operation(msg: impl Into<String>) -> Self {
        InteropError::InvalidOperation(msg.into())
    }
}

/// A failed platform primitive, carrying its Win32 code and the matching HRESULT
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("platform error {code} (HRESULT {hresult:#010x}): {message}")]
pub struct PlatformError {
    /// Win32 error code
    pub code: u32,
    /// `HRESULT_FROM_WIN32(code)`
    pub hresult: u32,
    /// Human-readable description
    pub message: String,
}

impl PlatformError {
    /// Translate a Win32 error code into a descriptive error
    pub fn from_win32(code: u32) -> Self {
        Self {
            code,
            hresult: hresult_from_win32(code),
            message: describe(code).to_string(),
        }
    }
}

/// `HRESULT_FROM_WIN32`
pub fn hresult_from_win32(code: u32) -> u32 {
    if code == 0 {
        0
    } else {
        0x8007_0000 | (code & 0xFFFF)
    }
}

fn describe(code: u32) -> &'static str {
    match code {
        win32::ERROR_INVALID_HANDLE => "the handle is invalid",
        win32::ERROR_NOT_ENOUGH_MEMORY => "not enough memory resources are available",
        win32::ERROR_INVALID_PARAMETER => "the parameter is incorrect",
        _ => "unknown platform error",
    }
}
