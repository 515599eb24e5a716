//! Error types for nativebind
//!
//! Every failure the binding layer can report, from locating declaration
//! fragments to validating the outcome of a native call.

use crate::checks::{InputError, NativeOperationError};
use crate::config::ConfigError;
use crate::dist::LoadError;
use crate::ffi::FFIError;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for nativebind
#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to locate {}: {source}", .path.display())]
    ResourceNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The C compiler ran and rejected the source. Never triggers a fallback.
    #[error("C compiler failed ({}): {stderr}", describe_status(.status))]
    CompilationFailure { status: Option<i32>, stderr: String },

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    NativeOperation(#[from] NativeOperationError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("FFI error: {0}")]
    Ffi(#[from] FFIError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("No distribution registered for library '{0}'")]
    UnknownLibrary(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit code {}", code),
        None => "no exit code".to_string(),
    }
}

/// Result type alias for nativebind operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn resource_not_found(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::ResourceNotFound {
            path: path.into(),
            source,
        }
    }

    /// The native error code carried by a failed outcome check, if any.
    pub fn errno(&self) -> Option<i64> {
        match self {
            Error::NativeOperation(err) => Some(err.errno),
            _ => None,
        }
    }
}
