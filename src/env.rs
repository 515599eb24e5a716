//! Foreign-function environments
//!
//! An `Environment` identifies one runtime context in which bindings are
//! compiled or loaded. The binding cache is keyed by its `EnvironmentId`, and
//! each environment owns the accessor the error check uses to read the
//! platform's "last error" after a native call.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Native integer result of a call plus the platform's text for it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutcomeCode {
    pub code: i64,
    pub message: Option<String>,
}

impl OutcomeCode {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        OutcomeCode {
            code,
            message: Some(message.into()),
        }
    }

    pub fn success() -> Self {
        OutcomeCode::default()
    }
}

impl fmt::Display for OutcomeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{} ({})", self.code, message),
            None => write!(f, "{}", self.code),
        }
    }
}

/// Where an environment reads its last error from.
pub trait LastErrorSource: Send + Sync {
    fn last_error(&self) -> OutcomeCode;
}

/// The calling thread's OS error: `GetLastError` on Windows, `errno` elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsLastError;

impl LastErrorSource for OsLastError {
    fn last_error(&self) -> OutcomeCode {
        let error = std::io::Error::last_os_error();
        match error.raw_os_error() {
            Some(0) | None => OutcomeCode::success(),
            Some(code) => OutcomeCode::new(i64::from(code), error.to_string()),
        }
    }
}

/// A last error set explicitly, for environments that don't talk to the OS.
#[derive(Debug, Default)]
pub struct RecordedLastError {
    current: Mutex<OutcomeCode>,
}

impl RecordedLastError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, code: i64, message: impl Into<String>) {
        *self.current.lock() = OutcomeCode::new(code, message);
    }

    pub fn clear(&self) {
        *self.current.lock() = OutcomeCode::success();
    }
}

impl LastErrorSource for RecordedLastError {
    fn last_error(&self) -> OutcomeCode {
        self.current.lock().clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnvironmentId(u64);

impl EnvironmentId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        EnvironmentId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "env#{}", self.0)
    }
}

#[derive(Clone)]
pub struct Environment {
    id: EnvironmentId,
    last_error: Arc<dyn LastErrorSource>,
}

impl Environment {
    /// A fresh environment reading the OS last error.
    pub fn new() -> Self {
        Self::with_last_error(Arc::new(OsLastError))
    }

    pub fn with_last_error(source: Arc<dyn LastErrorSource>) -> Self {
        Environment {
            id: EnvironmentId::next(),
            last_error: source,
        }
    }

    /// The process-wide default environment.
    pub fn global() -> &'static Environment {
        static GLOBAL: OnceLock<Environment> = OnceLock::new();
        GLOBAL.get_or_init(Environment::new)
    }

    pub fn id(&self) -> EnvironmentId {
        self.id
    }

    pub fn last_error(&self) -> OutcomeCode {
        self.last_error.last_error()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Environment {}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment").field("id", &self.id).finish()
    }
}
