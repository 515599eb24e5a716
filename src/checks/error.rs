//! Outcome validation applied after a native call returns

use crate::env::Environment;
use std::fmt;
use thiserror::Error;
use tracing::trace;

/// The result a native call must produce to count as a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expected {
    /// Exactly this code.
    Value(i64),
    /// Anything but zero, the convention of most `BOOL`-returning APIs.
    NonZero,
}

impl Expected {
    pub fn accepts(self, actual: i64) -> bool {
        match self {
            Expected::Value(expected) => actual == expected,
            Expected::NonZero => actual != 0,
        }
    }
}

impl Default for Expected {
    fn default() -> Self {
        Expected::Value(0)
    }
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expected::Value(value) => write!(f, "{}", value),
            Expected::NonZero => f.write_str("non-zero"),
        }
    }
}

/// A native call finished with an unexpected outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct NativeOperationError {
    pub operation: String,
    /// The code that was checked
    pub code: i64,
    pub expected: Expected,
    /// The environment's last error when the check ran
    pub errno: i64,
    pub message: Option<String>,
}

impl NativeOperationError {
    /// True when the platform reported `errno`, e.g. "already exists".
    pub fn is(&self, errno: i64) -> bool {
        self.errno == errno
    }
}

impl fmt::Display for NativeOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = self.message.as_deref().unwrap_or("no message");
        match self.expected {
            Expected::NonZero => write!(
                f,
                "Expected a non-zero result from {} but got zero instead. Error {} from the OS was {:?}",
                self.operation, self.errno, message
            ),
            Expected::Value(expected) => write!(
                f,
                "Error when calling {}: expected {} but received {}. Error {} from the OS was {:?}",
                self.operation, expected, self.code, self.errno, message
            ),
        }
    }
}

/// Compares the outcome of `operation` against `expected`.
///
/// `code` is the value the call returned when it returns one worth checking;
/// when it is `None` the environment's last error is checked instead.
pub fn error_check(
    env: &Environment,
    operation: &str,
    code: Option<i64>,
    expected: Expected,
) -> Result<(), NativeOperationError> {
    let last_error = env.last_error();
    let actual = code.unwrap_or(last_error.code);
    let passed = expected.accepts(actual);
    trace!(
        operation,
        code = actual,
        expected = %expected,
        errno = last_error.code,
        passed,
        "error check"
    );

    if passed {
        return Ok(());
    }

    Err(NativeOperationError {
        operation: operation.to_string(),
        code: actual,
        expected,
        errno: last_error.code,
        message: last_error.message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::RecordedLastError;
    use std::sync::Arc;

    fn recorded() -> (Arc<RecordedLastError>, Environment) {
        let source = Arc::new(RecordedLastError::new());
        let env = Environment::with_last_error(source.clone());
        (source, env)
    }

    #[test]
    fn test_non_zero_policy() {
        let (_, env) = recorded();
        assert!(error_check(&env, "CloseHandle", Some(0), Expected::NonZero).is_err());
        assert!(error_check(&env, "CloseHandle", Some(1), Expected::NonZero).is_ok());
        assert!(error_check(&env, "CloseHandle", Some(-1), Expected::NonZero).is_ok());
    }

    #[test]
    fn test_explicit_value() {
        let (_, env) = recorded();
        assert!(error_check(&env, "WaitForSingleObject", Some(5), Expected::Value(5)).is_ok());
        assert!(error_check(&env, "WaitForSingleObject", Some(4), Expected::Value(5)).is_err());
        assert!(error_check(&env, "WaitForSingleObject", Some(0), Expected::Value(5)).is_err());
    }

    #[test]
    fn test_missing_code_uses_last_error() {
        let (source, env) = recorded();
        assert!(error_check(&env, "CreateEventW", None, Expected::default()).is_ok());

        source.set(5, "Access is denied.");
        let err = error_check(&env, "CreateEventW", None, Expected::default()).unwrap_err();
        assert_eq!(err.code, 5);
        assert_eq!(err.errno, 5);
        assert!(err.is(5));
        assert_eq!(err.message.as_deref(), Some("Access is denied."));
    }

    #[test]
    fn test_error_carries_last_error_for_explicit_codes() {
        let (source, env) = recorded();
        source.set(6, "The handle is invalid.");
        let err = error_check(&env, "CloseHandle", Some(0), Expected::NonZero).unwrap_err();
        assert_eq!(err.code, 0);
        assert_eq!(err.errno, 6);
        assert_eq!(
            err.to_string(),
            "Expected a non-zero result from CloseHandle but got zero instead. Error 6 from the OS was \"The handle is invalid.\""
        );
    }
}
