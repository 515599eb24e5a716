//! A wrapped native call: validate inputs, call, validate the outcome
//!
//! ```no_run
//! use nativebind::checks::{CheckedCall, Expected, InputRule};
//! use nativebind::{Environment, Value};
//!
//! # fn close(handle: &Value) -> nativebind::Result<i32> {
//! let env = Environment::global();
//! CheckedCall::new(env, "CloseHandle")
//!     .check("handle", handle, &InputRule::handle())
//!     .expect(Expected::NonZero)
//!     .call(|| 1i32)
//! # }
//! ```

use crate::checks::error::{error_check, Expected};
use crate::checks::input::{input_check, InputError, InputRule};
use crate::env::Environment;
use crate::error::Result;
use crate::value::Value;
use std::ffi::c_void;
use tracing::{debug, trace};

/// A native return value that can be compared against an `Expected`.
pub trait NativeReturn {
    /// The integer to check, or `None` to check the last error instead.
    fn outcome_code(&self) -> Option<i64>;
}

macro_rules! integer_returns {
    ($($ty:ty),*) => {
        $(
            impl NativeReturn for $ty {
                fn outcome_code(&self) -> Option<i64> {
                    Some(*self as i64)
                }
            }
        )*
    };
}

integer_returns!(i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);

impl NativeReturn for bool {
    fn outcome_code(&self) -> Option<i64> {
        Some(i64::from(*self))
    }
}

impl NativeReturn for () {
    fn outcome_code(&self) -> Option<i64> {
        None
    }
}

impl NativeReturn for *mut c_void {
    fn outcome_code(&self) -> Option<i64> {
        Some(*self as usize as i64)
    }
}

/// PRE -> NATIVE -> POST for one wrapped operation. The first failing input
/// check is terminal: the native closure is never invoked.
pub struct CheckedCall<'a> {
    env: &'a Environment,
    operation: String,
    expected: Expected,
    tolerated: Vec<i64>,
    failure: Option<InputError>,
}

impl<'a> CheckedCall<'a> {
    pub fn new(env: &'a Environment, operation: &str) -> Self {
        CheckedCall {
            env,
            operation: operation.to_string(),
            expected: Expected::default(),
            tolerated: Vec::new(),
            failure: None,
        }
    }

    /// Validate one input. Checks after the first failure are skipped.
    pub fn check(mut self, name: &str, value: &Value, rule: &InputRule) -> Self {
        if self.failure.is_none() {
            if let Err(err) = input_check(name, value, rule) {
                self.failure = Some(err);
            }
        }
        self
    }

    pub fn expect(mut self, expected: Expected) -> Self {
        self.expected = expected;
        self
    }

    /// Treat a failed outcome whose last error is `errno` as success.
    pub fn tolerate(mut self, errno: i64) -> Self {
        self.tolerated.push(errno);
        self
    }

    /// Run `native` and check the code it returns.
    pub fn call<T, F>(self, native: F) -> Result<T>
    where
        T: NativeReturn,
        F: FnOnce() -> T,
    {
        self.run(native, |value| value.outcome_code())
    }

    /// Run `native` and check the environment's last error, whatever it returns.
    pub fn call_with_last_error<T, F>(self, native: F) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        self.run(native, |_| None)
    }

    fn run<T, F, C>(self, native: F, code_of: C) -> Result<T>
    where
        F: FnOnce() -> T,
        C: FnOnce(&T) -> Option<i64>,
    {
        if let Some(err) = self.failure {
            debug!(operation = %self.operation, input = %err.name, "rejected before native call");
            return Err(err.into());
        }

        trace!(operation = %self.operation, "native call");
        let value = native();
        let code = code_of(&value);

        match error_check(self.env, &self.operation, code, self.expected) {
            Ok(()) => Ok(value),
            Err(err) if self.tolerated.iter().any(|errno| err.is(*errno)) => {
                debug!(operation = %self.operation, errno = err.errno, "tolerated outcome");
                Ok(value)
            }
            Err(err) => Err(err.into()),
        }
    }
}
