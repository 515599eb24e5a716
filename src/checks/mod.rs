//! Boundary validation
//!
//! Every wrapped native operation validates its inputs before crossing into
//! native code and validates the outcome after returning. Failures are
//! terminal for the call.

pub mod call;
pub mod error;
pub mod input;

pub use call::{CheckedCall, NativeReturn};
pub use error::{error_check, Expected, NativeOperationError};
pub use input::{input_check, CheckMapping, InputError, InputRule, MappingSnapshot, MappingTable};
