//! nativebind
//!
//! This crate provides the binding layer between safe Rust callers and a
//! native operating-system API: declaration fragments are aggregated,
//! compiled inline or loaded from a precompiled artifact, cached per
//! environment, and every wrapped call is validated on both sides of the
//! foreign-function boundary.

pub mod checks;
pub mod cli;
pub mod config;
pub mod dist;
pub mod env;
pub mod error;
pub mod ffi;
pub mod logging;
pub mod value;

// Re-export core types for convenience
pub use checks::{
    error_check, input_check, CheckMapping, CheckedCall, Expected, InputError, InputRule, MappingTable,
    NativeOperationError,
};
pub use config::{Config, ConfigError, LibraryMode};
pub use dist::{Binding, BindingRegistry, Distribution, Fragment, LoadError, LoadMode};
pub use env::{Environment, EnvironmentId, LastErrorSource, OutcomeCode};
pub use error::{Error, Result};
pub use ffi::{CData, CType, Declarations, FFIError, NativeLibrary};
pub use value::{Value, ValueType};
