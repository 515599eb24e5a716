//! Foreign Function Interface (FFI) layer
//!
//! This module provides the two halves of a binding: the declaration-aware
//! layer that knows C type names and builds native-shaped values, and the
//! callable library surface loaded from a shared library.

pub mod c_types;
pub mod cdata;
pub mod declarations;
pub mod error;
pub mod library;

/// C type representation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CType {
    // Primitive types
    Void,
    Char,
    SChar,
    UChar,
    WChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    SizeT,
    IntPtr,
    UIntPtr,

    // Pointer types
    Pointer(Box<CType>),

    // Array types
    Array(Box<CType>, Option<usize>),

    // Function type (return type last so pointers render as `ret(*)(params)`)
    Function(Vec<CType>, Box<CType>),

    // Struct/Union by declared name, layout lives in `Declarations`
    Struct(String),
    Union(String),
}

impl CType {
    pub fn pointer_to(inner: CType) -> Self {
        CType::Pointer(Box::new(inner))
    }

    pub fn array_of(inner: CType, len: Option<usize>) -> Self {
        CType::Array(Box::new(inner), len)
    }

    /// The `void *` shape shared by every opaque native handle.
    pub fn void_pointer() -> Self {
        CType::pointer_to(CType::Void)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, CType::Pointer(_))
    }
}

// Re-export key types from submodules
pub use c_types::{c_type_alignment, c_type_size, CTypeKind};
pub use cdata::CData;
pub use declarations::Declarations;
pub use error::{FFIError, FFIResult};
pub use library::NativeLibrary;
