//! FFI-specific error types and handling

use std::fmt;

/// FFI-specific errors
#[derive(Debug, Clone, PartialEq)]
pub enum FFIError {
    /// A C type spelling that neither the primitives nor the declarations know
    UnknownType {
        cdecl: String,
    },

    /// The value's layout is not known, so it cannot be allocated
    OpaqueLayout {
        cname: String,
    },

    /// Operation not valid for this C type
    InvalidOperation {
        operation: String,
        cname: String,
    },

    /// Element access past the end of a native array
    IndexOutOfBounds {
        cname: String,
        index: usize,
        len: usize,
    },

    /// Library loading error
    LibraryLoad {
        library: String,
        error: String,
    },

    /// Symbol resolution error
    SymbolNotFound {
        symbol: String,
        library: Option<String>,
    },

    /// Function signature mismatch
    SignatureMismatch {
        function: String,
        expected: String,
        found: String,
    },

    /// Invalid FFI declaration
    InvalidDeclaration {
        name: String,
        reason: String,
    },
}

impl fmt::Display for FFIError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FFIError::UnknownType { cdecl } => {
                write!(f, "Unknown C type '{}'", cdecl)
            }

            FFIError::OpaqueLayout { cname } => {
                write!(f, "Layout of '{}' is not known", cname)
            }

            FFIError::InvalidOperation { operation, cname } => {
                write!(f, "Cannot {} a value of type '{}'", operation, cname)
            }

            FFIError::IndexOutOfBounds { cname, index, len } => {
                write!(f, "Index {} out of bounds for '{}' (length {})", index, cname, len)
            }

            FFIError::LibraryLoad { library, error } => {
                write!(f, "Failed to load library '{}': {}", library, error)
            }

            FFIError::SymbolNotFound { symbol, library } => match library {
                Some(lib) => write!(f, "Symbol '{}' not found in library '{}'", symbol, lib),
                None => write!(f, "Symbol '{}' not found", symbol),
            },

            FFIError::SignatureMismatch {
                function,
                expected,
                found,
            } => {
                write!(
                    f,
                    "Function '{}' signature mismatch: expected '{}', found '{}'",
                    function, expected, found
                )
            }

            FFIError::InvalidDeclaration { name, reason } => {
                write!(f, "Invalid declaration for '{}': {}", name, reason)
            }
        }
    }
}

impl std::error::Error for FFIError {}

/// Result type for FFI operations
pub type FFIResult<T> = Result<T, FFIError>;

/// Helper functions for creating common FFI errors
impl FFIError {
    pub fn unknown_type(cdecl: &str) -> Self {
        Self::UnknownType {
            cdecl: cdecl.to_string(),
        }
    }

    pub fn opaque_layout(cname: &str) -> Self {
        Self::OpaqueLayout {
            cname: cname.to_string(),
        }
    }

    pub fn invalid_operation(operation: &str, cname: &str) -> Self {
        Self::InvalidOperation {
            operation: operation.to_string(),
            cname: cname.to_string(),
        }
    }

    pub fn index_out_of_bounds(cname: &str, index: usize, len: usize) -> Self {
        Self::IndexOutOfBounds {
            cname: cname.to_string(),
            index,
            len,
        }
    }

    pub fn library_load(library: &str, error: &str) -> Self {
        Self::LibraryLoad {
            library: library.to_string(),
            error: error.to_string(),
        }
    }

    pub fn symbol_not_found(symbol: &str, library: Option<&str>) -> Self {
        Self::SymbolNotFound {
            symbol: symbol.to_string(),
            library: library.map(|s| s.to_string()),
        }
    }

    pub fn signature_mismatch(function: &str, expected: &str, found: &str) -> Self {
        Self::SignatureMismatch {
            function: function.to_string(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    pub fn invalid_declaration(name: &str, reason: &str) -> Self {
        Self::InvalidDeclaration {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = FFIError::unknown_type("FOOBAR *");
        assert_eq!(error.to_string(), "Unknown C type 'FOOBAR *'");
    }

    #[test]
    fn test_symbol_not_found() {
        let error = FFIError::symbol_not_found("missing_func", Some("libtest.so"));
        assert_eq!(
            error.to_string(),
            "Symbol 'missing_func' not found in library 'libtest.so'"
        );

        let error = FFIError::symbol_not_found("missing_func", None);
        assert_eq!(error.to_string(), "Symbol 'missing_func' not found");
    }

    #[test]
    fn test_index_out_of_bounds() {
        let error = FFIError::index_out_of_bounds("void *[1]", 3, 1);
        assert_eq!(
            error.to_string(),
            "Index 3 out of bounds for 'void *[1]' (length 1)"
        );
    }
}
