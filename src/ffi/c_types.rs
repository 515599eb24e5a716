//! C type naming, classification and layout

use crate::ffi::error::{FFIError, FFIResult};
use crate::ffi::CType;
use std::fmt;
use std::mem::{align_of, size_of};
use std::os::raw::{c_long, c_ulong};
use std::str::FromStr;

/// Structural category of a C type, as reported by `typeof`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CTypeKind {
    Void,
    Primitive,
    Pointer,
    Array,
    Function,
    Struct,
    Union,
}

impl CTypeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CTypeKind::Void => "void",
            CTypeKind::Primitive => "primitive",
            CTypeKind::Pointer => "pointer",
            CTypeKind::Array => "array",
            CTypeKind::Function => "function",
            CTypeKind::Struct => "struct",
            CTypeKind::Union => "union",
        }
    }
}

impl fmt::Display for CTypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CTypeKind {
    type Err = FFIError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "void" => Ok(CTypeKind::Void),
            "primitive" => Ok(CTypeKind::Primitive),
            "pointer" => Ok(CTypeKind::Pointer),
            "array" => Ok(CTypeKind::Array),
            "function" => Ok(CTypeKind::Function),
            "struct" => Ok(CTypeKind::Struct),
            "union" => Ok(CTypeKind::Union),
            other => Err(FFIError::unknown_type(other)),
        }
    }
}

impl CType {
    pub fn kind(&self) -> CTypeKind {
        match self {
            CType::Void => CTypeKind::Void,
            CType::Pointer(_) => CTypeKind::Pointer,
            CType::Array(_, _) => CTypeKind::Array,
            CType::Function(_, _) => CTypeKind::Function,
            CType::Struct(_) => CTypeKind::Struct,
            CType::Union(_) => CTypeKind::Union,
            _ => CTypeKind::Primitive,
        }
    }

    /// Canonical C spelling: `void *`, `void * *`, `void *[2]`, `int(*)(int, int)`.
    pub fn cname(&self) -> String {
        match self {
            CType::Array(_, _) => {
                let mut dims = String::new();
                let mut current = self;
                while let CType::Array(inner, len) = current {
                    match len {
                        Some(n) => dims.push_str(&format!("[{}]", n)),
                        None => dims.push_str("[]"),
                    }
                    current = inner;
                }
                format!("{}{}", current.cname(), dims)
            }
            CType::Pointer(inner) => match inner.as_ref() {
                CType::Function(params, ret) => {
                    format!("{}(*)({})", ret.cname(), join_params(params))
                }
                other => format!("{} *", other.cname()),
            },
            CType::Function(params, ret) => format!("{}({})", ret.cname(), join_params(params)),
            CType::Struct(name) | CType::Union(name) => name.clone(),
            primitive => primitive_name(primitive).to_string(),
        }
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cname())
    }
}

fn join_params(params: &[CType]) -> String {
    if params.is_empty() {
        return "void".to_string();
    }
    params.iter().map(CType::cname).collect::<Vec<_>>().join(", ")
}

fn primitive_name(c_type: &CType) -> &'static str {
    match c_type {
        CType::Void => "void",
        CType::Char => "char",
        CType::SChar => "signed char",
        CType::UChar => "unsigned char",
        CType::WChar => "wchar_t",
        CType::Short => "short",
        CType::UShort => "unsigned short",
        CType::Int => "int",
        CType::UInt => "unsigned int",
        CType::Long => "long",
        CType::ULong => "unsigned long",
        CType::LongLong => "long long",
        CType::ULongLong => "unsigned long long",
        CType::Float => "float",
        CType::Double => "double",
        CType::SizeT => "size_t",
        CType::IntPtr => "intptr_t",
        CType::UIntPtr => "uintptr_t",
        _ => "?",
    }
}

/// Maps a C base type spelling (qualifiers already stripped) to a primitive.
pub fn primitive_from_name(name: &str) -> Option<CType> {
    let c_type = match name {
        "void" => CType::Void,
        "char" => CType::Char,
        "signed char" => CType::SChar,
        "unsigned char" | "uint8_t" | "_Bool" | "bool" => CType::UChar,
        "int8_t" => CType::SChar,
        "wchar_t" => CType::WChar,
        "short" | "short int" | "signed short" | "int16_t" => CType::Short,
        "unsigned short" | "unsigned short int" | "uint16_t" => CType::UShort,
        "int" | "signed" | "signed int" | "int32_t" => CType::Int,
        "unsigned" | "unsigned int" | "uint32_t" => CType::UInt,
        "long" | "long int" | "signed long" => CType::Long,
        "unsigned long" | "unsigned long int" => CType::ULong,
        "long long" | "long long int" | "signed long long" | "int64_t" => CType::LongLong,
        "unsigned long long" | "unsigned long long int" | "uint64_t" => CType::ULongLong,
        "float" => CType::Float,
        "double" => CType::Double,
        "size_t" => CType::SizeT,
        "ssize_t" | "intptr_t" | "ptrdiff_t" => CType::IntPtr,
        "uintptr_t" => CType::UIntPtr,
        _ => return None,
    };
    Some(c_type)
}

/// A C declarator split into its pieces: `"const void *[2]"` becomes
/// base `"void"`, one pointer level and dimensions `[Some(2)]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declarator {
    pub base: String,
    pub pointers: usize,
    pub dims: Vec<Option<usize>>,
}

pub fn split_cdecl(cdecl: &str) -> FFIResult<Declarator> {
    let mut rest = cdecl.trim();
    if rest.is_empty() {
        return Err(FFIError::unknown_type(cdecl));
    }

    let mut dims = Vec::new();
    while rest.ends_with(']') {
        let open = rest
            .rfind('[')
            .ok_or_else(|| FFIError::unknown_type(cdecl))?;
        let inner = rest[open + 1..rest.len() - 1].trim();
        let len = if inner.is_empty() {
            None
        } else {
            Some(
                inner
                    .parse::<usize>()
                    .map_err(|_| FFIError::unknown_type(cdecl))?,
            )
        };
        dims.push(len);
        rest = rest[..open].trim_end();
    }
    dims.reverse();

    let mut pointers = 0;
    while let Some(stripped) = rest.strip_suffix('*') {
        pointers += 1;
        rest = stripped.trim_end();
    }

    let base = rest
        .split_whitespace()
        .filter(|token| !matches!(*token, "const" | "volatile" | "restrict" | "__restrict"))
        .collect::<Vec<_>>()
        .join(" ");

    if base.is_empty() || base.contains(|c: char| !(c.is_alphanumeric() || c == '_' || c == ' ')) {
        return Err(FFIError::unknown_type(cdecl));
    }

    Ok(Declarator {
        base,
        pointers,
        dims,
    })
}

impl Declarator {
    /// Wraps an already resolved base type in the declarator's pointers and arrays.
    pub fn apply(&self, base: CType) -> CType {
        let mut c_type = base;
        for _ in 0..self.pointers {
            c_type = CType::pointer_to(c_type);
        }
        for len in self.dims.iter().rev() {
            c_type = CType::array_of(c_type, *len);
        }
        c_type
    }
}

/// Get the size of a C type in bytes; `None` when the layout is not known
/// from the type alone (void, structs, unions, unsized arrays, functions).
pub fn c_type_size(c_type: &CType) -> Option<usize> {
    let size = match c_type {
        CType::Void | CType::Function(_, _) | CType::Struct(_) | CType::Union(_) => return None,
        CType::Char | CType::SChar | CType::UChar => 1,
        CType::WChar => size_of::<libc::wchar_t>(),
        CType::Short | CType::UShort => 2,
        CType::Int | CType::UInt | CType::Float => 4,
        CType::Long | CType::ULong => size_of::<c_long>(),
        CType::LongLong | CType::ULongLong | CType::Double => 8,
        CType::SizeT | CType::IntPtr | CType::UIntPtr | CType::Pointer(_) => size_of::<usize>(),
        CType::Array(inner, Some(len)) => c_type_size(inner)? * len,
        CType::Array(_, None) => return None,
    };
    Some(size)
}

/// Get the alignment of a C type
pub fn c_type_alignment(c_type: &CType) -> Option<usize> {
    let align = match c_type {
        CType::Void | CType::Function(_, _) | CType::Struct(_) | CType::Union(_) => return None,
        CType::Char | CType::SChar | CType::UChar => 1,
        CType::WChar => align_of::<libc::wchar_t>(),
        CType::Short | CType::UShort => 2,
        CType::Int | CType::UInt | CType::Float => 4,
        CType::Long | CType::ULong => align_of::<c_ulong>(),
        CType::LongLong | CType::ULongLong => align_of::<u64>(),
        CType::Double => align_of::<f64>(),
        CType::SizeT | CType::IntPtr | CType::UIntPtr | CType::Pointer(_) => align_of::<usize>(),
        CType::Array(inner, _) => c_type_alignment(inner)?,
    };
    Some(align)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cname_rendering() {
        assert_eq!(CType::void_pointer().cname(), "void *");
        assert_eq!(CType::pointer_to(CType::void_pointer()).cname(), "void * *");
        assert_eq!(CType::array_of(CType::void_pointer(), Some(2)).cname(), "void *[2]");
        assert_eq!(
            CType::array_of(CType::Struct("OVERLAPPED".into()), Some(1)).cname(),
            "OVERLAPPED[1]"
        );
        assert_eq!(CType::ULong.cname(), "unsigned long");
    }

    #[test]
    fn test_nested_array_cname() {
        let grid = CType::array_of(CType::array_of(CType::Int, Some(3)), Some(2));
        assert_eq!(grid.cname(), "int[2][3]");
    }

    #[test]
    fn test_function_pointer_cname() {
        let add = CType::Function(vec![CType::Int, CType::Int], Box::new(CType::Int));
        assert_eq!(CType::pointer_to(add).cname(), "int(*)(int, int)");
    }

    #[test]
    fn test_kinds() {
        assert_eq!(CType::Int.kind(), CTypeKind::Primitive);
        assert_eq!(CType::void_pointer().kind(), CTypeKind::Pointer);
        assert_eq!(CType::array_of(CType::Int, None).kind(), CTypeKind::Array);
        assert_eq!(CType::Void.kind(), CTypeKind::Void);
        assert_eq!("pointer".parse::<CTypeKind>().unwrap(), CTypeKind::Pointer);
        assert!("pointy".parse::<CTypeKind>().is_err());
    }

    #[test]
    fn test_split_cdecl() {
        let decl = split_cdecl("const void *[2]").unwrap();
        assert_eq!(decl.base, "void");
        assert_eq!(decl.pointers, 1);
        assert_eq!(decl.dims, vec![Some(2)]);

        let decl = split_cdecl("unsigned   long**").unwrap();
        assert_eq!(decl.base, "unsigned long");
        assert_eq!(decl.pointers, 2);
        assert!(decl.dims.is_empty());

        assert!(split_cdecl("").is_err());
        assert!(split_cdecl("int[x]").is_err());
        assert!(split_cdecl("int (*)(int)").is_err());
    }

    #[test]
    fn test_declarator_apply() {
        let decl = split_cdecl("int *[4][2]").unwrap();
        let c_type = decl.apply(CType::Int);
        assert_eq!(c_type.cname(), "int *[4][2]");
    }

    #[test]
    fn test_type_sizes() {
        assert_eq!(c_type_size(&CType::Char), Some(1));
        assert_eq!(c_type_size(&CType::Int), Some(4));
        assert_eq!(c_type_size(&CType::Double), Some(8));
        assert_eq!(c_type_size(&CType::void_pointer()), Some(size_of::<*const ()>()));
        assert_eq!(
            c_type_size(&CType::array_of(CType::Int, Some(3))),
            Some(12)
        );
        assert_eq!(c_type_size(&CType::Struct("X".into())), None);
        assert_eq!(c_type_alignment(&CType::Short), Some(2));
    }
}
