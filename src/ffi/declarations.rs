//! Declaration layer
//!
//! `Declarations` is the declaration-aware half of a binding. It reads the
//! aggregated declaration blob once, records the type names, struct layouts,
//! functions and constants it declares, and from then on resolves C type
//! spellings and builds native-shaped values (`new`, `cast`, `null`).
//!
//! Only names and shapes are extracted here; the blob itself is compiled by
//! the external C compiler.

use crate::ffi::c_types::{c_type_alignment, c_type_size, primitive_from_name, split_cdecl};
use crate::ffi::cdata::CData;
use crate::ffi::error::{FFIError, FFIResult};
use crate::ffi::CType;
use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub size: usize,
    pub align: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Declarations {
    source: String,
    typedefs: IndexMap<String, CType>,
    layouts: HashMap<String, Layout>,
    functions: IndexSet<String>,
    constants: IndexSet<String>,
    /// Object-like `#define` constants. `None` when the header leaves the
    /// value (`...`) to the compiled source.
    defines: IndexMap<String, Option<String>>,
}

fn comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/|//[^\n]*").expect("valid regex"))
}

fn directive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^[ \t]*#.*$").expect("valid regex"))
}

fn object_define_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*#[ \t]*define[ \t]+([A-Za-z_]\w*)(?:[ \t]+(.*?))?[ \t]*$").expect("valid regex")
    })
}

fn aggregate_head_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(typedef\s+)?(struct|union)\s*(\w*)\s*\{").expect("valid regex")
    })
}

fn declarator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(.*?)([A-Za-z_]\w*)\s*((?:\[\s*\d*\s*\])*)$").expect("valid regex")
    })
}

fn fn_pointer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(.*?)\(\s*\*\s*([A-Za-z_]\w*)\s*\)\s*\((.*)\)$").expect("valid regex")
    })
}

fn constant_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:static\s+|extern\s+)?const\s+[\w\s\*]*?\b([A-Za-z_]\w*)\s*(?:=.*)?$")
            .expect("valid regex")
    })
}

/// Type names the Windows headers provide, resolved the way `windows.h`
/// defines them (wide-character variants for the `T` names).
fn builtin_type(name: &str) -> Option<CType> {
    let void_ptr = CType::void_pointer;
    let c_type = match name {
        "BOOL" | "INT" | "LONG32" => CType::Int,
        "BOOLEAN" | "BYTE" | "UCHAR" => CType::UChar,
        "CHAR" | "CCHAR" => CType::Char,
        "WCHAR" | "TCHAR" => CType::WChar,
        "SHORT" => CType::Short,
        "USHORT" | "WORD" | "ATOM" => CType::UShort,
        "UINT" | "DWORD32" | "ULONG32" => CType::UInt,
        "LONG" | "HRESULT" => CType::Int,
        "ULONG" | "DWORD" => CType::UInt,
        "LONGLONG" | "LONG64" | "INT64" => CType::LongLong,
        "ULONGLONG" | "DWORD64" | "ULONG64" | "UINT64" => CType::ULongLong,
        "FLOAT" => CType::Float,
        "SIZE_T" => CType::SizeT,
        "SSIZE_T" | "LONG_PTR" | "INT_PTR" | "LPARAM" => CType::IntPtr,
        "ULONG_PTR" | "DWORD_PTR" | "UINT_PTR" | "WPARAM" => CType::UIntPtr,
        "HANDLE" | "PVOID" | "LPVOID" | "LPCVOID" | "HMODULE" | "HINSTANCE" | "HWND"
        | "HKEY" | "HLOCAL" | "HGLOBAL" | "FARPROC" => void_ptr(),
        "PHANDLE" | "LPHANDLE" => CType::pointer_to(void_ptr()),
        "PDWORD" | "LPDWORD" | "PULONG" => CType::pointer_to(CType::UInt),
        "PBOOL" | "LPBOOL" | "LPINT" => CType::pointer_to(CType::Int),
        "PWORD" | "LPWORD" => CType::pointer_to(CType::UShort),
        "PBYTE" | "LPBYTE" => CType::pointer_to(CType::UChar),
        "PSIZE_T" => CType::pointer_to(CType::SizeT),
        "LPSTR" | "LPCSTR" | "PSTR" | "PCSTR" => CType::pointer_to(CType::Char),
        "LPWSTR" | "LPCWSTR" | "PWSTR" | "PCWSTR" | "LPTSTR" | "LPCTSTR" => {
            CType::pointer_to(CType::WChar)
        }
        _ => return None,
    };
    Some(c_type)
}

/// Splits declaration text into top-level statements, keeping brace-enclosed
/// bodies attached to the statement they belong to.
fn statements(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for c in text.chars() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ';' if depth == 0 => {
                let statement = current.split_whitespace().collect::<Vec<_>>().join(" ");
                if !statement.is_empty() {
                    out.push(statement);
                }
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }

    let tail = current.split_whitespace().collect::<Vec<_>>().join(" ");
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Number of elements named by a member declarator such as `` (anonymous),
/// `u` or `u[2][3]`.
fn element_count(declarator: &str) -> Option<usize> {
    let declarator = declarator.trim();
    match declarator.find('[') {
        None => Some(1),
        Some(open) => declarator[open..]
            .split(|c| c == '[' || c == ']')
            .map(str::trim)
            .filter(|dim| !dim.is_empty())
            .try_fold(1usize, |count, dim| count.checked_mul(dim.parse::<usize>().ok()?)),
    }
}

fn align_up(offset: usize, align: usize) -> Option<usize> {
    offset.checked_next_multiple_of(align.max(1))
}

impl Declarations {
    /// Reads a declaration blob. Unknown type names in typedefs are errors;
    /// struct fields of unknown type only make the struct's layout opaque.
    pub fn parse(text: &str) -> FFIResult<Self> {
        let mut declarations = Declarations {
            source: text.to_string(),
            ..Declarations::default()
        };

        let without_comments = comment_re().replace_all(text, " ");
        for captures in object_define_re().captures_iter(&without_comments) {
            let name = captures[1].to_string();
            let value = captures.get(2).map_or("", |value| value.as_str().trim());
            if value.is_empty() || value.contains(['"', '\'']) {
                debug!(name = %name, "skipping non-integer #define");
                continue;
            }
            let value = (value != "...").then(|| value.to_string());
            declarations.constants.insert(name.clone());
            declarations.defines.insert(name, value);
        }
        let cleaned = directive_re().replace_all(&without_comments, "");

        for statement in statements(&cleaned) {
            declarations.statement(&statement)?;
        }

        debug!(
            typedefs = declarations.typedefs.len(),
            functions = declarations.functions.len(),
            constants = declarations.constants.len(),
            "parsed declarations"
        );
        Ok(declarations)
    }

    fn statement(&mut self, statement: &str) -> FFIResult<()> {
        if let Some(captures) = aggregate_head_re().captures(statement) {
            let is_typedef = captures.get(1).is_some();
            let is_union = &captures[2] == "union";
            let tag = captures[3].to_string();
            return self.aggregate(statement, is_typedef, is_union, &tag);
        }

        if let Some(body) = statement.strip_prefix("typedef ") {
            return self.typedef(body.trim());
        }

        if let Some(captures) = constant_re().captures(statement) {
            self.constants.insert(captures[1].to_string());
            return Ok(());
        }

        if let Some(open) = statement.find('(') {
            let head = statement[..open].trim();
            if let Some(captures) = declarator_re().captures(head) {
                if !captures[1].trim().is_empty() {
                    self.functions.insert(captures[2].to_string());
                    return Ok(());
                }
            }
            return Err(FFIError::invalid_declaration(statement, "cannot find function name"));
        }

        // A global variable exported by the library.
        if let Some(captures) = declarator_re().captures(statement) {
            if !captures[1].trim().is_empty() {
                self.constants.insert(captures[2].to_string());
                return Ok(());
            }
        }

        Err(FFIError::invalid_declaration(statement, "unrecognized declaration"))
    }

    fn typedef(&mut self, body: &str) -> FFIResult<()> {
        if let Some(captures) = fn_pointer_re().captures(body) {
            let name = captures[2].to_string();
            let ret = self.resolve(captures[1].trim())?;
            let params = self.resolve_params(&captures[3])?;
            self.typedefs.insert(
                name,
                CType::pointer_to(CType::Function(params, Box::new(ret))),
            );
            return Ok(());
        }

        let captures = declarator_re()
            .captures(body)
            .ok_or_else(|| FFIError::invalid_declaration(body, "malformed typedef"))?;
        let name = captures[2].to_string();
        // `typedef int... SOCKET;` declares an integer of unspecified width.
        let target = captures[1].trim().replace("...", "");
        let target = format!("{}{}", target.trim(), &captures[3]);

        let c_type = self
            .resolve(&target)
            .map_err(|_| FFIError::invalid_declaration(&name, &format!("unknown type '{}'", target)))?;
        self.typedefs.insert(name, c_type);
        Ok(())
    }

    fn resolve_params(&self, params: &str) -> FFIResult<Vec<CType>> {
        let params = params.trim();
        if params.is_empty() || params == "void" {
            return Ok(Vec::new());
        }
        params
            .split(',')
            .map(|param| self.resolve_param(param.trim()))
            .collect()
    }

    /// Resolves a parameter that may or may not carry a name.
    fn resolve_param(&self, param: &str) -> FFIResult<CType> {
        if let Ok(c_type) = self.resolve(param) {
            return Ok(c_type);
        }
        let captures = declarator_re()
            .captures(param)
            .ok_or_else(|| FFIError::unknown_type(param))?;
        self.resolve(&format!("{}{}", captures[1].trim(), &captures[3]))
    }

    fn aggregate(&mut self, statement: &str, is_typedef: bool, is_union: bool, tag: &str) -> FFIResult<()> {
        let open = statement
            .find('{')
            .ok_or_else(|| FFIError::invalid_declaration(statement, "missing body"))?;
        let close = statement
            .rfind('}')
            .ok_or_else(|| FFIError::invalid_declaration(statement, "unterminated body"))?;
        let body = &statement[open + 1..close];
        let names = statement[close + 1..].trim();

        let keyword = if is_union { "union" } else { "struct" };
        let tag_name = (!tag.is_empty()).then(|| format!("{} {}", keyword, tag));

        let typedef_name = names
            .split(',')
            .map(str::trim)
            .find(|name| is_typedef && !name.starts_with('*') && !name.is_empty())
            .map(str::to_string);
        let main_name = typedef_name
            .or_else(|| tag_name.clone())
            .ok_or_else(|| FFIError::invalid_declaration(statement, "anonymous aggregate has no name"))?;

        let base = if is_union {
            CType::Union(main_name.clone())
        } else {
            CType::Struct(main_name.clone())
        };

        if let Some(tag_name) = tag_name {
            self.typedefs.insert(tag_name, base.clone());
        }
        if is_typedef {
            for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                let alias = name.trim_start_matches(|c: char| c == '*' || c.is_whitespace());
                let stars = name[..name.len() - alias.len()].matches('*').count();
                let mut c_type = base.clone();
                for _ in 0..stars {
                    c_type = CType::pointer_to(c_type);
                }
                self.typedefs.insert(alias.to_string(), c_type);
            }
        }

        if let Some(layout) = self.layout_of_fields(body, is_union) {
            self.layouts.insert(main_name, layout);
        }
        Ok(())
    }

    /// Computes the C layout of a field list, descending into nested struct
    /// and union members. `None` if any field is of unknown size or the
    /// layout does not fit in `usize`.
    fn layout_of_fields(&self, body: &str, is_union: bool) -> Option<Layout> {
        let mut offset = 0usize;
        let mut max_align = 1usize;
        let mut max_size = 0usize;

        for field in statements(body) {
            let (size, align) = match aggregate_head_re().captures(&field) {
                Some(captures) => {
                    let open = field.find('{')?;
                    let close = field.rfind('}')?;
                    let nested = self.layout_of_fields(&field[open + 1..close], &captures[2] == "union")?;
                    let count = element_count(&field[close + 1..])?;
                    (nested.size.checked_mul(count)?, nested.align)
                }
                None => {
                    let captures = declarator_re().captures(&field)?;
                    let c_type = self
                        .resolve(&format!("{}{}", captures[1].trim(), &captures[3]))
                        .ok()?;
                    (self.sizeof(&c_type)?, self.alignof(&c_type)?)
                }
            };

            max_align = max_align.max(align);
            max_size = max_size.max(size);
            offset = align_up(offset, align)?.checked_add(size)?;
        }

        let size = if is_union { max_size } else { offset };
        Some(Layout {
            size: align_up(size, max_align)?,
            align: max_align,
        })
    }

    fn resolve_base(&self, name: &str) -> Option<CType> {
        if let Some(c_type) = self.typedefs.get(name) {
            return Some(c_type.clone());
        }
        if let Some(c_type) = primitive_from_name(name).or_else(|| builtin_type(name)) {
            return Some(c_type);
        }
        if name.starts_with("struct ") {
            return Some(CType::Struct(name.to_string()));
        }
        if name.starts_with("union ") {
            return Some(CType::Union(name.to_string()));
        }
        None
    }

    /// Resolves a C type spelling such as `"HANDLE"` or `"OVERLAPPED[1]"`.
    pub fn resolve(&self, cdecl: &str) -> FFIResult<CType> {
        let declarator = split_cdecl(cdecl)?;
        let base = self
            .resolve_base(&declarator.base)
            .ok_or_else(|| FFIError::unknown_type(cdecl))?;
        Ok(declarator.apply(base))
    }

    pub fn layout(&self, name: &str) -> Option<Layout> {
        self.layouts.get(name).copied()
    }

    pub fn sizeof(&self, c_type: &CType) -> Option<usize> {
        match c_type {
            CType::Struct(name) | CType::Union(name) => self.layout(name).map(|l| l.size),
            CType::Array(inner, Some(len)) => self.sizeof(inner)?.checked_mul(*len),
            other => c_type_size(other),
        }
    }

    pub fn alignof(&self, c_type: &CType) -> Option<usize> {
        match c_type {
            CType::Struct(name) | CType::Union(name) => self.layout(name).map(|l| l.align),
            CType::Array(inner, _) => self.alignof(inner),
            other => c_type_alignment(other),
        }
    }

    /// Allocates zeroed native memory. Like C's `malloc`-and-point, a pointer
    /// type allocates one pointee and an array type allocates every element.
    pub fn new(&self, cdecl: &str) -> FFIResult<CData> {
        let c_type = self.resolve(cdecl)?;
        match &c_type {
            CType::Pointer(inner) => {
                let size = self
                    .sizeof(inner)
                    .ok_or_else(|| FFIError::opaque_layout(&inner.cname()))?;
                Ok(CData::allocate(c_type.clone(), size, Some(size)))
            }
            CType::Array(inner, Some(len)) => {
                let size = self
                    .sizeof(inner)
                    .ok_or_else(|| FFIError::opaque_layout(&inner.cname()))?;
                let total = size
                    .checked_mul(*len)
                    .filter(|total| *total <= isize::MAX as usize)
                    .ok_or_else(|| FFIError::invalid_declaration(cdecl, "array too large to allocate"))?;
                Ok(CData::allocate(c_type.clone(), total, Some(size)))
            }
            other => Err(FFIError::invalid_operation("allocate", &other.cname())),
        }
    }

    /// Reinterprets `address` as a pointer of type `cdecl`.
    pub fn cast(&self, cdecl: &str, address: usize) -> FFIResult<CData> {
        let c_type = self.resolve(cdecl)?;
        match &c_type {
            CType::Pointer(inner) => {
                let element_size = self.sizeof(inner);
                Ok(CData::view(c_type.clone(), address, element_size))
            }
            other => Err(FFIError::invalid_operation("cast an address to", &other.cname())),
        }
    }

    pub fn null(&self) -> CData {
        CData::null()
    }

    pub fn type_of(&self, data: &CData) -> CType {
        data.ctype().clone()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn functions(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(String::as_str)
    }

    pub fn constants(&self) -> impl Iterator<Item = &str> {
        self.constants.iter().map(String::as_str)
    }

    pub fn declares_function(&self, name: &str) -> bool {
        self.functions.contains(name)
    }

    pub fn declares_constant(&self, name: &str) -> bool {
        self.constants.contains(name)
    }

    /// `#define` constants with the value the header gives, if any.
    pub fn defines(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.defines
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_deref()))
    }

    pub fn is_define(&self, name: &str) -> bool {
        self.defines.contains_key(name)
    }
}
