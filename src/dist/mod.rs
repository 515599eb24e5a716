//! Distributions and bindings
//!
//! A `Distribution` names the fragments a native library's binding is built
//! from. A `Binding` is what building it produces: the declaration layer plus
//! the callable library, created either by loading a precompiled artifact or
//! by compiling inline.

pub mod aggregate;
pub mod artifact;
pub mod compiler;
pub mod registry;
pub mod strategy;

pub use aggregate::{aggregate, DeclarationSet};
pub use artifact::{build_artifact, cdef_symbol, constant_symbol, find_artifact, load_artifact, LoadError};
pub use compiler::{shared_library_name, CCompiler};
pub use registry::{BindingRegistry, IsolationGuard, RegistrySnapshot};

use crate::error::{Error, Result};
use crate::ffi::{Declarations, FFIError, FFIResult, NativeLibrary};
use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const DEFAULT_MODULE_NAME: &str = "_nativebind";

/// One header or source file of a distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Path(PathBuf),
    /// Text compiled into the program, named for logs and errors.
    Inline { name: String, text: String },
}

impl Fragment {
    pub fn path(path: impl AsRef<Path>) -> Self {
        Fragment::Path(path.as_ref().to_path_buf())
    }

    pub fn inline(name: &str, text: &str) -> Self {
        Fragment::Inline {
            name: name.to_string(),
            text: text.to_string(),
        }
    }

    pub fn name(&self) -> Cow<'_, str> {
        match self {
            Fragment::Path(path) => path.to_string_lossy(),
            Fragment::Inline { name, .. } => Cow::Borrowed(name),
        }
    }

    pub fn read(&self) -> Result<Cow<'_, str>> {
        match self {
            Fragment::Path(path) => std::fs::read_to_string(path)
                .map(Cow::Owned)
                .map_err(|err| Error::resource_not_found(path, err)),
            Fragment::Inline { text, .. } => Ok(Cow::Borrowed(text)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    /// Library name callers ask the registry for
    pub name: String,
    /// Base name of the compiled artifact
    pub module_name: String,
    pub headers: Vec<Fragment>,
    pub sources: Vec<Fragment>,
    /// System libraries to link against and search for symbols
    pub libraries: Vec<String>,
}

impl Distribution {
    pub fn new(name: &str) -> Self {
        Distribution {
            name: name.to_string(),
            module_name: DEFAULT_MODULE_NAME.to_string(),
            headers: Vec::new(),
            sources: Vec::new(),
            libraries: Vec::new(),
        }
    }

    pub fn with_module_name(mut self, module_name: &str) -> Self {
        self.module_name = module_name.to_string();
        self
    }

    pub fn header(mut self, fragment: Fragment) -> Self {
        self.headers.push(fragment);
        self
    }

    pub fn source(mut self, fragment: Fragment) -> Self {
        self.sources.push(fragment);
        self
    }

    pub fn library(mut self, name: &str) -> Self {
        self.libraries.push(name.to_string());
        self
    }

    /// The bundled kernel32 declarations.
    pub fn kernel32() -> Self {
        Distribution::new("kernel32")
            .header(Fragment::inline(
                "typedefs.h",
                include_str!("../../cdefs/headers/typedefs.h"),
            ))
            .header(Fragment::inline(
                "structs.h",
                include_str!("../../cdefs/headers/structs.h"),
            ))
            .header(Fragment::inline(
                "functions.h",
                include_str!("../../cdefs/headers/functions.h"),
            ))
            .source(Fragment::inline("main.c", include_str!("../../cdefs/sources/main.c")))
            .library("kernel32")
    }

    pub fn load_definitions(&self) -> Result<DeclarationSet> {
        aggregate(&self.headers, &self.sources)
    }
}

/// How a binding was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadMode {
    /// Loaded from a precompiled artifact
    Prebuilt,
    /// Compiled inline
    Compiled,
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadMode::Prebuilt => f.write_str("prebuilt"),
            LoadMode::Compiled => f.write_str("compiled"),
        }
    }
}

pub struct Binding {
    mode: LoadMode,
    module: String,
    declarations: Declarations,
    // Fields drop in order: the library is unloaded before its scratch
    // directory is removed.
    library: NativeLibrary,
    scratch: Option<TempDir>,
}

impl Binding {
    pub(crate) fn new(
        mode: LoadMode,
        module: &str,
        declarations: Declarations,
        library: NativeLibrary,
        scratch: Option<TempDir>,
    ) -> Self {
        Binding {
            mode,
            module: module.to_string(),
            declarations,
            library,
            scratch,
        }
    }

    pub fn mode(&self) -> LoadMode {
        self.mode
    }

    /// Module name the library was compiled as.
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn declarations(&self) -> &Declarations {
        &self.declarations
    }

    pub fn library(&self) -> &NativeLibrary {
        &self.library
    }

    /// Scratch directory of an inline binding.
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(TempDir::path)
    }

    /// A declared function as the function pointer type `F`.
    ///
    /// # Safety
    /// `F` must match the function's C signature.
    pub unsafe fn function<F: Copy>(&self, name: &str) -> FFIResult<F> {
        if !self.declarations.declares_function(name) {
            return Err(FFIError::symbol_not_found(name, None));
        }
        self.library.function(name)
    }

    /// A declared constant or global. `#define` constants are narrowed from
    /// `long long` to `T` like a C integer conversion.
    ///
    /// # Safety
    /// The symbol must hold a value of type `T`; for a `#define`, `T` must be
    /// an integer type.
    pub unsafe fn constant<T: Copy>(&self, name: &str) -> FFIResult<T> {
        if !self.declarations.declares_constant(name) {
            return Err(FFIError::symbol_not_found(name, None));
        }
        if !self.declarations.is_define(name) {
            return self.library.constant(name);
        }

        let value: i64 = self
            .library
            .constant(&constant_symbol(&self.module, name))
            .map_err(|_| FFIError::symbol_not_found(name, Some(&self.module)))?;
        narrow(name, value)
    }
}

/// The low-order `size_of::<T>()` bytes of `value`.
///
/// # Safety
/// `T` must be an integer type.
unsafe fn narrow<T: Copy>(name: &str, value: i64) -> FFIResult<T> {
    let size = std::mem::size_of::<T>();
    if !matches!(size, 1 | 2 | 4 | 8) {
        return Err(FFIError::signature_mismatch(
            name,
            "an integer of at most 8 bytes",
            std::any::type_name::<T>(),
        ));
    }
    let bytes = value.to_ne_bytes();
    let start = if cfg!(target_endian = "big") { 8 - size } else { 0 };
    Ok(std::ptr::read_unaligned(bytes[start..].as_ptr() as *const T))
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("mode", &self.mode)
            .field("module", &self.module)
            .field("library", &self.library.path())
            .field("scratch", &self.scratch_dir())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel32_declarations_parse() {
        let distribution = Distribution::kernel32();
        assert_eq!(distribution.module_name, DEFAULT_MODULE_NAME);
        assert_eq!(distribution.libraries, vec!["kernel32"]);

        let set = distribution.load_definitions().unwrap();
        let declarations = Declarations::parse(&set.declarations).unwrap();
        assert!(declarations.declares_function("CloseHandle"));
        assert!(declarations.declares_function("handle_from_fd"));
        assert!(declarations.declares_constant("FILE_FLAG_SESSION_AWARE"));
        assert_eq!(
            declarations.resolve("LPSECURITY_ATTRIBUTES").unwrap().cname(),
            "SECURITY_ATTRIBUTES *"
        );
        assert!(declarations.new("OVERLAPPED[1]").is_ok());
        assert!(declarations.layout("BY_HANDLE_FILE_INFORMATION").is_some());
        assert!(set.source.contains("handle_from_fd"));
    }

    #[test]
    fn test_narrow_define_values() {
        unsafe {
            assert_eq!(narrow::<i32>("N", -5).unwrap(), -5);
            assert_eq!(narrow::<u16>("N", 0x1_0007).unwrap(), 7);
            assert_eq!(narrow::<i64>("N", i64::MAX).unwrap(), i64::MAX);
            assert!(matches!(
                narrow::<[u8; 16]>("N", 1),
                Err(FFIError::SignatureMismatch { .. })
            ));
        }
    }

    #[test]
    fn test_fragment_names() {
        assert_eq!(Fragment::inline("main.c", "").name(), "main.c");
        assert_eq!(Fragment::path("cdefs/a.h").name(), "cdefs/a.h");
    }

    #[test]
    fn test_builder() {
        let distribution = Distribution::new("demo")
            .with_module_name("_demo")
            .header(Fragment::inline("demo.h", "int add(int, int);"))
            .source(Fragment::inline("demo.c", "int add(int a, int b) { return a + b; }"))
            .library("m");
        assert_eq!(distribution.name, "demo");
        assert_eq!(distribution.module_name, "_demo");
        assert_eq!(distribution.headers.len(), 1);
        assert_eq!(distribution.libraries, vec!["m"]);
    }
}
