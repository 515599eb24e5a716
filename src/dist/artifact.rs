//! Precompiled artifacts
//!
//! An artifact is a shared library named after the distribution's module. On
//! top of the compiled sources it exports `<module>_cdef`, a NUL-terminated
//! copy of the declaration blob, so loading it needs no compilation at all.
//! Every `#define` constant is exported as `<module>_const_<NAME>`, a
//! `long long`; inline bindings carry the same exports.

use crate::config::Config;
use crate::dist::compiler::{shared_library_name, CCompiler};
use crate::dist::{Binding, Distribution, LoadMode};
use crate::error::Result;
use crate::ffi::{Declarations, NativeLibrary};
use std::ffi::{c_char, CStr};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const SEARCH_PATH_ENV_VAR: &str = "NATIVEBIND_PATH";

/// Loading a precompiled artifact failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// Not found, not loadable or missing its declaration blob. The binding
    /// can still be produced by compiling inline.
    #[error("Artifact '{module}' is unavailable: {reason}")]
    ArtifactUnavailable { module: String, reason: String },

    /// The artifact is present but its declaration blob is unusable.
    #[error("Artifact {} is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
}

impl LoadError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, LoadError::ArtifactUnavailable { .. })
    }

    fn unavailable(module: &str, reason: impl Into<String>) -> Self {
        LoadError::ArtifactUnavailable {
            module: module.to_string(),
            reason: reason.into(),
        }
    }
}

/// Name of the symbol holding the embedded declaration blob.
pub fn cdef_symbol(module: &str) -> String {
    format!("{}_cdef", module)
}

/// Name of the symbol holding the value of `#define name`.
pub fn constant_symbol(module: &str, name: &str) -> String {
    format!("{}_const_{}", module, name)
}

/// `source` followed by the exports of `declarations`' `#define` constants.
/// A value given in the header is used when the source leaves the name
/// undefined.
pub(crate) fn with_constant_exports(source: &str, module: &str, declarations: &Declarations) -> String {
    let mut out = source.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    for (name, value) in declarations.defines() {
        if let Some(value) = value {
            out.push_str(&format!("\n#ifndef {name}\n#define {name} {value}\n#endif"));
        }
        out.push_str(&format!(
            "\nconst long long {} = (long long)({});\n",
            constant_symbol(module, name),
            name
        ));
    }
    out
}

/// Directories searched for artifacts: the configured `search_path`, then
/// `NATIVEBIND_PATH`, then the running executable's directory.
pub fn search_path(config: &Config) -> Vec<PathBuf> {
    let mut dirs = config.search_path.clone();
    if let Some(value) = std::env::var_os(SEARCH_PATH_ENV_VAR) {
        dirs.extend(std::env::split_paths(&value).filter(|dir| !dir.as_os_str().is_empty()));
    }
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        dirs.push(dir);
    }
    dirs
}

/// First `dirs` entry holding the artifact for `module`.
pub fn find_artifact(module: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    let file_name = shared_library_name(module);
    dirs.iter()
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
}

/// Load `distribution`'s artifact from `dirs` as a prebuilt binding.
pub fn load_artifact(distribution: &Distribution, dirs: &[PathBuf]) -> Result<Binding> {
    let module = distribution.module_name.as_str();
    let path = find_artifact(module, dirs).ok_or_else(|| {
        LoadError::unavailable(
            module,
            format!("{} not found on the search path", shared_library_name(module)),
        )
    })?;
    debug!(module, path = %path.display(), "found artifact");

    let library = NativeLibrary::open(&path)
        .and_then(|library| library.with_system_libraries(&distribution.libraries))
        .map_err(|err| LoadError::unavailable(module, err.to_string()))?;

    let symbol = cdef_symbol(module);
    let blob = library
        .symbol(&symbol)
        .map_err(|_| LoadError::unavailable(module, format!("missing symbol '{}'", symbol)))?;

    // SAFETY: `<module>_cdef` is a NUL-terminated byte array written by
    // `build_artifact`, and `library` keeps it mapped.
    let text = unsafe { CStr::from_ptr(blob as *const c_char) }
        .to_str()
        .map_err(|err| LoadError::Corrupt {
            path: path.clone(),
            reason: format!("declarations are not valid UTF-8: {}", err),
        })?
        .to_string();

    let declarations = Declarations::parse(&text)?;
    info!(module, path = %path.display(), "loaded precompiled artifact");
    Ok(Binding::new(LoadMode::Prebuilt, module, declarations, library, None))
}

/// Compile `distribution` into `out_dir` as a loadable artifact and return
/// its path.
pub fn build_artifact(distribution: &Distribution, out_dir: &Path, compiler: &CCompiler) -> Result<PathBuf> {
    let module = distribution.module_name.as_str();
    let set = distribution.load_definitions()?;
    // Refuse to ship declarations that would not load.
    let declarations = Declarations::parse(&set.declarations)?;

    fs::create_dir_all(out_dir)?;
    let output = out_dir.join(shared_library_name(module));
    let scratch = tempfile::Builder::new().prefix("nativebind-build-").tempdir()?;

    let mut source = with_constant_exports(&set.source, module, &declarations);
    source.push_str(&embedded_blob(&cdef_symbol(module), &set.declarations));

    compiler.compile_shared(&source, scratch.path(), &output, &distribution.libraries)?;
    info!(module, path = %output.display(), "built artifact");
    Ok(output)
}

/// A C definition of `symbol` as a NUL-terminated byte array holding `text`.
/// Written as an initializer list since compilers cap string literal length.
fn embedded_blob(symbol: &str, text: &str) -> String {
    let mut out = format!("\nconst unsigned char {}[] = {{", symbol);
    for (i, byte) in text.bytes().chain(std::iter::once(0)).enumerate() {
        if i % 16 == 0 {
            out.push_str("\n    ");
        }
        out.push_str(&format!("{},", byte));
    }
    out.push_str("\n};\n");
    out
}
