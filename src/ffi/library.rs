//! Dynamic library loading and symbol resolution
//!
//! A `NativeLibrary` is the callable surface of a binding: the compiled
//! artifact itself plus the system libraries it was linked against, searched
//! in that order.

use crate::ffi::error::{FFIError, FFIResult};
use std::ffi::{c_void, CString};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Handle to one loaded dynamic library
struct LibraryHandle {
    handle: *mut c_void,
    name: String,
}

pub struct NativeLibrary {
    path: PathBuf,
    primary: LibraryHandle,
    dependencies: Vec<LibraryHandle>,
}

// dlopen/LoadLibrary handles are process-wide and symbol lookup on them is
// thread-safe; the handles are only released in `Drop`.
unsafe impl Send for NativeLibrary {}
unsafe impl Sync for NativeLibrary {}

impl NativeLibrary {
    /// Load a dynamic library from an explicit path
    pub fn open(path: &Path) -> FFIResult<Self> {
        let name = path.display().to_string();
        let handle = open_path(path, &name)?;
        debug!(library = %name, "loaded native library");

        Ok(NativeLibrary {
            path: path.to_path_buf(),
            primary: LibraryHandle { handle, name },
            dependencies: Vec::new(),
        })
    }

    /// Also search the named system libraries (e.g. `kernel32`) for symbols
    /// the artifact does not define itself.
    pub fn with_system_libraries<S: AsRef<str>>(mut self, names: &[S]) -> FFIResult<Self> {
        for name in names {
            let name = name.as_ref();
            let handle = open_system(name)?;
            self.dependencies.push(LibraryHandle {
                handle,
                name: name.to_string(),
            });
        }
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve a symbol from the artifact, then from each dependency
    pub fn symbol(&self, name: &str) -> FFIResult<*mut c_void> {
        let c_name = CString::new(name)
            .map_err(|_| FFIError::symbol_not_found(name, Some(&self.primary.name)))?;

        std::iter::once(&self.primary)
            .chain(self.dependencies.iter())
            .map(|lib| lookup(lib.handle, &c_name))
            .find(|symbol| !symbol.is_null())
            .ok_or_else(|| FFIError::symbol_not_found(name, Some(&self.primary.name)))
    }

    pub fn has_symbol(&self, name: &str) -> bool {
        self.symbol(name).is_ok()
    }

    /// Reinterpret an exported function as the function pointer type `F`.
    ///
    /// # Safety
    /// `F` must be an `extern "C" fn` type matching the symbol's real signature.
    pub unsafe fn function<F: Copy>(&self, name: &str) -> FFIResult<F> {
        if std::mem::size_of::<F>() != std::mem::size_of::<*mut c_void>() {
            return Err(FFIError::signature_mismatch(
                name,
                "a function pointer",
                std::any::type_name::<F>(),
            ));
        }
        let symbol = self.symbol(name)?;
        Ok(std::mem::transmute_copy::<*mut c_void, F>(&symbol))
    }

    /// Read an exported constant.
    ///
    /// # Safety
    /// The symbol must name readable data of type `T`.
    pub unsafe fn constant<T: Copy>(&self, name: &str) -> FFIResult<T> {
        let symbol = self.symbol(name)?;
        Ok(std::ptr::read_unaligned(symbol as *const T))
    }
}

impl Drop for NativeLibrary {
    fn drop(&mut self) {
        // Clean up loaded libraries
        for lib in self.dependencies.iter().chain(std::iter::once(&self.primary)) {
            unsafe { close(lib.handle) };
        }
    }
}

#[cfg(unix)]
fn dl_error() -> String {
    // SAFETY: dlerror returns a thread-local, NUL terminated message or NULL.
    unsafe {
        let message = libc::dlerror();
        if message.is_null() {
            "unknown dlopen error".to_string()
        } else {
            std::ffi::CStr::from_ptr(message).to_string_lossy().into_owned()
        }
    }
}

#[cfg(unix)]
fn open_path(path: &Path, name: &str) -> FFIResult<*mut c_void> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| FFIError::library_load(name, &format!("Invalid path: {}", e)))?;
    let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
    if handle.is_null() {
        return Err(FFIError::library_load(name, &dl_error()));
    }
    Ok(handle)
}

#[cfg(unix)]
fn open_system(name: &str) -> FFIResult<*mut c_void> {
    let candidates = if name.contains('/') || name.contains(".so") || name.contains(".dylib") {
        vec![name.to_string()]
    } else {
        vec![
            format!("lib{}.so", name),    // Linux
            format!("lib{}.dylib", name), // macOS
            name.to_string(),
        ]
    };

    let mut last_error = String::new();
    for candidate in candidates {
        let c_name = CString::new(candidate.as_str())
            .map_err(|e| FFIError::library_load(name, &format!("Invalid name: {}", e)))?;
        let handle = unsafe { libc::dlopen(c_name.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if !handle.is_null() {
            return Ok(handle);
        }
        last_error = dl_error();
    }
    Err(FFIError::library_load(name, &last_error))
}

#[cfg(unix)]
fn lookup(handle: *mut c_void, name: &CString) -> *mut c_void {
    unsafe { libc::dlsym(handle, name.as_ptr()) }
}

#[cfg(unix)]
unsafe fn close(handle: *mut c_void) {
    libc::dlclose(handle);
}

#[cfg(windows)]
fn load_library_w(target: &std::ffi::OsStr) -> *mut c_void {
    use std::os::windows::ffi::OsStrExt;

    let wide_path: Vec<u16> = target.encode_wide().chain(Some(0)).collect();
    unsafe { winapi::um::libloaderapi::LoadLibraryW(wide_path.as_ptr()) as *mut c_void }
}

#[cfg(windows)]
fn open_path(path: &Path, name: &str) -> FFIResult<*mut c_void> {
    let handle = load_library_w(path.as_os_str());
    if handle.is_null() {
        return Err(FFIError::library_load(name, &std::io::Error::last_os_error().to_string()));
    }
    Ok(handle)
}

#[cfg(windows)]
fn open_system(name: &str) -> FFIResult<*mut c_void> {
    let handle = load_library_w(std::ffi::OsStr::new(name));
    if handle.is_null() {
        return Err(FFIError::library_load(name, &std::io::Error::last_os_error().to_string()));
    }
    Ok(handle)
}

#[cfg(windows)]
fn lookup(handle: *mut c_void, name: &CString) -> *mut c_void {
    unsafe {
        winapi::um::libloaderapi::GetProcAddress(
            handle as winapi::shared::minwindef::HMODULE,
            name.as_ptr(),
        ) as *mut c_void
    }
}

#[cfg(windows)]
unsafe fn close(handle: *mut c_void) {
    winapi::um::libloaderapi::FreeLibrary(handle as winapi::shared::minwindef::HMODULE);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library() {
        let result = NativeLibrary::open(Path::new("/nonexistent/libnativebind_missing_12345.so"));
        assert!(matches!(result, Err(FFIError::LibraryLoad { .. })));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_resolve_from_system_dependency() {
        // The C library is always present on Linux; use it as the "artifact"
        // search fallback for a well known symbol.
        let libc_path = ["libc.so.6", "libc.so"]
            .iter()
            .find(|name| open_system(name).map(|h| unsafe { close(h) }).is_ok())
            .copied();
        let Some(libc_name) = libc_path else { return };

        let library = NativeLibrary::open(Path::new(libc_name))
            .unwrap()
            .with_system_libraries(&["libm.so.6"])
            .unwrap();
        assert!(library.has_symbol("strlen"));
        assert!(library.has_symbol("cos"));
        assert!(!library.has_symbol("nativebind_definitely_missing"));

        let strlen: extern "C" fn(*const std::os::raw::c_char) -> usize =
            unsafe { library.function("strlen").unwrap() };
        let text = CString::new("hello").unwrap();
        assert_eq!(strlen(text.as_ptr()), 5);
    }

    #[test]
    fn test_function_requires_pointer_sized_type() {
        let Ok(library) = NativeLibrary::open(Path::new("libc.so.6")) else { return };
        let result = unsafe { library.function::<[u8; 3]>("strlen") };
        assert!(matches!(result, Err(FFIError::SignatureMismatch { .. })));
    }
}
