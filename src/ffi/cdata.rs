//! Native-shaped values
//!
//! A `CData` is what crosses the boundary on the native side: an address plus
//! the C type the declaration layer resolved for it. Values created with
//! `Declarations::new` own zeroed storage that keeps the address valid for as
//! long as any clone is alive; values created with `cast` are plain views.

use crate::ffi::c_types::CTypeKind;
use crate::ffi::error::{FFIError, FFIResult};
use crate::ffi::CType;
use crate::value::Value;
use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

/// Zeroed, 8-byte aligned backing memory shared between clones of a `CData`.
struct Storage {
    words: Box<[UnsafeCell<u64>]>,
    len: usize,
}

// Native code writes through the raw address; the Rust side only touches the
// bytes through `CData::item`/`CData::set_item`, which are bounds checked.
unsafe impl Send for Storage {}
unsafe impl Sync for Storage {}

impl Storage {
    fn zeroed(len: usize) -> Self {
        let words = (0..len.div_ceil(8).max(1))
            .map(|_| UnsafeCell::new(0u64))
            .collect();
        Storage { words, len }
    }

    fn base(&self) -> usize {
        self.words.as_ptr() as usize
    }
}

#[derive(Clone)]
pub struct CData {
    c_type: CType,
    address: usize,
    element_size: Option<usize>,
    storage: Option<Arc<Storage>>,
}

impl CData {
    /// Allocates zeroed storage of `len` bytes typed as `c_type`.
    pub(crate) fn allocate(c_type: CType, len: usize, element_size: Option<usize>) -> Self {
        let storage = Arc::new(Storage::zeroed(len));
        CData {
            c_type,
            address: storage.base(),
            element_size,
            storage: Some(storage),
        }
    }

    /// A non-owning view of `address` typed as `c_type`.
    pub(crate) fn view(c_type: CType, address: usize, element_size: Option<usize>) -> Self {
        CData {
            c_type,
            address,
            element_size,
            storage: None,
        }
    }

    pub fn null() -> Self {
        CData::view(CType::void_pointer(), 0, None)
    }

    pub fn ctype(&self) -> &CType {
        &self.c_type
    }

    pub fn kind(&self) -> CTypeKind {
        self.c_type.kind()
    }

    pub fn cname(&self) -> String {
        self.c_type.cname()
    }

    pub fn address(&self) -> usize {
        self.address
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.address as *mut c_void
    }

    pub fn is_null(&self) -> bool {
        self.c_type.is_pointer() && self.address == 0
    }

    /// True when this value keeps its own memory alive.
    pub fn is_owned(&self) -> bool {
        self.storage.is_some()
    }

    pub fn len(&self) -> Option<usize> {
        match &self.c_type {
            CType::Array(_, len) => *len,
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    fn element_type(&self) -> FFIResult<&CType> {
        match &self.c_type {
            CType::Array(inner, _) | CType::Pointer(inner) => Ok(inner),
            other => Err(FFIError::invalid_operation("index", &other.cname())),
        }
    }

    /// Address of element `index`, checked against the owned storage.
    fn element_address(&self, index: usize) -> FFIResult<(usize, &CType)> {
        let cname = self.cname();
        let inner = self.element_type()?;
        let size = self
            .element_size
            .ok_or_else(|| FFIError::opaque_layout(&inner.cname()))?;

        if let Some(len) = self.len() {
            if index >= len {
                return Err(FFIError::index_out_of_bounds(&cname, index, len));
            }
        }

        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| FFIError::invalid_operation("index a borrowed", &cname))?;
        let start = self.address - storage.base();
        let out_of_bounds =
            || FFIError::index_out_of_bounds(&cname, index, (storage.len - start) / size.max(1));
        let offset = index
            .checked_mul(size)
            .and_then(|delta| delta.checked_add(start))
            .ok_or_else(out_of_bounds)?;
        match offset.checked_add(size) {
            Some(end) if end <= storage.len => Ok((storage.base() + offset, inner)),
            _ => Err(out_of_bounds()),
        }
    }

    /// Reads element `index` the way C's `value[index]` would.
    pub fn item(&self, index: usize) -> FFIResult<Value> {
        let (address, inner) = self.element_address(index)?;
        let ptr = address as *const u8;

        // SAFETY: `element_address` proved `address..address + size` lies in
        // the owned storage.
        let value = unsafe {
            match inner {
                CType::Pointer(_) => Value::Data(CData::view(
                    inner.clone(),
                    std::ptr::read_unaligned(ptr as *const usize),
                    None,
                )),
                CType::Float => Value::Float(f64::from(std::ptr::read_unaligned(ptr as *const f32))),
                CType::Double => Value::Float(std::ptr::read_unaligned(ptr as *const f64)),
                CType::Struct(_) | CType::Union(_) | CType::Array(_, _) => {
                    let mut view = CData::view(inner.clone(), address, None);
                    view.storage = self.storage.clone();
                    Value::Data(view)
                }
                other if other.kind() == CTypeKind::Primitive => {
                    let size = crate::ffi::c_type_size(other).unwrap_or(0);
                    Value::Int(read_integer(ptr, size, is_signed(other)))
                }
                other => return Err(FFIError::invalid_operation("read", &other.cname())),
            }
        };

        Ok(value)
    }

    /// Writes element `index`; integers are truncated to the element width.
    pub fn set_item(&self, index: usize, value: &Value) -> FFIResult<()> {
        let (address, inner) = self.element_address(index)?;
        let ptr = address as *mut u8;
        let size = self.element_size.unwrap_or(0);

        // SAFETY: see `item`.
        unsafe {
            match (inner, value) {
                (CType::Pointer(_), Value::Data(data)) => {
                    std::ptr::write_unaligned(ptr as *mut usize, data.address())
                }
                (CType::Pointer(_), Value::None) => std::ptr::write_unaligned(ptr as *mut usize, 0),
                (CType::Float, Value::Float(f)) => std::ptr::write_unaligned(ptr as *mut f32, *f as f32),
                (CType::Double, Value::Float(f)) => std::ptr::write_unaligned(ptr as *mut f64, *f),
                (other, Value::Int(i))
                    if other.kind() == CTypeKind::Primitive
                        && !matches!(other, CType::Float | CType::Double) =>
                {
                    match size {
                        1 => std::ptr::write(ptr, *i as u8),
                        2 => std::ptr::write_unaligned(ptr as *mut u16, *i as u16),
                        4 => std::ptr::write_unaligned(ptr as *mut u32, *i as u32),
                        8 => std::ptr::write_unaligned(ptr as *mut u64, *i as u64),
                        _ => return Err(FFIError::invalid_operation("write", &other.cname())),
                    }
                }
                (other, _) => return Err(FFIError::invalid_operation("assign to", &other.cname())),
            }
        }

        Ok(())
    }
}

fn is_signed(c_type: &CType) -> bool {
    match c_type {
        CType::Char => std::os::raw::c_char::MIN != 0,
        CType::SChar | CType::Short | CType::Int | CType::Long | CType::LongLong | CType::IntPtr => true,
        CType::WChar => libc::wchar_t::MIN != 0,
        _ => false,
    }
}

/// # Safety
/// `ptr..ptr + size` must be readable.
unsafe fn read_integer(ptr: *const u8, size: usize, signed: bool) -> i64 {
    match (size, signed) {
        (1, true) => i64::from(std::ptr::read(ptr as *const i8)),
        (1, false) => i64::from(std::ptr::read(ptr)),
        (2, true) => i64::from(std::ptr::read_unaligned(ptr as *const i16)),
        (2, false) => i64::from(std::ptr::read_unaligned(ptr as *const u16)),
        (4, true) => i64::from(std::ptr::read_unaligned(ptr as *const i32)),
        (4, false) => i64::from(std::ptr::read_unaligned(ptr as *const u32)),
        _ => std::ptr::read_unaligned(ptr as *const i64),
    }
}

impl PartialEq for CData {
    fn eq(&self, other: &Self) -> bool {
        self.c_type == other.c_type && self.address == other.address
    }
}

impl fmt::Display for CData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.storage {
            Some(storage) => write!(f, "<cdata '{}' owning {} bytes>", self.cname(), storage.len),
            None => write!(f, "<cdata '{}' 0x{:x}>", self.cname(), self.address),
        }
    }
}

impl fmt::Debug for CData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
