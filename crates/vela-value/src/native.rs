//! Native-side value representation

use std::fmt;

use vela_handle::NativeHandle;

use crate::CallbackToken;

/// Byte string with an explicit length.
///
/// Never relies on a terminator, so embedded zero bytes survive.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct NativeString {
    bytes: Vec<u8>,
}

impl NativeString {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Copy `len` bytes starting at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `len` bytes, or `len` must be zero.
    pub unsafe fn copy_from_raw(ptr: *const u8, len: usize) -> Self {
        if len == 0 || ptr.is_null() {
            return Self::default();
        }
        // SAFETY: the caller guarantees `ptr..ptr + len` is readable.
        let slice = unsafe { std::slice::from_raw_parts(ptr, len) };
        Self {
            bytes: slice.to_vec(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl From<&str> for NativeString {
    fn from(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }
}

impl From<String> for NativeString {
    fn from(s: String) -> Self {
        Self::from_bytes(s.into_bytes())
    }
}

impl fmt::Debug for NativeString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.bytes))
    }
}

/// Value as the native engine sees it
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NativeValue {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(NativeString),
    Object(NativeHandle),
    Array(NativeHandle),
    Function(NativeHandle),
    Callback(CallbackToken),
    /// A thrown value, reported instead of unwinding
    Exception {
        message: NativeString,
        value: Box<NativeValue>,
    },
}

impl NativeValue {
    pub fn string(s: impl Into<NativeString>) -> Self {
        NativeValue::String(s.into())
    }

    pub fn exception(message: impl Into<NativeString>, value: NativeValue) -> Self {
        NativeValue::Exception {
            message: message.into(),
            value: Box::new(value),
        }
    }

    /// Handle carried by a reference value.
    pub fn handle(&self) -> Option<NativeHandle> {
        match self {
            NativeValue::Object(h) | NativeValue::Array(h) | NativeValue::Function(h) => Some(*h),
            _ => None,
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, NativeValue::Exception { .. })
    }
}
