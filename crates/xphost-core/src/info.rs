//! The host's plugin-info output buffers.

use std::ffi::c_char;
use std::ptr;

/// Documented size of each buffer handed to `XPluginStart`.
pub const PLUGIN_INFO_BUFFER_SIZE: usize = 256;

/// The `outName`, `outSig` and `outDesc` buffers of one Start call.
///
/// On the success path the pointers go to the managed proxy untouched, so
/// whatever it writes reaches the host byte for byte.
#[derive(Debug, Clone, Copy)]
pub struct PluginInfoBuffers {
    pub name: *mut c_char,
    pub sig: *mut c_char,
    pub desc: *mut c_char,
}

impl PluginInfoBuffers {
    /// # Safety
    ///
    /// Each pointer is either null or valid for writes of
    /// [`PLUGIN_INFO_BUFFER_SIZE`] bytes for as long as the value is used.
    pub unsafe fn from_raw(name: *mut c_char, sig: *mut c_char, desc: *mut c_char) -> Self {
        Self { name, sig, desc }
    }

    /// Fill all three buffers, truncating each to fit.
    pub fn write(&self, name: &str, sig: &str, desc: &str) {
        // Validity of non-null pointers is the contract of `from_raw`.
        unsafe {
            write_c_string(self.name, name);
            write_c_string(self.sig, sig);
            write_c_string(self.desc, desc);
        }
    }
}

/// Copy `value` into a host buffer as a NUL-terminated string.
///
/// Output is cut at the last UTF-8 boundary that leaves room for the
/// terminator. Null destinations are skipped.
///
/// # Safety
///
/// `dest` must be null or valid for writes of [`PLUGIN_INFO_BUFFER_SIZE`]
/// bytes.
pub unsafe fn write_c_string(dest: *mut c_char, value: &str) {
    if dest.is_null() {
        return;
    }

    let mut len = value.len().min(PLUGIN_INFO_BUFFER_SIZE - 1);
    while !value.is_char_boundary(len) {
        len -= 1;
    }
    let bytes = &value.as_bytes()[..len];
    // Interior NULs would truncate the string on the host side anyway.
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(len);

    ptr::copy_nonoverlapping(bytes.as_ptr().cast::<c_char>(), dest, len);
    *dest.add(len) = 0;
}
