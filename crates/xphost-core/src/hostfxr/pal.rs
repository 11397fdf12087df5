//! Platform abstraction for the runtime host interface.
//!
//! This is the only place that knows how wide `char_t` is, what the hostfxr
//! library is called, and where runtimes get installed by default.

use std::path::{Path, PathBuf};

use crate::error::{BridgeError, Result};

#[cfg(windows)]
pub type CharT = u16;
#[cfg(not(windows))]
pub type CharT = std::ffi::c_char;

#[cfg(windows)]
pub const HOSTFXR_LIBRARY: &str = "hostfxr.dll";
#[cfg(target_os = "macos")]
pub const HOSTFXR_LIBRARY: &str = "libhostfxr.dylib";
#[cfg(all(unix, not(target_os = "macos")))]
pub const HOSTFXR_LIBRARY: &str = "libhostfxr.so";

/// A NUL-terminated string in the runtime host's native encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformString {
    #[cfg(windows)]
    buffer: Vec<u16>,
    #[cfg(not(windows))]
    buffer: std::ffi::CString,
}

impl PlatformString {
    pub fn from_path(path: &Path) -> Result<Self> {
        Self::encode(path.as_os_str()).ok_or_else(|| BridgeError::InvalidPath(path.to_path_buf()))
    }

    pub fn new(value: &str) -> Result<Self> {
        Self::encode(std::ffi::OsStr::new(value))
            .ok_or_else(|| BridgeError::InvalidPath(PathBuf::from(value)))
    }

    #[cfg(windows)]
    fn encode(value: &std::ffi::OsStr) -> Option<Self> {
        use std::os::windows::ffi::OsStrExt;

        let mut buffer: Vec<u16> = value.encode_wide().collect();
        if buffer.contains(&0) {
            return None;
        }
        buffer.push(0);
        Some(Self { buffer })
    }

    #[cfg(not(windows))]
    fn encode(value: &std::ffi::OsStr) -> Option<Self> {
        use std::os::unix::ffi::OsStrExt;

        std::ffi::CString::new(value.as_bytes())
            .ok()
            .map(|buffer| Self { buffer })
    }

    pub fn as_ptr(&self) -> *const CharT {
        self.buffer.as_ptr()
    }
}

/// Calling convention of delegates handed out by the CoreCLR host.
///
/// The delegate type is spelled out per target because `extern` ABIs cannot
/// be chosen through a type alias.
#[cfg(windows)]
pub type LoadAssemblyAndGetFunctionPointerFn = unsafe extern "system" fn(
    assembly_path: *const CharT,
    type_name: *const CharT,
    method_name: *const CharT,
    delegate_type_name: *const CharT,
    reserved: *mut std::ffi::c_void,
    delegate: *mut *mut std::ffi::c_void,
) -> i32;

#[cfg(not(windows))]
pub type LoadAssemblyAndGetFunctionPointerFn = unsafe extern "C" fn(
    assembly_path: *const CharT,
    type_name: *const CharT,
    method_name: *const CharT,
    delegate_type_name: *const CharT,
    reserved: *mut std::ffi::c_void,
    delegate: *mut *mut std::ffi::c_void,
) -> i32;

/// Install locations used when no override or environment root is given.
pub fn default_install_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();

    #[cfg(windows)]
    {
        if let Some(program_files) = std::env::var_os("ProgramFiles") {
            roots.push(PathBuf::from(program_files).join("dotnet"));
        }
        roots.push(PathBuf::from(r"C:\Program Files\dotnet"));
    }

    #[cfg(target_os = "macos")]
    {
        roots.push(PathBuf::from("/usr/local/share/dotnet"));
        roots.push(PathBuf::from("/usr/local/share/dotnet/x64"));
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        roots.push(PathBuf::from("/usr/share/dotnet"));
        roots.push(PathBuf::from("/usr/lib/dotnet"));
        roots.push(PathBuf::from("/usr/lib64/dotnet"));
    }

    roots
}

/// The install location registered by the runtime installer, if any.
pub fn registered_install_root() -> Option<PathBuf> {
    #[cfg(unix)]
    {
        let text = std::fs::read_to_string("/etc/dotnet/install_location").ok()?;
        text.lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(PathBuf::from)
    }

    #[cfg(windows)]
    {
        None
    }
}
