//! Binding to the simulator's plugin API (XPLM).
//!
//! The API is resolved at Start from the image that already carries it
//! rather than linked at build time, so this crate builds and tests without
//! the SDK link libraries.

use std::ffi::{c_char, c_int, CStr};
use std::path::PathBuf;
use std::ptr;

use tracing::debug;
use xphost_core::{DebugStringFn, Export, HostServices, NativeLibrary, Result};

/// Size of the path buffers handed to XPLM.
pub const PATH_BUFFER_SIZE: usize = 4096;

/// Makes XPLM report native file-system paths instead of HFS-style ones.
pub const NATIVE_PATHS_FEATURE: &CStr = c"XPLM_USE_NATIVE_PATHS";

pub type GetMyIdFn = unsafe extern "C" fn() -> c_int;
pub type GetPluginInfoFn = unsafe extern "C" fn(
    plugin: c_int,
    out_name: *mut c_char,
    out_file_path: *mut c_char,
    out_signature: *mut c_char,
    out_description: *mut c_char,
);
pub type GetSystemPathFn = unsafe extern "C" fn(out_system_path: *mut c_char);
pub type HasFeatureFn = unsafe extern "C" fn(feature: *const c_char) -> c_int;
pub type EnableFeatureFn = unsafe extern "C" fn(feature: *const c_char, enable: c_int);

const GET_MY_ID: Export<GetMyIdFn> = unsafe { Export::new("XPLMGetMyID") };
const GET_PLUGIN_INFO: Export<GetPluginInfoFn> = unsafe { Export::new("XPLMGetPluginInfo") };
const GET_SYSTEM_PATH: Export<GetSystemPathFn> = unsafe { Export::new("XPLMGetSystemPath") };
const DEBUG_STRING: Export<DebugStringFn> = unsafe { Export::new("XPLMDebugString") };
const HAS_FEATURE: Export<HasFeatureFn> = unsafe { Export::new("XPLMHasFeature") };
const ENABLE_FEATURE: Export<EnableFeatureFn> = unsafe { Export::new("XPLMEnableFeature") };

/// The XPLM functions the bridge calls.
#[derive(Debug, Clone, Copy)]
pub struct XplmApi {
    pub get_my_id: GetMyIdFn,
    pub get_plugin_info: GetPluginInfoFn,
    pub get_system_path: GetSystemPathFn,
    pub debug_string: DebugStringFn,
    pub has_feature: HasFeatureFn,
    pub enable_feature: EnableFeatureFn,
}

impl XplmApi {
    /// Resolve every function, failing on the first missing export.
    pub fn resolve(library: &NativeLibrary) -> Result<Self> {
        Ok(Self {
            get_my_id: library.resolve(&GET_MY_ID)?,
            get_plugin_info: library.resolve(&GET_PLUGIN_INFO)?,
            get_system_path: library.resolve(&GET_SYSTEM_PATH)?,
            debug_string: library.resolve(&DEBUG_STRING)?,
            has_feature: library.resolve(&HAS_FEATURE)?,
            enable_feature: library.resolve(&ENABLE_FEATURE)?,
        })
    }
}

/// Host services backed by XPLM.
#[derive(Debug, Clone, Copy)]
pub struct XplmHost {
    api: XplmApi,
}

impl XplmHost {
    /// Bind to the XPLM of the running simulator.
    pub fn bind() -> Result<Self> {
        let library = NativeLibrary::host_process()?;
        let api = XplmApi::resolve(&library)?;
        Ok(Self::new(api))
    }

    /// Wrap a resolved API, switching on native paths where supported.
    pub fn new(api: XplmApi) -> Self {
        unsafe {
            if (api.has_feature)(NATIVE_PATHS_FEATURE.as_ptr()) != 0 {
                (api.enable_feature)(NATIVE_PATHS_FEATURE.as_ptr(), 1);
                debug!("native paths enabled");
            }
        }
        Self { api }
    }
}

impl HostServices for XplmHost {
    fn plugin_file_path(&self) -> Option<PathBuf> {
        let mut path = [0 as c_char; PATH_BUFFER_SIZE];
        unsafe {
            let me = (self.api.get_my_id)();
            (self.api.get_plugin_info)(
                me,
                ptr::null_mut(),
                path.as_mut_ptr(),
                ptr::null_mut(),
                ptr::null_mut(),
            );
        }
        path_from_buffer(&path)
    }

    fn system_path(&self) -> Option<PathBuf> {
        let mut path = [0 as c_char; PATH_BUFFER_SIZE];
        unsafe { (self.api.get_system_path)(path.as_mut_ptr()) };
        path_from_buffer(&path)
    }

    fn debug_string_fn(&self) -> DebugStringFn {
        self.api.debug_string
    }
}

/// Read a NUL-terminated path written by the host. Empty means unknown.
fn path_from_buffer(buffer: &[c_char]) -> Option<PathBuf> {
    let bytes: Vec<u8> = buffer
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    if bytes.is_empty() {
        return None;
    }

    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStringExt;
        Some(PathBuf::from(std::ffi::OsString::from_vec(bytes)))
    }

    #[cfg(not(unix))]
    {
        // Native paths are UTF-8 on every other host platform.
        Some(PathBuf::from(String::from_utf8_lossy(&bytes).into_owned()))
    }
}
