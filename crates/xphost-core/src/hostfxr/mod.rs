//! Binding to the .NET runtime host resolver (hostfxr).

pub mod locate;
pub mod pal;

use std::ffi::c_void;
use std::path::Path;
use std::ptr::{self, NonNull};

use tracing::debug;

use crate::error::Result;
use crate::loader::{Export, NativeLibrary};

pub use locate::{HostFxrLocation, HostFxrSearch};
pub use pal::{CharT, LoadAssemblyAndGetFunctionPointerFn, PlatformString};

/// `hostfxr_initialize_parameters`
#[repr(C)]
pub struct InitializeParameters {
    pub size: usize,
    pub host_path: *const CharT,
    pub dotnet_root: *const CharT,
}

type InitializeForRuntimeConfigFn = unsafe extern "C" fn(
    runtime_config_path: *const CharT,
    parameters: *const InitializeParameters,
    host_context_handle: *mut *mut c_void,
) -> i32;

type GetRuntimeDelegateFn =
    unsafe extern "C" fn(host_context_handle: *mut c_void, kind: i32, delegate: *mut *mut c_void) -> i32;

type CloseFn = unsafe extern "C" fn(host_context_handle: *mut c_void) -> i32;

const INITIALIZE_FOR_RUNTIME_CONFIG: Export<InitializeForRuntimeConfigFn> =
    unsafe { Export::new("hostfxr_initialize_for_runtime_config") };
const GET_RUNTIME_DELEGATE: Export<GetRuntimeDelegateFn> =
    unsafe { Export::new("hostfxr_get_runtime_delegate") };
const CLOSE: Export<CloseFn> = unsafe { Export::new("hostfxr_close") };

/// `hostfxr_delegate_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum RuntimeDelegateKind {
    ComActivation = 0,
    LoadInMemoryAssembly = 1,
    WinrtActivation = 2,
    ComRegister = 3,
    ComUnregister = 4,
    LoadAssemblyAndGetFunctionPointer = 5,
    GetFunctionPointer = 6,
}

impl RuntimeDelegateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeDelegateKind::ComActivation => "com_activation",
            RuntimeDelegateKind::LoadInMemoryAssembly => "load_in_memory_assembly",
            RuntimeDelegateKind::WinrtActivation => "winrt_activation",
            RuntimeDelegateKind::ComRegister => "com_register",
            RuntimeDelegateKind::ComUnregister => "com_unregister",
            RuntimeDelegateKind::LoadAssemblyAndGetFunctionPointer => {
                "load_assembly_and_get_function_pointer"
            }
            RuntimeDelegateKind::GetFunctionPointer => "get_function_pointer",
        }
    }
}

/// Host context handle returned by `hostfxr_initialize_for_runtime_config`.
pub type HostContextHandle = NonNull<c_void>;

/// Outcome of `hostfxr_initialize_for_runtime_config`.
///
/// The runtime may hand back a handle even when it reports failure; such a
/// handle still has to be closed.
#[derive(Debug, Clone, Copy)]
pub struct InitializeOutcome {
    pub status: i32,
    pub handle: Option<HostContextHandle>,
}

/// The three runtime-hosting operations the bootstrapper needs.
pub trait HostFxr {
    fn initialize_for_runtime_config(
        &self,
        runtime_config: &PlatformString,
        dotnet_root: Option<&PlatformString>,
    ) -> InitializeOutcome;

    /// Returns the status code and the delegate pointer, which may be null.
    fn get_runtime_delegate(
        &self,
        handle: HostContextHandle,
        kind: RuntimeDelegateKind,
    ) -> (i32, *mut c_void);

    fn close(&self, handle: HostContextHandle) -> i32;
}

/// hostfxr loaded from disk with its three exports resolved.
pub struct HostFxrLibrary {
    initialize_for_runtime_config: InitializeForRuntimeConfigFn,
    get_runtime_delegate: GetRuntimeDelegateFn,
    close: CloseFn,
}

impl HostFxrLibrary {
    /// Load hostfxr and resolve its exports, stopping at the first one missing.
    pub fn load(path: &Path) -> Result<Self> {
        let library = NativeLibrary::load(path)?;

        let initialize_for_runtime_config = library.resolve(&INITIALIZE_FOR_RUNTIME_CONFIG)?;
        let get_runtime_delegate = library.resolve(&GET_RUNTIME_DELEGATE)?;
        let close = library.resolve(&CLOSE)?;

        debug!(path = %path.display(), "resolved runtime host exports");
        Ok(Self {
            initialize_for_runtime_config,
            get_runtime_delegate,
            close,
        })
    }
}

impl HostFxr for HostFxrLibrary {
    fn initialize_for_runtime_config(
        &self,
        runtime_config: &PlatformString,
        dotnet_root: Option<&PlatformString>,
    ) -> InitializeOutcome {
        let parameters = InitializeParameters {
            size: std::mem::size_of::<InitializeParameters>(),
            host_path: ptr::null(),
            dotnet_root: dotnet_root.map_or(ptr::null(), PlatformString::as_ptr),
        };
        let mut handle = ptr::null_mut();

        let status = unsafe {
            (self.initialize_for_runtime_config)(runtime_config.as_ptr(), &parameters, &mut handle)
        };

        InitializeOutcome {
            status,
            handle: NonNull::new(handle),
        }
    }

    fn get_runtime_delegate(
        &self,
        handle: HostContextHandle,
        kind: RuntimeDelegateKind,
    ) -> (i32, *mut c_void) {
        let mut delegate = ptr::null_mut();
        let status = unsafe { (self.get_runtime_delegate)(handle.as_ptr(), kind as i32, &mut delegate) };
        (status, delegate)
    }

    fn close(&self, handle: HostContextHandle) -> i32 {
        unsafe { (self.close)(handle.as_ptr()) }
    }
}
