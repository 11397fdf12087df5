//! Booting the managed runtime.
//!
//! The bootstrapper turns a plugin root into a "load assembly and get
//! function pointer" capability. The host context handle it opens is scoped
//! to this call and is closed on every exit path.

use std::ffi::c_void;
use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::hostfxr::{
    HostFxr, HostFxrLibrary, HostFxrSearch, LoadAssemblyAndGetFunctionPointerFn, PlatformString,
    RuntimeDelegateKind,
};

/// Status returned by the runtime when an assembly file is missing.
pub const COR_E_FILENOTFOUND: i32 = 0x8007_0002_u32 as i32;
/// Status returned by the runtime when an assembly file cannot be loaded.
pub const COR_E_FILELOAD: i32 = 0x8013_1621_u32 as i32;
/// Status returned by the runtime for a malformed assembly image.
pub const COR_E_BADIMAGEFORMAT: i32 = 0x8007_000B_u32 as i32;

/// Parsed `<bridge>.runtimeconfig.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    #[serde(default)]
    pub runtime_options: RuntimeOptions,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeOptions {
    pub tfm: Option<String>,
    pub framework: Option<FrameworkReference>,
    #[serde(default)]
    pub frameworks: Vec<FrameworkReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FrameworkReference {
    pub name: String,
    pub version: String,
}

impl fmt::Display for FrameworkReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

impl RuntimeConfig {
    /// Read and parse a runtime configuration descriptor.
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::RuntimeInitFailed(format!(
                "cannot read runtime configuration {}: {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            BridgeError::RuntimeInitFailed(format!(
                "invalid runtime configuration {}: {e}",
                path.display()
            ))
        })
    }

    /// Every framework the descriptor references.
    pub fn frameworks(&self) -> impl Iterator<Item = &FrameworkReference> {
        self.runtime_options
            .framework
            .iter()
            .chain(self.runtime_options.frameworks.iter())
    }
}

/// A failed managed function lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFunctionError {
    /// The runtime reported a failure status.
    Status(i32),
    /// The runtime reported success but handed back no function.
    NullFunction,
}

impl LoadFunctionError {
    /// True when the runtime could not load the assembly file itself.
    pub fn is_assembly_failure(&self) -> bool {
        matches!(
            self,
            LoadFunctionError::Status(COR_E_FILENOTFOUND | COR_E_FILELOAD | COR_E_BADIMAGEFORMAT)
        )
    }
}

impl fmt::Display for LoadFunctionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadFunctionError::Status(status) => write!(f, "runtime status {status:#010x}"),
            LoadFunctionError::NullFunction => {
                f.write_str("runtime reported success but returned no function pointer")
            }
        }
    }
}

/// The generic "load module and get function pointer" capability.
pub trait AssemblyLoader {
    /// Resolve `type_name::method_name` from `assembly` as a native-callable
    /// function pointer bound to the assembly-qualified `delegate_type_name`.
    fn load_function(
        &self,
        assembly: &Path,
        type_name: &str,
        method_name: &str,
        delegate_type_name: &str,
    ) -> Result<std::result::Result<NonNull<c_void>, LoadFunctionError>>;
}

/// The runtime's `load_assembly_and_get_function_pointer` delegate.
#[derive(Clone, Copy)]
pub struct LoadAssemblyCapability {
    function: LoadAssemblyAndGetFunctionPointerFn,
}

impl LoadAssemblyCapability {
    /// Wrap a delegate obtained from the runtime.
    ///
    /// # Safety
    ///
    /// `function` must be a live `load_assembly_and_get_function_pointer`
    /// delegate, valid for the rest of the process.
    pub unsafe fn from_raw(function: LoadAssemblyAndGetFunctionPointerFn) -> Self {
        Self { function }
    }
}

impl fmt::Debug for LoadAssemblyCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadAssemblyCapability")
            .field("function", &(self.function as *const c_void))
            .finish()
    }
}

impl AssemblyLoader for LoadAssemblyCapability {
    fn load_function(
        &self,
        assembly: &Path,
        type_name: &str,
        method_name: &str,
        delegate_type_name: &str,
    ) -> Result<std::result::Result<NonNull<c_void>, LoadFunctionError>> {
        let assembly = PlatformString::from_path(assembly)?;
        let type_name = PlatformString::new(type_name)?;
        let method_name = PlatformString::new(method_name)?;
        let delegate_type_name = PlatformString::new(delegate_type_name)?;

        let mut delegate = ptr::null_mut();
        let status = unsafe {
            (self.function)(
                assembly.as_ptr(),
                type_name.as_ptr(),
                method_name.as_ptr(),
                delegate_type_name.as_ptr(),
                ptr::null_mut(),
                &mut delegate,
            )
        };

        Ok(match (status, NonNull::new(delegate)) {
            (0, Some(function)) => Ok(function),
            (0, None) => Err(LoadFunctionError::NullFunction),
            (status, _) => Err(LoadFunctionError::Status(status)),
        })
    }
}

/// Locates, initialises and releases the managed runtime for one Start.
#[derive(Debug, Clone)]
pub struct RuntimeBootstrapper {
    config: BridgeConfig,
}

impl RuntimeBootstrapper {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// Boot the runtime for `plugin_root` and return the load capability.
    pub fn initialize(&self, plugin_root: &Path) -> Result<LoadAssemblyCapability> {
        let search = HostFxrSearch::for_plugin(plugin_root, &self.config);
        let location = search.locate()?;
        let hostfxr = HostFxrLibrary::load(&location.library)?;

        let delegate = self.initialize_with(&hostfxr, plugin_root, Some(&location.dotnet_root))?;

        // The pointer was produced by the runtime for exactly this delegate
        // kind and stays valid until the process exits.
        let function: LoadAssemblyAndGetFunctionPointerFn =
            unsafe { std::mem::transmute::<*mut c_void, _>(delegate.as_ptr()) };
        Ok(unsafe { LoadAssemblyCapability::from_raw(function) })
    }

    /// Steps 4 to 6 against any runtime host: initialise from the runtime
    /// configuration, fetch the load delegate, close the host context.
    pub fn initialize_with<H: HostFxr>(
        &self,
        hostfxr: &H,
        plugin_root: &Path,
        dotnet_root: Option<&Path>,
    ) -> Result<NonNull<c_void>> {
        let config_path = self.runtime_config_path(plugin_root);
        let runtime_config = RuntimeConfig::read(&config_path)?;
        for framework in runtime_config.frameworks() {
            debug!(%framework, "runtime configuration references framework");
        }

        let config_arg = PlatformString::from_path(&config_path)?;
        let root_arg = dotnet_root.map(PlatformString::from_path).transpose()?;

        let outcome = hostfxr.initialize_for_runtime_config(&config_arg, root_arg.as_ref());

        // Whatever happens next, a handle we were given is closed before we
        // return.
        let handle = outcome.handle.map(|handle| {
            scopeguard::guard(handle, |handle| {
                let status = hostfxr.close(handle);
                if status != 0 {
                    warn!(status, "closing the runtime host context reported an error");
                }
            })
        });

        if outcome.status < 0 {
            return Err(BridgeError::RuntimeInitFailed(format!(
                "initialize_for_runtime_config({}) returned {:#010x}",
                config_path.display(),
                outcome.status
            )));
        }
        let handle = handle.ok_or_else(|| {
            BridgeError::RuntimeInitFailed(format!(
                "initialize_for_runtime_config({}) returned no host context",
                config_path.display()
            ))
        })?;
        debug!(status = outcome.status, "runtime host context initialised");

        let kind = RuntimeDelegateKind::LoadAssemblyAndGetFunctionPointer;
        let (status, delegate) = hostfxr.get_runtime_delegate(*handle, kind);
        match (status, NonNull::new(delegate)) {
            (0, Some(delegate)) => Ok(delegate),
            (status, _) => Err(BridgeError::DelegateResolutionFailed {
                kind: kind.as_str(),
                status,
            }),
        }
    }

    pub fn runtime_config_path(&self, plugin_root: &Path) -> PathBuf {
        self.config.runtime_config_path(plugin_root)
    }
}
