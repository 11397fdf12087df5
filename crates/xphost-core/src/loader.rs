//! Native library loading using libloading.
//!
//! Libraries are loaded once and never unloaded for the lifetime of the
//! process. Exports are resolved through [`Export`] descriptors, which pin the
//! function-pointer type to the export name at the declaration site.

use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::debug;

use crate::error::{BridgeError, Result};

/// A named export with a fixed function-pointer signature.
pub struct Export<F> {
    name: &'static str,
    _signature: PhantomData<F>,
}

impl<F: Copy> Export<F> {
    /// Declare an export.
    ///
    /// # Safety
    ///
    /// `F` must be the exact function-pointer type of the symbol `name` in
    /// every library this descriptor is resolved against.
    pub const unsafe fn new(name: &'static str) -> Self {
        Self {
            name,
            _signature: PhantomData,
        }
    }
}

impl<F> fmt::Debug for Export<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Export").field(&self.name).finish()
    }
}

/// A loaded native library.
pub struct NativeLibrary {
    path: PathBuf,
    library: &'static Library,
}

impl NativeLibrary {
    /// Load a library by path. The OS diagnostic is kept on failure.
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading native library");

        // Loading runs the library's initialisers; callers only load the
        // runtime host library they located themselves.
        let library = unsafe { Library::new(path) }
            .map_err(|e| BridgeError::library_load(path, e))?;

        Ok(Self::leak(path.to_path_buf(), library))
    }

    /// Open the already-loaded image that carries the host's plugin API.
    ///
    /// On Unix the host API lives in the global symbol namespace of the
    /// process; on Windows it is the `XPLM_64.dll` the host loaded before any
    /// plugin.
    pub fn host_process() -> Result<Self> {
        #[cfg(unix)]
        {
            let library = libloading::os::unix::Library::this();
            Ok(Self::leak(PathBuf::from("<process>"), library.into()))
        }

        #[cfg(windows)]
        {
            const HOST_IMAGE: &str = "XPLM_64.dll";
            let library = libloading::os::windows::Library::open_already_loaded(HOST_IMAGE)
                .map_err(|e| BridgeError::library_load(HOST_IMAGE, e))?;
            Ok(Self::leak(PathBuf::from(HOST_IMAGE), library.into()))
        }
    }

    fn leak(path: PathBuf, library: Library) -> Self {
        Self {
            path,
            library: Box::leak(Box::new(library)),
        }
    }

    /// Resolve a typed export.
    pub fn resolve<F: Copy>(&self, export: &Export<F>) -> Result<F> {
        // The signature was vouched for when `export` was declared, and the
        // library is never unloaded, so the copied pointer stays valid.
        let symbol = unsafe { self.library.get::<F>(export.name.as_bytes()) }.map_err(|e| {
            debug!(
                library = %self.path.display(),
                export = export.name,
                error = %e,
                "export lookup failed"
            );
            BridgeError::ExportNotFound(export.name.to_string())
        })?;
        Ok(*symbol)
    }
}

impl fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
