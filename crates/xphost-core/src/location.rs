//! Path resolution through host introspection.
//!
//! Nothing here is cached: every Start re-queries the host so a plugin that
//! was moved between cold starts is found at its new location.

use std::ffi::c_char;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{BridgeError, Result};

/// Host debug-output callback, handed unchanged to the managed side.
pub type DebugStringFn = unsafe extern "C" fn(message: *const c_char);

/// What the bridge needs to know about the hosting application.
pub trait HostServices {
    /// Full path of this plugin module as the host loaded it.
    fn plugin_file_path(&self) -> Option<PathBuf>;

    /// The host application's install directory.
    fn system_path(&self) -> Option<PathBuf>;

    /// The host's debug-output channel.
    fn debug_string_fn(&self) -> DebugStringFn;
}

/// Where this plugin lives, resolved once per Start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginLocation {
    pub root_path: PathBuf,
    pub full_module_path: PathBuf,
}

impl PluginLocation {
    /// Resolve both paths from the host.
    pub fn resolve(host: &dyn HostServices) -> Result<Self> {
        let full_module_path = resolve_plugin_full_name(host)?;
        let root_path = parent_of(&full_module_path)?;

        debug!(
            root = %root_path.display(),
            module = %full_module_path.display(),
            "resolved plugin location"
        );

        Ok(Self {
            root_path,
            full_module_path,
        })
    }

    /// The module's file stem, e.g. `sample` for `.../sample/64/sample.xpl`.
    pub fn module_stem(&self) -> &str {
        self.full_module_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("xphost")
    }
}

/// Directory containing this plugin module.
pub fn resolve_plugin_root(host: &dyn HostServices) -> Result<PathBuf> {
    parent_of(&resolve_plugin_full_name(host)?)
}

/// Full path of this plugin module.
pub fn resolve_plugin_full_name(host: &dyn HostServices) -> Result<PathBuf> {
    host.plugin_file_path()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or(BridgeError::PathResolutionFailed)
}

/// The host application's install root.
pub fn resolve_startup_root(host: &dyn HostServices) -> Result<PathBuf> {
    host.system_path()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or(BridgeError::PathResolutionFailed)
}

fn parent_of(path: &Path) -> Result<PathBuf> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .ok_or(BridgeError::PathResolutionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn ignore(_message: *const c_char) {}

    struct FixedHost {
        plugin: Option<PathBuf>,
        system: Option<PathBuf>,
    }

    impl HostServices for FixedHost {
        fn plugin_file_path(&self) -> Option<PathBuf> {
            self.plugin.clone()
        }

        fn system_path(&self) -> Option<PathBuf> {
            self.system.clone()
        }

        fn debug_string_fn(&self) -> DebugStringFn {
            ignore
        }
    }

    #[test]
    fn test_resolve_location() {
        let host = FixedHost {
            plugin: Some(PathBuf::from("/xp/Resources/plugins/sample/64/sample.xpl")),
            system: Some(PathBuf::from("/xp")),
        };

        let location = PluginLocation::resolve(&host).unwrap();
        assert_eq!(
            location.root_path,
            PathBuf::from("/xp/Resources/plugins/sample/64")
        );
        assert_eq!(location.module_stem(), "sample");
        assert_eq!(resolve_startup_root(&host).unwrap(), PathBuf::from("/xp"));
        assert_eq!(resolve_plugin_root(&host).unwrap(), location.root_path);
    }

    #[test]
    fn test_missing_or_empty_path_fails() {
        for plugin in [None, Some(PathBuf::new()), Some(PathBuf::from("sample.xpl"))] {
            let host = FixedHost {
                plugin,
                system: None,
            };
            assert!(matches!(
                PluginLocation::resolve(&host),
                Err(BridgeError::PathResolutionFailed)
            ));
        }
    }

    #[test]
    fn test_missing_system_path_fails() {
        let host = FixedHost {
            plugin: Some(PathBuf::from("/p/a.xpl")),
            system: Some(PathBuf::new()),
        };
        assert!(matches!(
            resolve_startup_root(&host),
            Err(BridgeError::PathResolutionFailed)
        ));
    }
}
