//! Locating the runtime host library.
//!
//! A plugin may ship a private runtime under `<plugin_root>/runtime`; when
//! that directory exists it is the only root searched, so the plugin gets the
//! runtime it was tested with regardless of what the machine has installed.

use std::path::{Path, PathBuf};

use semver::Version;
use tracing::{debug, info};

use super::pal;
use crate::config::{env_vars, BridgeConfig};
use crate::error::{BridgeError, Result};

/// Where to look for a runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostFxrSearch {
    /// Private runtime shipped with the plugin, if present on disk.
    pub override_root: Option<PathBuf>,
    /// Machine-wide roots in priority order.
    pub system_roots: Vec<PathBuf>,
}

/// A resolved runtime host library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFxrLocation {
    pub dotnet_root: PathBuf,
    pub library: PathBuf,
    pub version: Version,
}

impl HostFxrSearch {
    /// Build the search for a plugin root from the filesystem and environment.
    pub fn for_plugin(plugin_root: &Path, config: &BridgeConfig) -> Self {
        let override_dir = config.runtime_override_dir(plugin_root);
        let override_root = override_dir.is_dir().then_some(override_dir);

        let mut system_roots = Vec::new();
        for var in [env_vars::dotnet_root_for_arch(), env_vars::DOTNET_ROOT.to_string()] {
            if let Some(value) = std::env::var_os(&var).filter(|v| !v.is_empty()) {
                system_roots.push(PathBuf::from(value));
            }
        }
        system_roots.extend(pal::registered_install_root());
        system_roots.extend(pal::default_install_roots());

        Self {
            override_root,
            system_roots,
        }
    }

    /// Roots that will actually be searched, in order.
    pub fn roots(&self) -> Vec<&Path> {
        match &self.override_root {
            Some(root) => vec![root.as_path()],
            None => self.system_roots.iter().map(PathBuf::as_path).collect(),
        }
    }

    /// Find the newest runtime host library in the first root that has one.
    pub fn locate(&self) -> Result<HostFxrLocation> {
        let roots = self.roots();
        for root in &roots {
            if let Some(location) = newest_in_root(root) {
                info!(
                    root = %location.dotnet_root.display(),
                    version = %location.version,
                    private = self.override_root.is_some(),
                    "selected runtime host"
                );
                return Ok(location);
            }
            debug!(root = %root.display(), "no runtime host library in root");
        }

        let searched = roots
            .iter()
            .map(|r| r.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(BridgeError::RuntimeNotFound(format!(
            "no {} under host/fxr in [{searched}]",
            pal::HOSTFXR_LIBRARY
        )))
    }
}

/// `<root>/host/fxr/<version>/<hostfxr>` with the highest semantic version.
fn newest_in_root(root: &Path) -> Option<HostFxrLocation> {
    let fxr_dir = root.join("host").join("fxr");
    let entries = std::fs::read_dir(&fxr_dir).ok()?;

    entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let version = Version::parse(name.to_str()?).ok()?;
            let library = entry.path().join(pal::HOSTFXR_LIBRARY);
            library.is_file().then_some((version, library))
        })
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(version, library)| HostFxrLocation {
            dotnet_root: root.to_path_buf(),
            library,
            version,
        })
}
