//! Bridge configuration.
//!
//! Defaults live in named constant modules so every component agrees on the
//! on-disk layout. A plugin vendor can override them with an optional
//! `xphost.json` next to the plugin module.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{BridgeError, Result};

/// Default names and file layout.
pub mod defaults {
    /// Base name of the managed bridge module and its runtime configuration.
    pub const BRIDGE_NAME: &str = "xpproxy";
    /// Assembly-qualified name of the proxy type inside the bridge module.
    pub const PROXY_TYPE: &str = "XP.Proxy.PluginProxy, xpproxy";
    /// Private runtime directory under the plugin root.
    pub const RUNTIME_DIR: &str = "runtime";
    /// Optional configuration file under the plugin root.
    pub const CONFIG_FILE: &str = "xphost.json";
    /// Delegate type used to bind the managed `Initialize` method.
    pub const INITIALIZE_DELEGATE_TYPE: &str = "XP.Proxy.InitializeDelegate, xpproxy";
    /// Managed assemblies carry this extension on every platform.
    pub const ASSEMBLY_EXTENSION: &str = "dll";
}

/// Environment variable names.
pub mod env_vars {
    /// Log filter directives for the host debug channel.
    pub const LOG: &str = "XPHOST_LOG";
    /// System runtime root.
    pub const DOTNET_ROOT: &str = "DOTNET_ROOT";

    /// Architecture specific runtime root, e.g. `DOTNET_ROOT_X64`.
    pub fn dotnet_root_for_arch() -> String {
        let arch = match std::env::consts::ARCH {
            "x86_64" => "X64",
            "aarch64" => "ARM64",
            "x86" => "X86",
            "arm" => "ARM",
            other => other,
        };
        format!("{DOTNET_ROOT}_{arch}")
    }
}

/// Managed registration protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyProtocol {
    /// One `Initialize` call fills in all five lifecycle entry points.
    #[default]
    Initialize,
    /// Each lifecycle entry point is resolved as its own delegate.
    PerDelegate,
}

/// Bridge settings for one plugin root.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub bridge_name: String,
    pub proxy_type: String,
    pub runtime_dir: String,
    pub protocol: ProxyProtocol,
    pub initialize_delegate_type: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bridge_name: defaults::BRIDGE_NAME.to_string(),
            proxy_type: defaults::PROXY_TYPE.to_string(),
            runtime_dir: defaults::RUNTIME_DIR.to_string(),
            protocol: ProxyProtocol::default(),
            initialize_delegate_type: defaults::INITIALIZE_DELEGATE_TYPE.to_string(),
        }
    }
}

impl BridgeConfig {
    /// Load `xphost.json` from the plugin root, falling back to defaults when
    /// the file does not exist.
    pub fn load(plugin_root: &Path) -> Result<Self> {
        let path = plugin_root.join(defaults::CONFIG_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)
            .map_err(|e| BridgeError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| BridgeError::Config(format!("{}: {e}", path.display())))?;

        debug!(path = %path.display(), ?config, "loaded bridge configuration");
        Ok(config)
    }

    /// `<root>/<runtime_dir>`
    pub fn runtime_override_dir(&self, plugin_root: &Path) -> PathBuf {
        plugin_root.join(&self.runtime_dir)
    }

    /// `<root>/<bridge>.runtimeconfig.json`
    pub fn runtime_config_path(&self, plugin_root: &Path) -> PathBuf {
        plugin_root.join(format!("{}.runtimeconfig.json", self.bridge_name))
    }

    /// `<root>/<bridge>.dll`
    pub fn bridge_module_path(&self, plugin_root: &Path) -> PathBuf {
        plugin_root.join(format!(
            "{}.{}",
            self.bridge_name,
            defaults::ASSEMBLY_EXTENSION
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let config = BridgeConfig::default();
        let root = Path::new("/sim/Resources/plugins/sample");

        assert_eq!(
            config.runtime_config_path(root),
            root.join("xpproxy.runtimeconfig.json")
        );
        assert_eq!(config.bridge_module_path(root), root.join("xpproxy.dll"));
        assert_eq!(config.runtime_override_dir(root), root.join("runtime"));
        assert_eq!(config.protocol, ProxyProtocol::Initialize);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig::load(dir.path()).unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_partial_file_overrides_only_given_fields() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(defaults::CONFIG_FILE),
            r#"{ "bridge_name": "myproxy", "protocol": "per_delegate" }"#,
        )
        .unwrap();

        let config = BridgeConfig::load(dir.path()).unwrap();
        assert_eq!(config.bridge_name, "myproxy");
        assert_eq!(config.protocol, ProxyProtocol::PerDelegate);
        assert_eq!(config.proxy_type, defaults::PROXY_TYPE);
        assert_eq!(
            config.bridge_module_path(dir.path()),
            dir.path().join("myproxy.dll")
        );
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(defaults::CONFIG_FILE), "{ not json").unwrap();

        let err = BridgeConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(defaults::CONFIG_FILE),
            r#"{ "bridge_nam": "typo" }"#,
        )
        .unwrap();

        assert!(BridgeConfig::load(dir.path()).is_err());
    }

    #[test]
    fn test_arch_env_var_name() {
        assert!(env_vars::dotnet_root_for_arch().starts_with("DOTNET_ROOT_"));
    }
}
