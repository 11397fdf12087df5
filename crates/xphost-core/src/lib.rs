//! Core of the xphost bridge.
//!
//! Lets plugin logic written for .NET run behind the X-Plane plugin ABI. At
//! Start the bridge finds its own location, boots the runtime through
//! hostfxr, binds the lifecycle entry points of a managed proxy type, and then
//! forwards every host lifecycle call to that proxy.
//!
//! The pieces, leaf first:
//!
//! - [`location`]: plugin and host paths from host introspection
//! - [`loader`]: native library loading with typed exports
//! - [`hostfxr`]: runtime discovery and the hostfxr binding
//! - [`runtime`]: runtime bootstrap down to the load-assembly capability
//! - [`proxy`]: binding the managed proxy into a delegate table
//! - [`forwarder`]: the lifecycle state machine the host-facing ABI drives

pub mod config;
pub mod error;
pub mod forwarder;
pub mod hostfxr;
pub mod info;
pub mod loader;
pub mod location;
pub mod proxy;
pub mod runtime;

pub use config::{BridgeConfig, ProxyProtocol};
pub use error::{BridgeError, Result};
pub use forwarder::{ClrProxyFactory, LifecycleForwarder, LifecycleState, ProxyFactory};
pub use info::{PluginInfoBuffers, PLUGIN_INFO_BUFFER_SIZE};
pub use loader::{Export, NativeLibrary};
pub use location::{DebugStringFn, HostServices, PluginLocation};
pub use proxy::{DelegateTable, HostBindings, Operation, ProxyBridge, ProxyHandle};
pub use runtime::{AssemblyLoader, LoadAssemblyCapability, RuntimeBootstrapper};
