//! Lifecycle forwarding.
//!
//! The forwarder owns the single proxy slot for a loaded plugin module and
//! relays each host lifecycle call to it. Without a live proxy every call
//! degrades to its documented absent value.

use std::cell::{Cell, RefCell};
use std::ffi::{c_int, c_void};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::info::PluginInfoBuffers;
use crate::location::{resolve_startup_root, HostServices, PluginLocation};
use crate::proxy::{HostBindings, ProxyBridge, ProxyHandle};
use crate::runtime::RuntimeBootstrapper;

/// Forwarder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unloaded,
    Bootstrapping,
    Ready,
    Disabled,
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Unloaded => "unloaded",
            LifecycleState::Bootstrapping => "bootstrapping",
            LifecycleState::Ready => "ready",
            LifecycleState::Disabled => "disabled",
            LifecycleState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Produces a bound proxy for a resolved plugin location.
pub trait ProxyFactory {
    fn create(&mut self, location: &PluginLocation, bindings: HostBindings) -> Result<ProxyHandle>;
}

/// Boots the .NET runtime and binds the bridge module's proxy type.
#[derive(Debug, Default)]
pub struct ClrProxyFactory;

impl ProxyFactory for ClrProxyFactory {
    fn create(&mut self, location: &PluginLocation, bindings: HostBindings) -> Result<ProxyHandle> {
        let config = BridgeConfig::load(&location.root_path)?;
        let capability = RuntimeBootstrapper::new(config.clone()).initialize(&location.root_path)?;
        ProxyBridge::new(config).create(&location.root_path, &capability, bindings)
    }
}

/// The host-facing lifecycle state machine.
///
/// Every operation takes `&self` and no borrow of the proxy slot is held
/// while managed code runs, so the managed plugin may call back into the
/// host and have those calls forwarded. Start and Stop replace the slot and
/// are ignored while either of them is already running.
pub struct LifecycleForwarder<H, F> {
    host: H,
    factory: RefCell<F>,
    state: Cell<LifecycleState>,
    proxy: RefCell<Option<Arc<ProxyHandle>>>,
    changing_slot: Cell<bool>,
}

impl<H: HostServices, F: ProxyFactory> LifecycleForwarder<H, F> {
    pub fn new(host: H, factory: F) -> Self {
        Self {
            host,
            factory: RefCell::new(factory),
            state: Cell::new(LifecycleState::Unloaded),
            proxy: RefCell::new(None),
            changing_slot: Cell::new(false),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    pub fn has_proxy(&self) -> bool {
        self.proxy.borrow().is_some()
    }

    fn live_proxy(&self) -> Option<Arc<ProxyHandle>> {
        self.proxy.borrow().clone()
    }

    /// Record `state` unless `proxy` was released while its call ran.
    fn settle(&self, proxy: &Arc<ProxyHandle>, state: LifecycleState) {
        let current = self
            .proxy
            .borrow()
            .as_ref()
            .is_some_and(|live| Arc::ptr_eq(live, proxy));
        if current {
            self.state.set(state);
        }
    }

    /// Bootstrap and forward Start. Returns the proxy's result verbatim, or
    /// 0 when bootstrap fails.
    pub fn start(&self, buffers: &PluginInfoBuffers) -> c_int {
        if self.changing_slot.replace(true) {
            warn!(state = %self.state(), "Start re-entered while Start or Stop is running; ignoring");
            return 0;
        }
        let _done = scopeguard::guard(&self.changing_slot, |flag| flag.set(false));

        if self.has_proxy() {
            warn!(state = %self.state(), "Start received while a proxy is live; ignoring");
            return 0;
        }

        self.state.set(LifecycleState::Bootstrapping);
        let location = match PluginLocation::resolve(&self.host) {
            Ok(location) => location,
            Err(e) => return self.fail(buffers, None, e),
        };
        let proxy = match self.bootstrap(&location) {
            Ok(proxy) => Arc::new(proxy),
            Err(e) => return self.fail(buffers, Some(&location), e),
        };

        *self.proxy.borrow_mut() = Some(Arc::clone(&proxy));
        self.state.set(LifecycleState::Ready);

        let result = proxy.start(buffers);
        info!(
            module = %location.full_module_path.display(),
            result,
            "managed Start returned"
        );
        result
    }

    fn bootstrap(&self, location: &PluginLocation) -> Result<ProxyHandle> {
        let startup_root = resolve_startup_root(&self.host)?;
        let bindings = HostBindings::new(
            self.host.debug_string_fn(),
            &startup_root,
            &location.full_module_path,
        )?;

        debug!(
            root = %location.root_path.display(),
            startup = %startup_root.display(),
            "bootstrapping managed proxy"
        );
        self.factory.borrow_mut().create(location, bindings)
    }

    fn fail(
        &self,
        buffers: &PluginInfoBuffers,
        location: Option<&PluginLocation>,
        e: BridgeError,
    ) -> c_int {
        error!("Start failed: {e}");
        let stem = location.map_or("xphost", PluginLocation::module_stem);
        buffers.write(
            stem,
            &format!("xphost.{stem}"),
            &format!("Failed to start: {}", e.kind()),
        );
        self.state.set(LifecycleState::Failed);
        0
    }

    /// Forward Enable; 0 when no proxy is live.
    pub fn enable(&self) -> c_int {
        let Some(proxy) = self.live_proxy() else {
            debug!(state = %self.state(), "Enable without a proxy");
            return 0;
        };

        let result = proxy.enable();
        let state = if result != 0 {
            LifecycleState::Ready
        } else {
            LifecycleState::Disabled
        };
        self.settle(&proxy, state);
        result
    }

    /// Forward Disable; no-op when no proxy is live.
    pub fn disable(&self) {
        if let Some(proxy) = self.live_proxy() {
            proxy.disable();
            self.settle(&proxy, LifecycleState::Disabled);
        }
    }

    /// Forward a message; dropped when no proxy is live.
    pub fn receive_message(&self, from: c_int, message: c_int, param: *mut c_void) {
        if let Some(proxy) = self.live_proxy() {
            proxy.receive_message(from, message, param);
        }
    }

    /// Forward Stop and release the proxy. The runtime itself stays loaded.
    pub fn stop(&self) {
        if self.changing_slot.replace(true) {
            warn!(state = %self.state(), "Stop re-entered while Start or Stop is running; ignoring");
            return;
        }
        let _done = scopeguard::guard(&self.changing_slot, |flag| flag.set(false));

        let released = self.proxy.borrow_mut().take();
        self.state.set(LifecycleState::Unloaded);
        if let Some(proxy) = released {
            proxy.stop();
            info!("managed proxy stopped and released");
        }
    }
}

impl<H, F> fmt::Debug for LifecycleForwarder<H, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let has_proxy = self.proxy.try_borrow().map(|proxy| proxy.is_some());
        f.debug_struct("LifecycleForwarder")
            .field("state", &self.state.get())
            .field("has_proxy", &has_proxy.ok())
            .finish_non_exhaustive()
    }
}
