//! The managed proxy bridge.
//!
//! Binds the fixed set of lifecycle entry points exported by the proxy type
//! in the bridge module. Construction is all-or-nothing: a [`ProxyHandle`]
//! only exists once every entry point has been resolved.

pub mod abi;

use std::ffi::{c_int, c_void, CString};
use std::fmt;
use std::path::Path;
use std::ptr::NonNull;

use tracing::{debug, info};

use crate::config::{BridgeConfig, ProxyProtocol};
use crate::error::{BridgeError, Result};
use crate::info::PluginInfoBuffers;
use crate::location::DebugStringFn;
use crate::runtime::AssemblyLoader;

use abi::{
    DisableFn, EnableFn, InitializeFn, InitializeParameters, ReceiveMessageFn, StartFn,
    StartParameters, StartWithParametersFn, StopFn, INITIALIZE_SUCCESS,
};

/// A logical operation exported by the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Start,
    Stop,
    Enable,
    Disable,
    ReceiveMessage,
    Initialize,
}

impl Operation {
    /// The five operations the host drives.
    pub const LIFECYCLE: [Operation; 5] = [
        Operation::Start,
        Operation::Stop,
        Operation::Enable,
        Operation::Disable,
        Operation::ReceiveMessage,
    ];

    /// Managed method name on the proxy type.
    pub fn method_name(&self) -> &'static str {
        match self {
            Operation::Start => "XPluginStart",
            Operation::Stop => "XPluginStop",
            Operation::Enable => "XPluginEnable",
            Operation::Disable => "XPluginDisable",
            Operation::ReceiveMessage => "XPluginReceiveMessage",
            Operation::Initialize => "Initialize",
        }
    }

    /// Assembly-qualified delegate type bound to this operation, declared in
    /// `namespace` of `assembly`. An empty namespace means the global one.
    pub fn delegate_type_name(&self, namespace: &str, assembly: &str) -> String {
        let stem = match self {
            Operation::Start => "Start",
            Operation::Stop => "Stop",
            Operation::Enable => "Enable",
            Operation::Disable => "Disable",
            Operation::ReceiveMessage => "ReceiveMessage",
            Operation::Initialize => "Initialize",
        };
        if namespace.is_empty() {
            format!("{stem}Delegate, {assembly}")
        } else {
            format!("{namespace}.{stem}Delegate, {assembly}")
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method_name())
    }
}

/// How the proxy's Start is called.
#[derive(Debug, Clone, Copy)]
pub enum StartEntry {
    /// Start receives the host buffers directly.
    Buffers(StartFn),
    /// Start receives a [`StartParameters`] block.
    Parameters(StartWithParametersFn),
}

/// One resolved entry point per lifecycle operation.
#[derive(Debug, Clone, Copy)]
pub struct DelegateTable {
    start: StartEntry,
    stop: StopFn,
    enable: EnableFn,
    disable: DisableFn,
    receive_message: ReceiveMessageFn,
}

impl DelegateTable {
    pub fn builder() -> DelegateTableBuilder {
        DelegateTableBuilder::default()
    }
}

/// Collects entry points; `build` fails on the first missing one.
#[derive(Debug, Default)]
pub struct DelegateTableBuilder {
    start: Option<StartEntry>,
    stop: Option<StopFn>,
    enable: Option<EnableFn>,
    disable: Option<DisableFn>,
    receive_message: Option<ReceiveMessageFn>,
}

impl DelegateTableBuilder {
    pub fn start(mut self, start: Option<StartEntry>) -> Self {
        self.start = start;
        self
    }

    pub fn stop(mut self, stop: Option<StopFn>) -> Self {
        self.stop = stop;
        self
    }

    pub fn enable(mut self, enable: Option<EnableFn>) -> Self {
        self.enable = enable;
        self
    }

    pub fn disable(mut self, disable: Option<DisableFn>) -> Self {
        self.disable = disable;
        self
    }

    pub fn receive_message(mut self, receive_message: Option<ReceiveMessageFn>) -> Self {
        self.receive_message = receive_message;
        self
    }

    pub fn build(self) -> Result<DelegateTable> {
        Ok(DelegateTable {
            start: self.start.ok_or(BridgeError::DelegateMissing(Operation::Start))?,
            stop: self.stop.ok_or(BridgeError::DelegateMissing(Operation::Stop))?,
            enable: self.enable.ok_or(BridgeError::DelegateMissing(Operation::Enable))?,
            disable: self
                .disable
                .ok_or(BridgeError::DelegateMissing(Operation::Disable))?,
            receive_message: self
                .receive_message
                .ok_or(BridgeError::DelegateMissing(Operation::ReceiveMessage))?,
        })
    }
}

/// Host capabilities handed to the managed side.
///
/// The strings are owned here so they outlive every managed call.
#[derive(Debug, Clone)]
pub struct HostBindings {
    debug_string: DebugStringFn,
    startup_path: CString,
    plugin_path: CString,
}

impl HostBindings {
    pub fn new(debug_string: DebugStringFn, startup_path: &Path, plugin_path: &Path) -> Result<Self> {
        Ok(Self {
            debug_string,
            startup_path: utf8_c_string(startup_path)?,
            plugin_path: utf8_c_string(plugin_path)?,
        })
    }
}

fn utf8_c_string(path: &Path) -> Result<CString> {
    path.to_str()
        .and_then(|s| CString::new(s).ok())
        .ok_or_else(|| BridgeError::InvalidPath(path.to_path_buf()))
}

/// A fully bound managed proxy.
#[derive(Debug)]
pub struct ProxyHandle {
    table: DelegateTable,
    bindings: HostBindings,
}

impl ProxyHandle {
    /// # Safety
    ///
    /// Every entry point in `table` must stay callable with its declared
    /// signature for as long as the handle lives.
    pub unsafe fn new(table: DelegateTable, bindings: HostBindings) -> Self {
        Self { table, bindings }
    }

    pub fn start(&self, buffers: &PluginInfoBuffers) -> c_int {
        match self.table.start {
            StartEntry::Buffers(start) => unsafe { start(buffers.name, buffers.sig, buffers.desc) },
            StartEntry::Parameters(start) => {
                let mut parameters = StartParameters {
                    name: buffers.name,
                    sig: buffers.sig,
                    desc: buffers.desc,
                    debug_string: self.bindings.debug_string,
                    startup_path: self.bindings.startup_path.as_ptr(),
                    plugin_path: self.bindings.plugin_path.as_ptr(),
                };
                unsafe { start(&mut parameters) }
            }
        }
    }

    pub fn enable(&self) -> c_int {
        unsafe { (self.table.enable)() }
    }

    pub fn disable(&self) {
        unsafe { (self.table.disable)() }
    }

    pub fn stop(&self) {
        unsafe { (self.table.stop)() }
    }

    /// `param` is passed through without being read.
    pub fn receive_message(&self, from: c_int, message: c_int, param: *mut c_void) {
        unsafe { (self.table.receive_message)(from, message, param) }
    }
}

/// Binds the proxy type inside the bridge module.
#[derive(Debug, Clone)]
pub struct ProxyBridge {
    config: BridgeConfig,
}

impl ProxyBridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// Resolve every lifecycle entry point and return the bound proxy.
    pub fn create(
        &self,
        plugin_root: &Path,
        loader: &dyn AssemblyLoader,
        bindings: HostBindings,
    ) -> Result<ProxyHandle> {
        let assembly = self.config.bridge_module_path(plugin_root);
        if !assembly.is_file() {
            return Err(BridgeError::assembly_load(&assembly, "bridge module not found"));
        }

        let table = match self.config.protocol {
            ProxyProtocol::Initialize => self.bind_with_initialize(loader, &assembly, &bindings)?,
            ProxyProtocol::PerDelegate => self.bind_per_delegate(loader, &assembly)?,
        };

        info!(
            assembly = %assembly.display(),
            protocol = ?self.config.protocol,
            "managed proxy bound"
        );
        // Every entry came from the runtime for the signature it is stored
        // under, and the runtime is never torn down.
        Ok(unsafe { ProxyHandle::new(table, bindings) })
    }

    fn bind_with_initialize(
        &self,
        loader: &dyn AssemblyLoader,
        assembly: &Path,
        bindings: &HostBindings,
    ) -> Result<DelegateTable> {
        let initialize = self.resolve(
            loader,
            assembly,
            Operation::Initialize,
            &self.config.initialize_delegate_type,
        )?;
        let initialize: InitializeFn = unsafe { std::mem::transmute(initialize.as_ptr()) };

        let mut parameters = InitializeParameters {
            debug_string: bindings.debug_string,
            startup_path: bindings.startup_path.as_ptr(),
            start: None,
            enable: None,
            receive_message: None,
            disable: None,
            stop: None,
        };
        let status = unsafe { initialize(&mut parameters) };
        if status != INITIALIZE_SUCCESS {
            return Err(BridgeError::ManagedInitFailed(status));
        }

        DelegateTable::builder()
            .start(parameters.start.map(StartEntry::Buffers))
            .stop(parameters.stop)
            .enable(parameters.enable)
            .disable(parameters.disable)
            .receive_message(parameters.receive_message)
            .build()
    }

    fn bind_per_delegate(&self, loader: &dyn AssemblyLoader, assembly: &Path) -> Result<DelegateTable> {
        let (namespace, assembly_name) = self.proxy_type_scope();
        let mut resolved = Vec::with_capacity(Operation::LIFECYCLE.len());
        for operation in Operation::LIFECYCLE {
            let delegate_type = operation.delegate_type_name(namespace, assembly_name);
            let function = self.resolve(loader, assembly, operation, &delegate_type)?;
            resolved.push(function.as_ptr());
        }

        // Order matches Operation::LIFECYCLE; each pointer was bound to the
        // delegate type of its operation.
        unsafe {
            DelegateTable::builder()
                .start(Some(StartEntry::Parameters(std::mem::transmute::<
                    *mut c_void,
                    StartWithParametersFn,
                >(resolved[0]))))
                .stop(Some(std::mem::transmute::<*mut c_void, StopFn>(resolved[1])))
                .enable(Some(std::mem::transmute::<*mut c_void, EnableFn>(resolved[2])))
                .disable(Some(std::mem::transmute::<*mut c_void, DisableFn>(resolved[3])))
                .receive_message(Some(std::mem::transmute::<*mut c_void, ReceiveMessageFn>(
                    resolved[4],
                )))
                .build()
        }
    }

    fn resolve(
        &self,
        loader: &dyn AssemblyLoader,
        assembly: &Path,
        operation: Operation,
        delegate_type: &str,
    ) -> Result<NonNull<c_void>> {
        match loader.load_function(
            assembly,
            &self.config.proxy_type,
            operation.method_name(),
            delegate_type,
        )? {
            Ok(function) => {
                debug!(%operation, "resolved managed entry point");
                Ok(function)
            }
            Err(e) if e.is_assembly_failure() => Err(BridgeError::assembly_load(assembly, e)),
            Err(e) => {
                debug!(%operation, error = %e, "managed entry point not resolved");
                Err(BridgeError::DelegateMissing(operation))
            }
        }
    }

    /// Namespace and assembly of the configured proxy type. The per-operation
    /// delegate types live next to it. Without an assembly part the bridge
    /// module name is used.
    fn proxy_type_scope(&self) -> (&str, &str) {
        let mut parts = self.config.proxy_type.split(',').map(str::trim);
        let type_name = parts.next().unwrap_or_default();
        let assembly = parts
            .next()
            .filter(|assembly| !assembly.is_empty())
            .unwrap_or(self.config.bridge_name.as_str());
        let namespace = type_name.rsplit_once('.').map_or("", |(namespace, _)| namespace);
        (namespace, assembly)
    }
}
