//! Shared doubles for the integration tests.
//!
//! Managed entry points are plain `extern "C"` functions recording into
//! thread-local state; each test runs on its own thread, so tests never see
//! each other's calls.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_void, CStr};
use std::io;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;
use xphost_core::hostfxr::{
    HostContextHandle, HostFxr, InitializeOutcome, PlatformString, RuntimeDelegateKind,
};
use xphost_core::proxy::abi::{InitializeParameters, StartParameters};
use xphost_core::runtime::LoadFunctionError;
use xphost_core::{
    AssemblyLoader, BridgeConfig, DebugStringFn, HostBindings, HostServices, PluginLocation,
    ProxyBridge, ProxyFactory, ProxyHandle,
};

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

/// A `MakeWriter` that keeps everything written to it.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

pub struct CapturedWriter(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn lines_containing(&self, needle: &str) -> usize {
        self.contents().lines().filter(|l| l.contains(needle)).count()
    }

    /// Run `f` with a subscriber that records into these logs.
    pub fn capture<R>(&self, f: impl FnOnce() -> R) -> R {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CapturedWriter(self.0.clone())
    }
}

impl io::Write for CapturedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

thread_local! {
    static DEBUG_LINES: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

pub unsafe extern "C" fn record_debug_string(message: *const c_char) {
    let line = CStr::from_ptr(message).to_string_lossy().into_owned();
    DEBUG_LINES.with(|lines| lines.borrow_mut().push(line));
}

pub fn debug_lines() -> Vec<String> {
    DEBUG_LINES.with(|lines| lines.borrow().clone())
}

pub struct TestHost {
    pub plugin: Option<PathBuf>,
    pub system: Option<PathBuf>,
}

impl TestHost {
    /// A host reporting `<root>/sample.xpl` as this plugin.
    pub fn in_root(root: &Path) -> Self {
        Self {
            plugin: Some(root.join("sample.xpl")),
            system: Some(PathBuf::from("/opt/X-Plane 12")),
        }
    }
}

impl HostServices for TestHost {
    fn plugin_file_path(&self) -> Option<PathBuf> {
        self.plugin.clone()
    }

    fn system_path(&self) -> Option<PathBuf> {
        self.system.clone()
    }

    fn debug_string_fn(&self) -> DebugStringFn {
        record_debug_string
    }
}

// ---------------------------------------------------------------------------
// Managed proxy stubs
// ---------------------------------------------------------------------------

pub const MANAGED_NAME: &str = "Ünïcødé Sample";
pub const MANAGED_SIG: &str = "xp.sample.managed";
pub const MANAGED_DESC: &str = "Written by the managed proxy";

#[derive(Debug, Default, Clone)]
pub struct ManagedCalls {
    pub initialize: usize,
    pub start: usize,
    pub enable: usize,
    pub disable: usize,
    pub stop: usize,
    pub messages: Vec<(c_int, c_int, usize)>,
    pub startup_path: Option<String>,
    pub plugin_path: Option<String>,
}

thread_local! {
    static CALLS: RefCell<ManagedCalls> = RefCell::new(ManagedCalls::default());
    static CALL_BACK: RefCell<Option<Box<dyn FnOnce()>>> = RefCell::new(None);
    static ENABLE_RESULT: Cell<c_int> = const { Cell::new(1) };
    static START_RESULT: Cell<c_int> = const { Cell::new(1) };
}

pub fn calls() -> ManagedCalls {
    CALLS.with(|c| c.borrow().clone())
}

pub fn set_enable_result(result: c_int) {
    ENABLE_RESULT.with(|r| r.set(result));
}

pub fn set_start_result(result: c_int) {
    START_RESULT.with(|r| r.set(result));
}

/// Run `f` from inside the next managed Start, Enable or Stop, the way a
/// managed plugin calls back into the host while handling a lifecycle call.
///
/// `f` must not panic: it runs inside an `extern "C"` frame.
pub fn on_next_managed_call(f: impl FnOnce() + 'static) {
    CALL_BACK.with(|c| *c.borrow_mut() = Some(Box::new(f)));
}

fn call_back_into_host() {
    if let Some(f) = CALL_BACK.with(|c| c.borrow_mut().take()) {
        f();
    }
}

unsafe fn write_raw(dest: *mut c_char, value: &str) {
    std::ptr::copy_nonoverlapping(value.as_ptr().cast::<c_char>(), dest, value.len());
    *dest.add(value.len()) = 0;
}

pub unsafe extern "C" fn managed_start(
    out_name: *mut c_char,
    out_sig: *mut c_char,
    out_desc: *mut c_char,
) -> c_int {
    CALLS.with(|c| c.borrow_mut().start += 1);
    write_raw(out_name, MANAGED_NAME);
    write_raw(out_sig, MANAGED_SIG);
    write_raw(out_desc, MANAGED_DESC);
    call_back_into_host();
    START_RESULT.with(Cell::get)
}

pub unsafe extern "C" fn managed_start_with_parameters(parameters: *mut StartParameters) -> c_int {
    let parameters = &*parameters;
    CALLS.with(|c| {
        let mut c = c.borrow_mut();
        c.startup_path = Some(CStr::from_ptr(parameters.startup_path).to_string_lossy().into_owned());
        c.plugin_path = Some(CStr::from_ptr(parameters.plugin_path).to_string_lossy().into_owned());
    });
    let hello = c"managed start\n";
    (parameters.debug_string)(hello.as_ptr());
    managed_start(parameters.name, parameters.sig, parameters.desc)
}

pub unsafe extern "C" fn managed_enable() -> c_int {
    CALLS.with(|c| c.borrow_mut().enable += 1);
    call_back_into_host();
    ENABLE_RESULT.with(Cell::get)
}

pub unsafe extern "C" fn managed_disable() {
    CALLS.with(|c| c.borrow_mut().disable += 1);
}

pub unsafe extern "C" fn managed_stop() {
    CALLS.with(|c| c.borrow_mut().stop += 1);
    call_back_into_host();
}

pub unsafe extern "C" fn managed_receive_message(from: c_int, message: c_int, param: *mut c_void) {
    CALLS.with(|c| c.borrow_mut().messages.push((from, message, param as usize)));
}

unsafe fn record_initialize(parameters: &InitializeParameters) {
    CALLS.with(|c| {
        let mut c = c.borrow_mut();
        c.initialize += 1;
        c.startup_path = Some(CStr::from_ptr(parameters.startup_path).to_string_lossy().into_owned());
    });
}

pub unsafe extern "C" fn managed_initialize(parameters: *mut InitializeParameters) -> c_int {
    let parameters = &mut *parameters;
    record_initialize(parameters);
    parameters.start = Some(managed_start);
    parameters.enable = Some(managed_enable);
    parameters.receive_message = Some(managed_receive_message);
    parameters.disable = Some(managed_disable);
    parameters.stop = Some(managed_stop);
    1
}

pub unsafe extern "C" fn managed_initialize_without_disable(
    parameters: *mut InitializeParameters,
) -> c_int {
    let parameters = &mut *parameters;
    record_initialize(parameters);
    parameters.start = Some(managed_start);
    parameters.enable = Some(managed_enable);
    parameters.receive_message = Some(managed_receive_message);
    parameters.stop = Some(managed_stop);
    1
}

pub unsafe extern "C" fn managed_initialize_failing(parameters: *mut InitializeParameters) -> c_int {
    record_initialize(&*parameters);
    0
}

pub fn pointer<T>(function: T) -> NonNull<c_void>
where
    T: Copy,
{
    assert_eq!(std::mem::size_of::<T>(), std::mem::size_of::<*mut c_void>());
    // Function pointers and data pointers share a representation on every
    // target these tests run on.
    let raw: *mut c_void = unsafe { std::mem::transmute_copy(&function) };
    NonNull::new(raw).unwrap()
}

// ---------------------------------------------------------------------------
// Assembly loader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub assembly: PathBuf,
    pub type_name: String,
    pub method_name: String,
    pub delegate_type: String,
}

/// Serves managed entry points by method name.
#[derive(Default)]
pub struct MockLoader {
    functions: HashMap<&'static str, Result<NonNull<c_void>, i32>>,
    pub requests: RefCell<Vec<LoadRequest>>,
}

impl MockLoader {
    pub fn with(mut self, method: &'static str, function: NonNull<c_void>) -> Self {
        self.functions.insert(method, Ok(function));
        self
    }

    pub fn failing(mut self, method: &'static str, status: i32) -> Self {
        self.functions.insert(method, Err(status));
        self
    }

    /// Initialize protocol backed by [`managed_initialize`].
    pub fn initialize_protocol() -> Self {
        Self::default().with(
            "Initialize",
            pointer(managed_initialize as unsafe extern "C" fn(*mut InitializeParameters) -> c_int),
        )
    }

    /// Per-delegate protocol with every lifecycle method present.
    pub fn per_delegate_protocol() -> Self {
        Self::default()
            .with(
                "XPluginStart",
                pointer(
                    managed_start_with_parameters
                        as unsafe extern "C" fn(*mut StartParameters) -> c_int,
                ),
            )
            .with("XPluginStop", pointer(managed_stop as unsafe extern "C" fn()))
            .with(
                "XPluginEnable",
                pointer(managed_enable as unsafe extern "C" fn() -> c_int),
            )
            .with("XPluginDisable", pointer(managed_disable as unsafe extern "C" fn()))
            .with(
                "XPluginReceiveMessage",
                pointer(
                    managed_receive_message as unsafe extern "C" fn(c_int, c_int, *mut c_void),
                ),
            )
    }

    pub fn without(mut self, method: &'static str) -> Self {
        self.functions.remove(method);
        self
    }
}

/// `COR_E_MISSINGMETHOD`
pub const MISSING_METHOD: i32 = 0x8013_1513_u32 as i32;

impl AssemblyLoader for MockLoader {
    fn load_function(
        &self,
        assembly: &Path,
        type_name: &str,
        method_name: &str,
        delegate_type_name: &str,
    ) -> xphost_core::Result<Result<NonNull<c_void>, LoadFunctionError>> {
        self.requests.borrow_mut().push(LoadRequest {
            assembly: assembly.to_path_buf(),
            type_name: type_name.to_string(),
            method_name: method_name.to_string(),
            delegate_type: delegate_type_name.to_string(),
        });

        Ok(match self.functions.get(method_name) {
            Some(Ok(function)) => Ok(*function),
            Some(Err(status)) => Err(LoadFunctionError::Status(*status)),
            None => Err(LoadFunctionError::Status(MISSING_METHOD)),
        })
    }
}

/// A factory that binds the proxy through the real [`ProxyBridge`] against a
/// [`MockLoader`] instead of a booted runtime.
pub struct MockRuntimeFactory {
    pub loader: MockLoader,
    pub creations: usize,
}

impl MockRuntimeFactory {
    pub fn new(loader: MockLoader) -> Self {
        Self {
            loader,
            creations: 0,
        }
    }
}

impl ProxyFactory for MockRuntimeFactory {
    fn create(
        &mut self,
        location: &PluginLocation,
        bindings: HostBindings,
    ) -> xphost_core::Result<ProxyHandle> {
        self.creations += 1;
        let config = BridgeConfig::load(&location.root_path)?;
        ProxyBridge::new(config).create(&location.root_path, &self.loader, bindings)
    }
}

/// Lay out a plugin root: module, runtime configuration and, optionally,
/// the bridge assembly.
pub fn plugin_root(with_bridge: bool) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("sample.xpl"), b"").unwrap();
    std::fs::write(
        dir.path().join("xpproxy.runtimeconfig.json"),
        r#"{ "runtimeOptions": { "tfm": "net8.0",
             "framework": { "name": "Microsoft.NETCore.App", "version": "8.0.0" } } }"#,
    )
    .unwrap();
    if with_bridge {
        std::fs::write(dir.path().join("xpproxy.dll"), b"MZ").unwrap();
    }
    dir
}

// ---------------------------------------------------------------------------
// hostfxr
// ---------------------------------------------------------------------------

/// Scriptable hostfxr that counts opened and closed host contexts.
pub struct MockHostFxr {
    pub init_status: i32,
    pub hand_out_handle: bool,
    pub delegate_status: i32,
    pub delegate: *mut c_void,
    pub opened: Cell<usize>,
    pub closed: Cell<usize>,
    pub saw_dotnet_root: Cell<bool>,
    pub requested_kind: Cell<Option<RuntimeDelegateKind>>,
}

unsafe extern "system" fn fake_load_assembly() {}

impl Default for MockHostFxr {
    fn default() -> Self {
        Self {
            init_status: 0,
            hand_out_handle: true,
            delegate_status: 0,
            delegate: pointer(fake_load_assembly as unsafe extern "system" fn()).as_ptr(),
            opened: Cell::new(0),
            closed: Cell::new(0),
            saw_dotnet_root: Cell::new(false),
            requested_kind: Cell::new(None),
        }
    }
}

impl MockHostFxr {
    pub fn open_contexts(&self) -> usize {
        self.opened.get() - self.closed.get()
    }
}

impl HostFxr for MockHostFxr {
    fn initialize_for_runtime_config(
        &self,
        _runtime_config: &PlatformString,
        dotnet_root: Option<&PlatformString>,
    ) -> InitializeOutcome {
        self.saw_dotnet_root.set(dotnet_root.is_some());
        let handle = self.hand_out_handle.then(|| {
            self.opened.set(self.opened.get() + 1);
            NonNull::<u64>::dangling().cast::<c_void>()
        });
        InitializeOutcome {
            status: self.init_status,
            handle,
        }
    }

    fn get_runtime_delegate(
        &self,
        _handle: HostContextHandle,
        kind: RuntimeDelegateKind,
    ) -> (i32, *mut c_void) {
        self.requested_kind.set(Some(kind));
        (self.delegate_status, self.delegate)
    }

    fn close(&self, _handle: HostContextHandle) -> i32 {
        self.closed.set(self.closed.get() + 1);
        0
    }
}
