//! Managed-proxy-facing ABI.
//!
//! Layouts here are mirrored by the proxy assembly and must not be
//! reordered.

use std::ffi::{c_char, c_int, c_void};

use crate::location::DebugStringFn;

/// `XPluginStart` as exported by the proxy in the Initialize protocol.
pub type StartFn =
    unsafe extern "C" fn(out_name: *mut c_char, out_sig: *mut c_char, out_desc: *mut c_char) -> c_int;

/// `XPluginStart` as a per-operation delegate.
pub type StartWithParametersFn = unsafe extern "C" fn(parameters: *mut StartParameters) -> c_int;

pub type EnableFn = unsafe extern "C" fn() -> c_int;

pub type DisableFn = unsafe extern "C" fn();

pub type StopFn = unsafe extern "C" fn();

pub type ReceiveMessageFn = unsafe extern "C" fn(from: c_int, message: c_int, param: *mut c_void);

pub type InitializeFn = unsafe extern "C" fn(parameters: *mut InitializeParameters) -> c_int;

/// Passed to the per-operation Start delegate.
#[repr(C)]
#[derive(Debug)]
pub struct StartParameters {
    pub name: *mut c_char,
    pub sig: *mut c_char,
    pub desc: *mut c_char,
    pub debug_string: DebugStringFn,
    pub startup_path: *const c_char,
    pub plugin_path: *const c_char,
}

/// Passed to the managed `Initialize`; the proxy fills in the five entry
/// points.
#[repr(C)]
#[derive(Debug)]
pub struct InitializeParameters {
    pub debug_string: DebugStringFn,
    pub startup_path: *const c_char,
    pub start: Option<StartFn>,
    pub enable: Option<EnableFn>,
    pub receive_message: Option<ReceiveMessageFn>,
    pub disable: Option<DisableFn>,
    pub stop: Option<StopFn>,
}

/// Return value of a successful managed `Initialize`.
pub const INITIALIZE_SUCCESS: c_int = 1;
