//! X-Plane plugin module hosting a managed plugin.
//!
//! Exports the five plugin entry points the simulator calls and forwards each
//! of them to the single [`LifecycleForwarder`] owned by this module. All
//! runtime and proxy work lives in `xphost_core`.

#![allow(non_snake_case)]

pub mod ffi_guard;
pub mod logging;
pub mod xplm;

use std::ffi::{c_char, c_int, c_void};

use once_cell::unsync::OnceCell;
use parking_lot::ReentrantMutex;
use tracing::error;
use xphost_core::{ClrProxyFactory, HostServices, LifecycleForwarder, PluginInfoBuffers};

use ffi_guard::{guard_void, guard_with_default};
use xplm::XplmHost;

type Forwarder = LifecycleForwarder<XplmHost, ClrProxyFactory>;

/// The one forwarder of this loaded module. Created at the first Start.
///
/// Managed code may call back into the host from inside a lifecycle call and
/// the host answers with further lifecycle calls on the same thread, so the
/// lock is re-entrant.
static FORWARDER: ReentrantMutex<OnceCell<Forwarder>> = ReentrantMutex::new(OnceCell::new());

fn with_forwarder<R>(f: impl FnOnce(&OnceCell<Forwarder>) -> R) -> R {
    let slot = FORWARDER.lock();
    f(&slot)
}

fn start(slot: &OnceCell<Forwarder>, buffers: &PluginInfoBuffers) -> c_int {
    let bound = slot.get_or_try_init(|| {
        XplmHost::bind().map(|host| {
            logging::init(Some(host.debug_string_fn()));
            LifecycleForwarder::new(host, ClrProxyFactory)
        })
    });
    match bound {
        Ok(forwarder) => forwarder.start(buffers),
        Err(e) => {
            logging::init(None);
            error!("Start failed: {e}");
            buffers.write(
                "xphost",
                "xphost.xphost",
                &format!("Failed to start: {}", e.kind()),
            );
            0
        }
    }
}

/// # Safety
///
/// Each buffer must be null or writable for 256 bytes, as the simulator
/// guarantees.
#[no_mangle]
pub unsafe extern "C" fn XPluginStart(
    out_name: *mut c_char,
    out_sig: *mut c_char,
    out_desc: *mut c_char,
) -> c_int {
    let buffers = PluginInfoBuffers::from_raw(out_name, out_sig, out_desc);
    guard_with_default("XPluginStart", 0, || with_forwarder(|slot| start(slot, &buffers)))
}

#[no_mangle]
pub extern "C" fn XPluginStop() {
    guard_void("XPluginStop", || {
        with_forwarder(|slot| {
            if let Some(forwarder) = slot.get() {
                forwarder.stop();
            }
        })
    });
}

#[no_mangle]
pub extern "C" fn XPluginEnable() -> c_int {
    guard_with_default("XPluginEnable", 0, || {
        with_forwarder(|slot| slot.get().map_or(0, LifecycleForwarder::enable))
    })
}

#[no_mangle]
pub extern "C" fn XPluginDisable() {
    guard_void("XPluginDisable", || {
        with_forwarder(|slot| {
            if let Some(forwarder) = slot.get() {
                forwarder.disable();
            }
        })
    });
}

#[no_mangle]
pub extern "C" fn XPluginReceiveMessage(from: c_int, message: c_int, param: *mut c_void) {
    guard_void("XPluginReceiveMessage", || {
        with_forwarder(|slot| {
            if let Some(forwarder) = slot.get() {
                forwarder.receive_message(from, message, param);
            }
        })
    });
}
