//! FFI panic guards.
//!
//! Every exported lifecycle function runs inside one of these so that a
//! panic is logged and turned into the call's absent value instead of
//! unwinding into the simulator.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

/// Extract a human-readable message from a panic payload.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

fn report(op: &'static str, payload: Box<dyn Any + Send>) {
    let msg = panic_message(payload);
    let bt = std::backtrace::Backtrace::force_capture();
    error!("panic in `{op}`: {msg}\nbacktrace:\n{bt}");
}

/// Run an entry point that returns nothing.
pub fn guard_void(op: &'static str, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        report(op, payload);
    }
}

/// Run an entry point, returning `default` if it panics.
pub fn guard_with_default<T>(op: &'static str, default: T, f: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(payload) => {
            report(op, payload);
            default
        }
    }
}
