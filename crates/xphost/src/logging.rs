//! Routing `tracing` output into the simulator's log.
//!
//! Each event becomes one line prefixed with [`LINE_PREFIX`], handed to
//! `XPLMDebugString`. Without a host channel the lines go to stderr.

use std::ffi::CString;
use std::io::{self, Write};

use once_cell::sync::OnceCell;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;
use xphost_core::config::env_vars;
use xphost_core::DebugStringFn;

/// Prefix carried by every line this module writes to the host log.
pub const LINE_PREFIX: &str = "[xphost] ";

/// Filter used when `XPHOST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "xphost=info,xphost_core=info";

static INIT: OnceCell<()> = OnceCell::new();

/// Install the global subscriber. Later calls are ignored.
pub fn init(sink: Option<DebugStringFn>) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_env(env_vars::LOG)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        // Another subscriber may already be installed in this process.
        let _ = tracing::subscriber::set_global_default(subscriber(sink, filter));
    });
}

/// The subscriber installed by [`init`].
pub fn subscriber(
    sink: Option<DebugStringFn>,
    filter: EnvFilter,
) -> impl tracing::Subscriber + Send + Sync + 'static {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(HostLog { sink })
        .with_ansi(false)
        .without_time()
        .with_target(true)
        .finish()
}

/// `MakeWriter` for the host debug channel.
#[derive(Debug, Clone, Copy)]
pub struct HostLog {
    sink: Option<DebugStringFn>,
}

impl<'a> MakeWriter<'a> for HostLog {
    type Writer = HostLine;

    fn make_writer(&'a self) -> Self::Writer {
        HostLine {
            sink: self.sink,
            buffer: Vec::new(),
        }
    }
}

/// Buffers one formatted event and emits it when dropped.
pub struct HostLine {
    sink: Option<DebugStringFn>,
    buffer: Vec<u8>,
}

impl Write for HostLine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for HostLine {
    fn drop(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let line = host_line(&self.buffer);
        match self.sink {
            Some(debug_string) => unsafe { debug_string(line.as_ptr()) },
            None => {
                let _ = io::stderr().write_all(line.as_bytes());
            }
        }
    }
}

/// Prefix every line of `event`, end with a newline and drop interior NULs.
pub fn host_line(event: &[u8]) -> CString {
    let text = String::from_utf8_lossy(event);
    let mut out = String::with_capacity(text.len() + LINE_PREFIX.len() + 1);
    for line in text.trim_end_matches(['\r', '\n']).split('\n') {
        out.push_str(LINE_PREFIX);
        out.push_str(line.trim_end_matches('\r'));
        out.push('\n');
    }
    let bytes: Vec<u8> = out.into_bytes().into_iter().filter(|&b| b != 0).collect();
    // Interior NULs were removed above.
    CString::new(bytes).unwrap_or_default()
}
