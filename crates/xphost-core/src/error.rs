//! Bridge error taxonomy.
//!
//! Every failure on the bootstrap path is one of these variants. They travel
//! as typed results up to the lifecycle forwarder, which logs them once and
//! turns them into the host's integer failure code.

use std::path::PathBuf;

use thiserror::Error;

use crate::proxy::Operation;

/// Errors raised while resolving, booting and binding the managed proxy.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("PathResolutionFailed: the host did not report the location of this plugin")]
    PathResolutionFailed,

    #[error("LibraryLoadFailed: {path}: {reason}")]
    LibraryLoadFailed { path: PathBuf, reason: String },

    #[error("ExportNotFound: {0}")]
    ExportNotFound(String),

    #[error("RuntimeNotFound: {0}")]
    RuntimeNotFound(String),

    #[error("RuntimeInitFailed: {0}")]
    RuntimeInitFailed(String),

    #[error("DelegateResolutionFailed: {kind} (status {status:#010x})")]
    DelegateResolutionFailed { kind: &'static str, status: i32 },

    #[error("AssemblyLoadFailed: {path}: {reason}")]
    AssemblyLoadFailed { path: PathBuf, reason: String },

    #[error("DelegateMissing: {0}")]
    DelegateMissing(Operation),

    #[error("ManagedInitFailed: managed Initialize returned {0}")]
    ManagedInitFailed(i32),

    #[error("InvalidPath: {0} cannot be passed across the runtime boundary")]
    InvalidPath(PathBuf),

    #[error("Config: {0}")]
    Config(String),
}

impl BridgeError {
    /// Short taxonomy name, used for the host-visible failure description.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::PathResolutionFailed => "PathResolutionFailed",
            BridgeError::LibraryLoadFailed { .. } => "LibraryLoadFailed",
            BridgeError::ExportNotFound(_) => "ExportNotFound",
            BridgeError::RuntimeNotFound(_) => "RuntimeNotFound",
            BridgeError::RuntimeInitFailed(_) => "RuntimeInitFailed",
            BridgeError::DelegateResolutionFailed { .. } => "DelegateResolutionFailed",
            BridgeError::AssemblyLoadFailed { .. } => "AssemblyLoadFailed",
            BridgeError::DelegateMissing(_) => "DelegateMissing",
            BridgeError::ManagedInitFailed(_) => "ManagedInitFailed",
            BridgeError::InvalidPath(_) => "InvalidPath",
            BridgeError::Config(_) => "Config",
        }
    }

    pub(crate) fn library_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        BridgeError::LibraryLoadFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn assembly_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        BridgeError::AssemblyLoadFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Bridge result type
pub type Result<T> = std::result::Result<T, BridgeError>;
