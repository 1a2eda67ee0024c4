//! Error kinds shared across the sync engine.

use thiserror::Error;

use crate::delta::DeltaError;

/// Errors produced by the sync core.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Filesystem operation failed.
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Requested path absent from the server cache.
    #[error("not found on server: {path}")]
    NotFound { path: String },

    /// A delta could not be applied cleanly.
    #[error("delta did not apply to {path}: {source}")]
    DeltaMismatch {
        path: String,
        #[source]
        source: DeltaError,
    },

    /// Reconciliation found the same path with different content on both
    /// sides. Requires human intervention; nothing is merged automatically.
    #[error("content diverged on both sides: {}", paths.join(", "))]
    ContentDivergence { paths: Vec<String> },

    /// The byte stream to the peer ended. Terminal.
    #[error("transport closed")]
    TransportClosed,

    /// A frame on the wire could not be decoded. Terminal.
    #[error("protocol error: {reason}")]
    Protocol { reason: String },
}

impl SyncError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }
}
