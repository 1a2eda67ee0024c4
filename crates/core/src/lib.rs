//! txtsync-core: Core sync engine
//!
//! Provides the ignore policy, the in-memory text cache, the character-level
//! delta codec, the wire protocol, and the server-side engine.

pub mod cache;
pub mod delta;
pub mod error;
pub mod hash;
pub mod ignore;
pub mod protocol;
pub mod scan;
pub mod server;

pub use cache::{ChecksumIndex, TextCache};
pub use delta::DeltaError;
pub use error::SyncError;
pub use ignore::IgnorePolicy;
pub use protocol::{
    Fault, FaultKind, ProtocolReader, ProtocolWriter, Request, Response, TextFile, TextFileDelta,
};
pub use server::ServerEngine;
