//! txtsync-transport: session plumbing between client and server
//!
//! Provides the [`SyncSession`] trait (the client's view of the six
//! protocol verbs), the SSH implementation, and an in-process local
//! implementation for tests.

use async_trait::async_trait;
use color_eyre::eyre::eyre;
use color_eyre::Result;

use txtsync_core::{ChecksumIndex, Fault, Response, TextFile, TextFileDelta};

pub mod local;
pub mod ssh;

pub use local::LocalSession;
pub use ssh::{SshSession, SshTransport};

/// Client-side handle to a running server engine.
///
/// One outstanding call at a time per session; implementations swap the
/// real SSH transport for an in-process engine in tests.
#[async_trait]
pub trait SyncSession: Send {
    /// Fetch the server's content for one path.
    async fn get_text_file(&mut self, path: &str) -> Result<String>;

    /// Fetch several paths at once; missing paths are omitted.
    async fn get_text_files(&mut self, paths: &[String]) -> Result<Vec<TextFile>>;

    /// Overwrite one file on the server.
    async fn send_text_file(&mut self, file: &TextFile) -> Result<()>;

    /// Overwrite several files on the server.
    async fn send_text_files(&mut self, files: &[TextFile]) -> Result<()>;

    /// Fetch the server's checksum index.
    async fn get_file_hashes(&mut self) -> Result<ChecksumIndex>;

    /// Apply a batch of deltas on the server.
    async fn apply_deltas(&mut self, deltas: &[TextFileDelta]) -> Result<()>;
}

fn fault_report(faults: Vec<Fault>) -> color_eyre::Report {
    let lines: Vec<String> = faults.iter().map(ToString::to_string).collect();
    eyre!("server reported {} fault(s): {}", faults.len(), lines.join("; "))
}

pub(crate) fn expect_content(response: Response) -> Result<String> {
    match response {
        Response::TextContent(content) => Ok(content),
        Response::Error(faults) => Err(fault_report(faults)),
        other => Err(eyre!("unexpected response: {other:?}")),
    }
}

pub(crate) fn expect_files(response: Response) -> Result<Vec<TextFile>> {
    match response {
        Response::Files(files) => Ok(files),
        Response::Error(faults) => Err(fault_report(faults)),
        other => Err(eyre!("unexpected response: {other:?}")),
    }
}

pub(crate) fn expect_hashes(response: Response) -> Result<ChecksumIndex> {
    match response {
        Response::Hashes(index) => Ok(index),
        Response::Error(faults) => Err(fault_report(faults)),
        other => Err(eyre!("unexpected response: {other:?}")),
    }
}

pub(crate) fn expect_ok(response: Response) -> Result<()> {
    match response {
        Response::Ok => Ok(()),
        Response::Error(faults) => Err(fault_report(faults)),
        other => Err(eyre!("unexpected response: {other:?}")),
    }
}
