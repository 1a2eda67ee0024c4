//! Local in-process session for testing
//!
//! Wraps a [`ServerEngine`] directly, without SSH or framing, so client
//! logic (reconciler, watcher) can be exercised against a real engine
//! operating on a local directory.

use std::path::Path;

use async_trait::async_trait;
use color_eyre::Result;

use txtsync_core::{
    ChecksumIndex, IgnorePolicy, Request, ServerEngine, TextFile, TextFileDelta,
};

use crate::{expect_content, expect_files, expect_hashes, expect_ok, SyncSession};

/// In-process session over a directory on the local filesystem.
pub struct LocalSession {
    engine: ServerEngine,
}

impl LocalSession {
    /// Stand up an engine rooted at `root`.
    pub fn new(root: &Path) -> Result<Self> {
        Ok(Self {
            engine: ServerEngine::new(root, &IgnorePolicy::default())?,
        })
    }

    #[must_use]
    pub fn engine(&self) -> &ServerEngine {
        &self.engine
    }
}

#[async_trait]
impl SyncSession for LocalSession {
    async fn get_text_file(&mut self, path: &str) -> Result<String> {
        expect_content(self.engine.handle_request(Request::GetTextFile(path.to_string())))
    }

    async fn get_text_files(&mut self, paths: &[String]) -> Result<Vec<TextFile>> {
        expect_files(self.engine.handle_request(Request::GetTextFiles(paths.to_vec())))
    }

    async fn send_text_file(&mut self, file: &TextFile) -> Result<()> {
        expect_ok(self.engine.handle_request(Request::SendTextFile(file.clone())))
    }

    async fn send_text_files(&mut self, files: &[TextFile]) -> Result<()> {
        expect_ok(self.engine.handle_request(Request::SendTextFiles(files.to_vec())))
    }

    async fn get_file_hashes(&mut self) -> Result<ChecksumIndex> {
        expect_hashes(self.engine.handle_request(Request::GetFileHashes))
    }

    async fn apply_deltas(&mut self, deltas: &[TextFileDelta]) -> Result<()> {
        expect_ok(self.engine.handle_request(Request::ApplyDeltas(deltas.to_vec())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use txtsync_core::delta;

    #[tokio::test]
    async fn session_reads_and_writes_through_the_engine() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("seed.txt"), "seed content").unwrap();

        let mut session = LocalSession::new(dir.path()).unwrap();

        assert_eq!(session.get_text_file("seed.txt").await.unwrap(), "seed content");

        session
            .send_text_file(&TextFile {
                path: "pushed.md".to_string(),
                content: "# pushed".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("pushed.md")).unwrap(),
            "# pushed"
        );

        let hashes = session.get_file_hashes().await.unwrap();
        assert!(hashes.contains_key("seed.txt"));
        assert!(hashes.contains_key("pushed.md"));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut session = LocalSession::new(dir.path()).unwrap();

        let err = session.get_text_file("nope.txt").await.unwrap_err();
        assert!(err.to_string().contains("nope.txt"));
    }

    #[tokio::test]
    async fn deltas_apply_through_the_session() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("doc.txt"), "before edit").unwrap();

        let mut session = LocalSession::new(dir.path()).unwrap();
        session
            .apply_deltas(&[TextFileDelta {
                path: "doc.txt".to_string(),
                delta: delta::between("before edit", "after edit"),
            }])
            .await
            .unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("doc.txt")).unwrap(),
            "after edit"
        );
    }
}
