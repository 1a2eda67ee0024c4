//! Startup reconciliation between the local cache and the server's index.

use std::path::Path;

use color_eyre::Result;
use tracing::{debug, info};

use txtsync_core::server::write_text_file;
use txtsync_core::{hash, SyncError, TextCache, TextFile};
use txtsync_transport::SyncSession;

/// Partition of `keys(client) ∪ keys(server)` by checksum comparison.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexCheck {
    /// Present locally, absent on the server.
    pub client_only: Vec<String>,
    /// Present on the server, absent locally.
    pub server_only: Vec<String>,
    /// Present on both with equal checksums.
    pub matched: Vec<String>,
    /// Present on both with differing checksums.
    pub mismatched: Vec<String>,
}

impl IndexCheck {
    /// True when nothing needs to move in either direction.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.client_only.is_empty() && self.server_only.is_empty() && self.mismatched.is_empty()
    }
}

/// Classifies both indexes and moves whole files to resolve the difference.
pub struct Reconciler<'a, S> {
    session: &'a mut S,
    cache: &'a mut TextCache,
    root: &'a Path,
}

impl<'a, S: SyncSession> Reconciler<'a, S> {
    pub fn new(session: &'a mut S, cache: &'a mut TextCache, root: &'a Path) -> Self {
        Self {
            session,
            cache,
            root,
        }
    }

    /// Compare the local cache against the server's checksum index.
    pub async fn check(&mut self) -> Result<IndexCheck> {
        let server_index = self.session.get_file_hashes().await?;
        let mut check = IndexCheck::default();

        for path in self.cache.paths() {
            let local = hash::crc64(self.cache.get(path).unwrap_or(""));
            match server_index.get(path) {
                Some(remote) if *remote == local => check.matched.push(path.to_string()),
                Some(_) => check.mismatched.push(path.to_string()),
                None => check.client_only.push(path.to_string()),
            }
        }
        for path in server_index.keys() {
            if !self.cache.contains(path) {
                check.server_only.push(path.clone());
            }
        }

        debug!(
            "index check: {} client-only, {} server-only, {} matched, {} mismatched",
            check.client_only.len(),
            check.server_only.len(),
            check.matched.len(),
            check.mismatched.len()
        );
        Ok(check)
    }

    /// Push files only the client has and pull files only the server has.
    ///
    /// Mismatching content means both sides were edited while offline; a
    /// character delta has no meaningful base then, so the whole run is
    /// refused with [`SyncError::ContentDivergence`] and neither side is
    /// touched.
    pub async fn auto_resolve(&mut self) -> Result<IndexCheck> {
        let check = self.check().await?;
        if !check.mismatched.is_empty() {
            return Err(SyncError::ContentDivergence {
                paths: check.mismatched.clone(),
            }
            .into());
        }

        if !check.client_only.is_empty() {
            info!("pushing {} file(s) to server", check.client_only.len());
            let files: Vec<TextFile> = check
                .client_only
                .iter()
                .map(|path| TextFile {
                    path: path.clone(),
                    content: self.cache.get(path).unwrap_or("").to_string(),
                })
                .collect();
            self.session.send_text_files(&files).await?;
        }

        if !check.server_only.is_empty() {
            info!("pulling {} file(s) from server", check.server_only.len());
            let files = self.session.get_text_files(&check.server_only).await?;
            for file in files {
                write_text_file(self.root, &file.path, &file.content)
                    .map_err(|e| SyncError::io(file.path.clone(), e))?;
                self.cache.put(file.path, file.content);
            }
        }

        Ok(check)
    }

    /// Fail unless both sides already hold the same tree.
    pub async fn assert_in_sync(&mut self) -> Result<()> {
        let check = self.check().await?;
        if check.is_converged() {
            return Ok(());
        }

        let mut report = String::from("client-server mismatch:\n");
        for path in &check.client_only {
            report.push_str(&format!("  on client, missing from server: {path}\n"));
        }
        for path in &check.server_only {
            report.push_str(&format!("  on server, missing from client: {path}\n"));
        }
        for path in &check.mismatched {
            report.push_str(&format!("  checksum mismatch: {path}\n"));
        }
        Err(color_eyre::eyre::eyre!(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use txtsync_core::{scan, IgnorePolicy};
    use txtsync_transport::LocalSession;

    fn local_tree(files: &[(&str, &str)]) -> (TempDir, TextCache) {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            fs::write(dir.path().join(path), content).unwrap();
        }
        let cache = scan::build_cache(dir.path(), &IgnorePolicy::default()).unwrap();
        (dir, cache)
    }

    fn server_tree(files: &[(&str, &str)]) -> (TempDir, LocalSession) {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            fs::write(dir.path().join(path), content).unwrap();
        }
        let session = LocalSession::new(dir.path()).unwrap();
        (dir, session)
    }

    #[tokio::test]
    async fn check_classifies_all_four_sets() {
        let (local_dir, mut cache) = local_tree(&[
            ("both-same.txt", "same"),
            ("both-diff.txt", "client version"),
            ("only-c.txt", "client only"),
        ]);
        let (_server_dir, mut session) = server_tree(&[
            ("both-same.txt", "same"),
            ("both-diff.txt", "server version"),
            ("only-s.txt", "server only"),
        ]);

        let mut reconciler = Reconciler::new(&mut session, &mut cache, local_dir.path());
        let check = reconciler.check().await.unwrap();

        assert_eq!(check.matched, vec!["both-same.txt"]);
        assert_eq!(check.mismatched, vec!["both-diff.txt"]);
        assert_eq!(check.client_only, vec!["only-c.txt"]);
        assert_eq!(check.server_only, vec!["only-s.txt"]);
    }

    #[tokio::test]
    async fn divergence_refuses_to_resolve_and_touches_nothing() {
        let (local_dir, mut cache) = local_tree(&[("a.txt", "X")]);
        let (server_dir, mut session) = server_tree(&[("a.txt", "Y")]);

        let mut reconciler = Reconciler::new(&mut session, &mut cache, local_dir.path());
        let err = reconciler.auto_resolve().await.unwrap_err();

        let sync_err = err.downcast_ref::<SyncError>().expect("typed error");
        assert!(
            matches!(sync_err, SyncError::ContentDivergence { paths } if paths == &["a.txt".to_string()])
        );

        // Neither side was modified.
        assert_eq!(fs::read_to_string(local_dir.path().join("a.txt")).unwrap(), "X");
        assert_eq!(fs::read_to_string(server_dir.path().join("a.txt")).unwrap(), "Y");
        assert_eq!(cache.get("a.txt"), Some("X"));
    }

    #[tokio::test]
    async fn resolve_pushes_and_pulls_missing_files() {
        let (local_dir, mut cache) = local_tree(&[("only-c.txt", "from client")]);
        let (server_dir, mut session) = server_tree(&[("only-s.txt", "from server")]);

        let mut reconciler = Reconciler::new(&mut session, &mut cache, local_dir.path());
        reconciler.auto_resolve().await.unwrap();

        // Server received the client-only file on disk and in cache.
        assert_eq!(
            fs::read_to_string(server_dir.path().join("only-c.txt")).unwrap(),
            "from client"
        );
        assert_eq!(session.engine().cache().get("only-c.txt"), Some("from client"));

        // Client received the server-only file on disk and in cache.
        assert_eq!(
            fs::read_to_string(local_dir.path().join("only-s.txt")).unwrap(),
            "from server"
        );
        assert_eq!(cache.get("only-s.txt"), Some("from server"));
    }

    #[tokio::test]
    async fn resolve_is_idempotent_once_converged() {
        let (local_dir, mut cache) = local_tree(&[("only-c.txt", "c")]);
        let (_server_dir, mut session) = server_tree(&[("only-s.txt", "s")]);

        let mut reconciler = Reconciler::new(&mut session, &mut cache, local_dir.path());
        reconciler.auto_resolve().await.unwrap();

        let check = reconciler.check().await.unwrap();
        assert!(check.is_converged());
        assert_eq!(check.matched.len(), 2);

        // A second resolve is a no-op and a further check agrees.
        let resolved = reconciler.auto_resolve().await.unwrap();
        assert!(resolved.is_converged());
        assert!(reconciler.check().await.unwrap().is_converged());

        reconciler.assert_in_sync().await.unwrap();
    }
}
