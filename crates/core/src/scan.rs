//! Startup walk: populate a [`TextCache`] from a directory tree.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use tracing::warn;

use crate::cache::TextCache;
use crate::error::SyncError;
use crate::ignore::IgnorePolicy;

fn walker(root: &Path, policy: &IgnorePolicy) -> ignore::Walk {
    let base = root.to_path_buf();
    let policy = policy.clone();

    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .require_git(false)
        .filter_entry(move |entry| {
            let Ok(rel) = entry.path().strip_prefix(&base) else {
                return true;
            };
            if rel.as_os_str().is_empty() {
                // the walk root itself
                return true;
            }
            if entry.file_type().is_some_and(|t| t.is_dir()) {
                return !policy.skip_dir(&rel.to_string_lossy());
            }
            true
        });
    builder.build()
}

/// Walk `root` and read every tracked file into a fresh cache.
///
/// Non-UTF-8 files that the suffix rule would otherwise track are skipped
/// with a warning; the system is text-only.
///
/// # Errors
/// Any traversal or read failure is fatal to the walk.
pub fn build_cache(root: &Path, policy: &IgnorePolicy) -> Result<TextCache, SyncError> {
    let mut cache = TextCache::new();

    for result in walker(root, policy) {
        let entry =
            result.map_err(|e| SyncError::io(root.display().to_string(), std::io::Error::other(e)))?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = rel.to_string_lossy().into_owned();
        if policy.ignore_file(&rel) {
            continue;
        }

        let bytes = std::fs::read(entry.path()).map_err(|e| SyncError::io(rel.clone(), e))?;
        match String::from_utf8(bytes) {
            Ok(content) => cache.put(rel, content),
            Err(_) => warn!("skipping non-utf8 file {rel}"),
        }
    }

    Ok(cache)
}

/// Every directory under `root` (excluding `root` itself) that traversal
/// may descend into. Used by the watcher to register subscriptions on
/// platforms whose notifications are directory-granular.
///
/// # Errors
/// Returns an error if traversal fails.
pub fn tracked_dirs(root: &Path, policy: &IgnorePolicy) -> Result<Vec<PathBuf>, SyncError> {
    let mut dirs = Vec::new();

    for result in walker(root, policy) {
        let entry =
            result.map_err(|e| SyncError::io(root.display().to_string(), std::io::Error::other(e)))?;
        if !entry.file_type().is_some_and(|t| t.is_dir()) {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        dirs.push(entry.path().to_path_buf());
    }

    Ok(dirs)
}
