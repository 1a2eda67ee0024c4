//! In-memory mirror of the text tree the peer is believed to hold.

use std::collections::BTreeMap;

use crate::delta;
use crate::error::SyncError;
use crate::hash;

/// Path -> CRC-64 of the cached content. Produced on demand, never stored.
pub type ChecksumIndex = BTreeMap<String, u64>;

/// Mapping from relative path to the current content of a tracked file.
///
/// Each peer owns exactly one cache; coherence across peers is maintained
/// only by protocol exchanges. Entries exist only for tracked, readable,
/// non-directory files.
#[derive(Debug, Clone, Default)]
pub struct TextCache {
    files: BTreeMap<String, String>,
}

impl TextCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Unconditional replacement.
    pub fn put(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn remove(&mut self, path: &str) -> Option<String> {
        self.files.remove(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Materialize the checksum of every entry.
    #[must_use]
    pub fn snapshot(&self) -> ChecksumIndex {
        self.files
            .iter()
            .map(|(path, content)| (path.clone(), hash::crc64(content)))
            .collect()
    }

    /// Patch one entry in place.
    ///
    /// The base is the current content (empty for an absent entry, so a
    /// delta can create a file). On any failure the entry is left exactly
    /// as it was.
    ///
    /// # Errors
    /// [`SyncError::DeltaMismatch`] when the delta does not parse or does
    /// not fit the current content.
    pub fn apply(&mut self, path: &str, delta: &str) -> Result<&str, SyncError> {
        let base = self.get(path).unwrap_or("");
        let updated = delta::apply(base, delta).map_err(|source| SyncError::DeltaMismatch {
            path: path.to_string(),
            source,
        })?;
        self.files.insert(path.to_string(), updated);
        Ok(self.files[path].as_str())
    }
}
