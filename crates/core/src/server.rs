//! Server-side engine: applies requests against the disk tree and cache.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::cache::TextCache;
use crate::error::SyncError;
use crate::ignore::IgnorePolicy;
use crate::protocol::{
    Fault, FaultKind, ProtocolReader, ProtocolWriter, Request, Response, TextFile, TextFileDelta,
};
use crate::scan;

/// Owns the server's cache and its root directory; handles decoded requests
/// one at a time, so effects on a path never interleave across calls.
///
/// Write-through ordering: the cache is updated first, then the file. When
/// the disk write fails the cache entry is reverted, keeping the invariant
/// that the cache always equals the last content the engine put on disk.
pub struct ServerEngine {
    root: PathBuf,
    cache: TextCache,
}

impl ServerEngine {
    /// Walk `root` and populate the cache with every tracked file.
    ///
    /// # Errors
    /// Fails when the walk or a file read fails; startup errors are fatal.
    pub fn new(root: impl Into<PathBuf>, policy: &IgnorePolicy) -> Result<Self, SyncError> {
        let root = root.into();
        let cache = scan::build_cache(&root, policy)?;
        info!("indexed {} tracked file(s) under {}", cache.len(), root.display());
        Ok(Self { root, cache })
    }

    #[must_use]
    pub fn cache(&self) -> &TextCache {
        &self.cache
    }

    /// Handle one decoded request and produce its response.
    pub fn handle_request(&mut self, request: Request) -> Response {
        match request {
            Request::GetTextFile(path) => match self.cache.get(&path) {
                Some(content) => Response::TextContent(content.to_string()),
                None => Response::Error(vec![Fault {
                    kind: FaultKind::NotFound,
                    path,
                    detail: "no such entry in server cache".to_string(),
                }]),
            },

            // Missing paths are omitted; the caller reconciles.
            Request::GetTextFiles(paths) => Response::Files(
                paths
                    .into_iter()
                    .filter_map(|path| {
                        self.cache.get(&path).map(|content| TextFile {
                            content: content.to_string(),
                            path,
                        })
                    })
                    .collect(),
            ),

            Request::SendTextFile(file) => {
                debug!("overwrite {}", file.path);
                match self.store_file(file) {
                    None => Response::Ok,
                    Some(fault) => Response::Error(vec![fault]),
                }
            }

            // No rollback across the batch: already-stored files stay.
            Request::SendTextFiles(files) => {
                let faults: Vec<Fault> = files
                    .into_iter()
                    .filter_map(|file| self.store_file(file))
                    .collect();
                if faults.is_empty() {
                    Response::Ok
                } else {
                    Response::Error(faults)
                }
            }

            Request::GetFileHashes => Response::Hashes(self.cache.snapshot()),

            Request::ApplyDeltas(deltas) => {
                let faults: Vec<Fault> = deltas
                    .into_iter()
                    .filter_map(|delta| self.apply_delta(delta))
                    .collect();
                if faults.is_empty() {
                    Response::Ok
                } else {
                    Response::Error(faults)
                }
            }
        }
    }

    /// Dispatch loop: decode requests until the stream ends.
    ///
    /// # Errors
    /// Undecodable input tears the loop down with the protocol error;
    /// a clean EOF returns `Ok`.
    pub fn serve<R: Read, W: Write>(&mut self, reader: R, writer: W) -> Result<(), SyncError> {
        let mut reader = ProtocolReader::new(reader);
        let mut writer = ProtocolWriter::new(writer);

        loop {
            let request = match reader.read_request() {
                Ok(request) => request,
                Err(SyncError::TransportClosed) => {
                    info!("transport closed, stopping");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            let response = self.handle_request(request);
            writer.send_response(&response)?;
        }
    }

    fn store_file(&mut self, file: TextFile) -> Option<Fault> {
        let TextFile { path, content } = file;
        let previous = self.cache.get(&path).map(str::to_string);
        self.cache.put(path.clone(), content.clone());

        if let Err(e) = write_text_file(&self.root, &path, &content) {
            self.revert(&path, previous);
            warn!("write-through failed for {path}: {e}");
            return Some(Fault {
                kind: FaultKind::Io,
                path,
                detail: e.to_string(),
            });
        }
        None
    }

    fn apply_delta(&mut self, delta: TextFileDelta) -> Option<Fault> {
        let TextFileDelta { path, delta } = delta;
        let previous = self.cache.get(&path).map(str::to_string);

        let content = match self.cache.apply(&path, &delta) {
            Ok(content) => content.to_string(),
            Err(e) => {
                warn!("delta rejected for {path}: {e}");
                return Some(Fault {
                    kind: FaultKind::DeltaMismatch,
                    path,
                    detail: e.to_string(),
                });
            }
        };

        if let Err(e) = write_text_file(&self.root, &path, &content) {
            self.revert(&path, previous);
            warn!("write-through failed for {path}: {e}");
            return Some(Fault {
                kind: FaultKind::Io,
                path,
                detail: e.to_string(),
            });
        }
        None
    }

    fn revert(&mut self, path: &str, previous: Option<String>) {
        match previous {
            Some(content) => self.cache.put(path, content),
            None => {
                self.cache.remove(path);
            }
        }
    }
}

/// Write `content` under `root`, creating missing parents, mode 0644.
///
/// Shared by the engine's write-through and the client when it lands
/// pulled files on disk.
pub fn write_text_file(root: &Path, rel: &str, content: &str) -> std::io::Result<()> {
    let full = root.join(rel);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&full, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        std::fs::set_permissions(&full, std::fs::Permissions::from_mode(0o644))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta;
    use std::fs;
    use tempfile::TempDir;

    const STRING1: &str = "test string 1\nline two";

    fn engine_with_test_file() -> (TempDir, ServerEngine) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("testFile.txt"), STRING1).unwrap();
        let engine = ServerEngine::new(dir.path(), &IgnorePolicy::default()).unwrap();
        (dir, engine)
    }

    #[test]
    fn get_text_file_returns_content() {
        let (_dir, mut engine) = engine_with_test_file();

        let response = engine.handle_request(Request::GetTextFile("testFile.txt".to_string()));
        assert_eq!(response, Response::TextContent(STRING1.to_string()));
    }

    #[test]
    fn get_text_file_unknown_path_is_not_found() {
        let (_dir, mut engine) = engine_with_test_file();

        let response = engine.handle_request(Request::GetTextFile("missing.txt".to_string()));
        let Response::Error(faults) = response else {
            panic!("expected error response");
        };
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].kind, FaultKind::NotFound);
        assert_eq!(faults[0].path, "missing.txt");
    }

    #[test]
    fn get_text_files_omits_missing_paths() {
        let (_dir, mut engine) = engine_with_test_file();

        let response = engine.handle_request(Request::GetTextFiles(vec![
            "testFile.txt".to_string(),
            "missing.txt".to_string(),
        ]));
        let Response::Files(files) = response else {
            panic!("expected file list");
        };
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "testFile.txt");
        assert_eq!(files[0].content, STRING1);
    }

    #[test]
    fn send_text_file_overwrites_and_creates() {
        let (dir, mut engine) = engine_with_test_file();

        let overwrite = TextFile {
            path: "testFile.txt".to_string(),
            content: "asdfasdfasdf".to_string(),
        };
        let created = TextFile {
            path: "newpath.cpp".to_string(),
            content: "123456789".to_string(),
        };

        assert_eq!(
            engine.handle_request(Request::SendTextFile(overwrite)),
            Response::Ok
        );
        assert_eq!(
            engine.handle_request(Request::SendTextFile(created)),
            Response::Ok
        );

        assert_eq!(
            fs::read_to_string(dir.path().join("testFile.txt")).unwrap(),
            "asdfasdfasdf"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("newpath.cpp")).unwrap(),
            "123456789"
        );
        assert_eq!(engine.cache().get("testFile.txt"), Some("asdfasdfasdf"));
        assert_eq!(engine.cache().get("newpath.cpp"), Some("123456789"));
    }

    #[test]
    fn send_text_file_creates_parent_directories() {
        let (dir, mut engine) = engine_with_test_file();

        let file = TextFile {
            path: "a/b/c/deep.txt".to_string(),
            content: "deep".to_string(),
        };
        assert_eq!(engine.handle_request(Request::SendTextFile(file)), Response::Ok);
        assert_eq!(
            fs::read_to_string(dir.path().join("a/b/c/deep.txt")).unwrap(),
            "deep"
        );
    }

    #[test]
    fn apply_deltas_patches_disk_and_cache() {
        let (dir, mut engine) = engine_with_test_file();

        let string2 = "tested string 222\nline 2";
        let d = delta::between(STRING1, string2);

        let response = engine.handle_request(Request::ApplyDeltas(vec![TextFileDelta {
            path: "testFile.txt".to_string(),
            delta: d,
        }]));
        assert_eq!(response, Response::Ok);

        assert_eq!(
            fs::read_to_string(dir.path().join("testFile.txt")).unwrap(),
            string2
        );
        assert_eq!(engine.cache().get("testFile.txt"), Some(string2));
    }

    #[test]
    fn apply_deltas_can_create_a_file() {
        let (dir, mut engine) = engine_with_test_file();

        let d = delta::between("", "fresh\n");
        let response = engine.handle_request(Request::ApplyDeltas(vec![TextFileDelta {
            path: "fresh.md".to_string(),
            delta: d,
        }]));
        assert_eq!(response, Response::Ok);
        assert_eq!(fs::read_to_string(dir.path().join("fresh.md")).unwrap(), "fresh\n");
    }

    #[test]
    fn mismatched_delta_does_not_abort_the_batch() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("testFile.txt"), STRING1).unwrap();
        fs::write(dir.path().join("other.txt"), "aaa").unwrap();
        let mut engine = ServerEngine::new(dir.path(), &IgnorePolicy::default()).unwrap();

        let bogus = delta::between("completely different base text", "whatever");
        let good = delta::between("aaa", "aaab");

        let response = engine.handle_request(Request::ApplyDeltas(vec![
            TextFileDelta {
                path: "testFile.txt".to_string(),
                delta: bogus,
            },
            TextFileDelta {
                path: "other.txt".to_string(),
                delta: good,
            },
        ]));

        let Response::Error(faults) = response else {
            panic!("expected error response");
        };
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].kind, FaultKind::DeltaMismatch);
        assert_eq!(faults[0].path, "testFile.txt");

        // The healthy path still applied, the mismatched one is untouched.
        assert_eq!(fs::read_to_string(dir.path().join("other.txt")).unwrap(), "aaab");
        assert_eq!(fs::read_to_string(dir.path().join("testFile.txt")).unwrap(), STRING1);
        assert_eq!(engine.cache().get("testFile.txt"), Some(STRING1));
    }

    #[test]
    fn hash_index_covers_exactly_the_tracked_files() {
        let (_dir, mut engine) = engine_with_test_file();

        let response = engine.handle_request(Request::GetFileHashes);
        let Response::Hashes(index) = response else {
            panic!("expected hash index");
        };
        assert_eq!(index.len(), 1);
        assert_eq!(index["testFile.txt"], crate::hash::crc64(STRING1));
    }

    #[test]
    fn serve_loop_answers_framed_requests_in_order() {
        use crate::protocol::{encode_request, ProtocolReader};
        use std::io::Cursor;

        let (_dir, mut engine) = engine_with_test_file();

        let mut input = Vec::new();
        input.extend(encode_request(&Request::GetFileHashes).unwrap());
        input.extend(encode_request(&Request::GetTextFile("testFile.txt".to_string())).unwrap());

        let mut output = Vec::new();
        engine.serve(Cursor::new(input), &mut output).unwrap();

        let mut responses = ProtocolReader::new(Cursor::new(output));
        assert!(matches!(responses.read_response().unwrap(), Response::Hashes(_)));
        assert_eq!(
            responses.read_response().unwrap(),
            Response::TextContent(STRING1.to_string())
        );
    }
}
