//! Which relative paths are part of the mirrored tree.

/// Suffix/prefix classification of tracked files.
///
/// A file is tracked when its path carries one of the text suffixes and does
/// not live under one of the noise prefixes. Directories are only checked
/// against the prefixes so traversal can descend into e.g. `docs/` even
/// though `docs` itself has no suffix.
#[derive(Debug, Clone)]
pub struct IgnorePolicy {
    /// File suffixes that are considered text and synced.
    pub suffixes: Vec<String>,
    /// Path prefixes (relative, slash-separated) that are never entered.
    pub prefixes: Vec<String>,
}

impl Default for IgnorePolicy {
    fn default() -> Self {
        let suffixes = [
            ".c", ".h", ".cpp", ".hpp", ".go", ".hs", ".cl", ".js", ".md", ".txt", ".rs", ".toml",
        ];
        let prefixes = [".git", ".idea", ".realtime", "target"];
        Self {
            suffixes: suffixes.iter().map(ToString::to_string).collect(),
            prefixes: prefixes.iter().map(ToString::to_string).collect(),
        }
    }
}

impl IgnorePolicy {
    /// Inclusion rule: should this file be excluded from the mirror?
    #[must_use]
    pub fn ignore_file(&self, path: &str) -> bool {
        if self.under_noise_prefix(path) {
            return true;
        }
        !self.suffixes.iter().any(|s| path.ends_with(s.as_str()))
    }

    /// Traversal rule: should this directory be skipped entirely?
    #[must_use]
    pub fn skip_dir(&self, path: &str) -> bool {
        self.under_noise_prefix(path)
    }

    fn under_noise_prefix(&self, path: &str) -> bool {
        self.prefixes.iter().any(|prefix| {
            path.strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_text_suffixes() {
        let policy = IgnorePolicy::default();
        assert!(!policy.ignore_file("main.go"));
        assert!(!policy.ignore_file("src/lib.rs"));
        assert!(!policy.ignore_file("notes/readme.md"));
    }

    #[test]
    fn ignores_unknown_suffixes() {
        let policy = IgnorePolicy::default();
        assert!(policy.ignore_file("image.png"));
        assert!(policy.ignore_file("binary"));
        assert!(policy.ignore_file("archive.tar.gz"));
    }

    #[test]
    fn ignores_noise_prefixes() {
        let policy = IgnorePolicy::default();
        assert!(policy.ignore_file(".git/config.txt"));
        assert!(policy.ignore_file(".idea/workspace.md"));
        assert!(policy.skip_dir(".git"));
        assert!(policy.skip_dir("target/debug"));
    }

    #[test]
    fn prefix_match_is_component_aware() {
        let policy = IgnorePolicy::default();
        // "targets" is not "target"
        assert!(!policy.skip_dir("targets"));
        assert!(!policy.ignore_file("targets/notes.txt"));
    }

    #[test]
    fn directories_are_not_suffix_checked() {
        let policy = IgnorePolicy::default();
        assert!(!policy.skip_dir("docs"));
        assert!(!policy.skip_dir("src/nested"));
    }

    #[test]
    fn custom_lists() {
        let policy = IgnorePolicy {
            suffixes: vec![".py".to_string()],
            prefixes: vec!["venv".to_string()],
        };
        assert!(!policy.ignore_file("script.py"));
        assert!(policy.ignore_file("script.rs"));
        assert!(policy.ignore_file("venv/lib.py"));
    }
}
