// SPDX-License-Identifier: Apache-2.0

use glob::{Pattern, glob};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

use super::file_id::FileId;
use crate::receivers::file::error::{Error, Result};
use crate::receivers::file::source::LogSource;

/// A file matched by a source on one scan pass.
///
/// Candidates are re-statted on every pass and never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCandidate {
    pub path: PathBuf,
    pub file_id: FileId,
    pub size: u64,
}

impl FileCandidate {
    /// Stat a single path. Directories yield `None`.
    pub fn stat(path: PathBuf) -> std::io::Result<Option<Self>> {
        let (file_id, metadata) = FileId::stat(&path)?;
        if metadata.is_dir() {
            return Ok(None);
        }

        Ok(Some(Self {
            path,
            file_id,
            size: metadata.len(),
        }))
    }
}

/// Two candidates are the same physical file when their identities match,
/// whatever their path or size.
pub fn same_identity(a: &FileCandidate, b: &FileCandidate) -> bool {
    a.file_id == b.file_id
}

/// Expand the path or glob pattern of a source into concrete files, sorted by
/// path.
///
/// Files that vanish or cannot be statted between listing and stat are left
/// out for this pass. Only an invalid pattern is an error.
pub fn resolve(source: &LogSource) -> Result<Vec<FileCandidate>> {
    let exclude = source
        .exclude
        .iter()
        .map(|p| Pattern::new(p).map_err(|e| Error::InvalidGlob(format!("{}: {}", p, e))))
        .collect::<Result<Vec<_>>>()?;

    let matches =
        glob(&source.path).map_err(|e| Error::InvalidGlob(format!("{}: {}", source.path, e)))?;

    let mut found = BTreeMap::new();
    for entry in matches {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                debug!(pattern = %source.path, error = %e, "Skipping unreadable glob entry");
                continue;
            }
        };

        if exclude.iter().any(|p| p.matches_path(&path)) {
            continue;
        }

        if found.contains_key(&path) {
            continue;
        }

        match FileCandidate::stat(path.clone()) {
            Ok(Some(candidate)) => {
                found.insert(path, candidate);
            }
            Ok(None) => {}
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Unable to stat file, skipping");
            }
        }
    }

    Ok(found.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup_test_files(dir: &TempDir) {
        for name in ["b.log", "a.log", "other.txt", "ignored.log"] {
            fs::write(dir.path().join(name), format!("content of {}\n", name)).unwrap();
        }
        fs::create_dir(dir.path().join("subdir.log")).unwrap();
    }

    fn names(candidates: &[FileCandidate]) -> Vec<String> {
        candidates
            .iter()
            .map(|c| c.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_resolve_glob_sorted_and_skips_directories() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);

        let source = LogSource::new("app", format!("{}/*.log", dir.path().display()));
        let files = resolve(&source).unwrap();

        assert_eq!(names(&files), vec!["a.log", "b.log", "ignored.log"]);
        assert_eq!(files[0].size, "content of a.log\n".len() as u64);
    }

    #[test]
    fn test_resolve_with_exclude() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);

        let source = LogSource::new("app", format!("{}/*.log", dir.path().display()))
            .with_exclude(vec![format!("{}/ignored.log", dir.path().display())]);
        let files = resolve(&source).unwrap();

        assert_eq!(names(&files), vec!["a.log", "b.log"]);
    }

    #[test]
    fn test_resolve_literal_path() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);

        let source = LogSource::new("app", dir.path().join("a.log").display().to_string());
        assert_eq!(names(&resolve(&source).unwrap()), vec!["a.log"]);

        let missing = LogSource::new("app", dir.path().join("nope.log").display().to_string());
        assert!(resolve(&missing).unwrap().is_empty());
    }

    #[test]
    fn test_resolve_invalid_pattern() {
        let source = LogSource::new("bad", "/var/log/[.log");
        assert!(matches!(resolve(&source), Err(Error::InvalidGlob(_))));
    }

    #[test]
    fn test_resolve_sees_new_files() {
        let dir = TempDir::new().unwrap();
        let source = LogSource::new("app", format!("{}/*.log", dir.path().display()));
        assert!(resolve(&source).unwrap().is_empty());

        fs::write(dir.path().join("new.log"), "hello\n").unwrap();
        assert_eq!(names(&resolve(&source).unwrap()), vec!["new.log"]);
    }

    #[test]
    fn test_same_identity_ignores_path_and_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "one\n").unwrap();
        let before = FileCandidate::stat(path.clone()).unwrap().unwrap();

        fs::write(&path, "one\ntwo\n").unwrap();
        let rotated = dir.path().join("a.log.1");
        fs::rename(&path, &rotated).unwrap();
        let after = FileCandidate::stat(rotated).unwrap().unwrap();

        assert!(same_identity(&before, &after));
        assert_ne!(before, after);
    }
}
