// SPDX-License-Identifier: Apache-2.0

//! Physical file identity: device + inode on Unix, volume serial + file index on Windows.
//!
//! The identity survives renames, so a path whose identity changes between two
//! scans has been rotated.

use serde::{Deserialize, Serialize};
use std::fs::{File, Metadata};
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId {
    /// Device ID (Unix) or volume serial number (Windows)
    dev: u64,
    /// Inode number (Unix) or file index (Windows)
    ino: u64,
}

impl FileId {
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    /// Identity of an open file handle.
    #[cfg(unix)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        Ok(Self::from_metadata(&file.metadata()?))
    }

    /// Identity of an open file handle.
    #[cfg(windows)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            BY_HANDLE_FILE_INFORMATION, GetFileInformationByHandle,
        };

        let handle = file.as_raw_handle() as HANDLE;
        let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };

        let result = unsafe { GetFileInformationByHandle(handle, &mut info) };
        if result == 0 {
            return Err(io::Error::last_os_error());
        }

        let file_index = ((info.nFileIndexHigh as u64) << 32) | (info.nFileIndexLow as u64);

        Ok(Self {
            dev: info.dwVolumeSerialNumber as u64,
            ino: file_index,
        })
    }

    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    /// Stat a path, returning its identity together with its metadata.
    ///
    /// Follows symlinks: the identity is the one of the target file.
    #[cfg(unix)]
    pub fn stat(path: impl AsRef<Path>) -> io::Result<(Self, Metadata)> {
        let metadata = std::fs::metadata(path)?;
        Ok((Self::from_metadata(&metadata), metadata))
    }

    /// Stat a path, returning its identity together with its metadata.
    #[cfg(windows)]
    pub fn stat(path: impl AsRef<Path>) -> io::Result<(Self, Metadata)> {
        let file = File::open(path)?;
        let id = Self::from_file(&file)?;
        Ok((id, file.metadata()?))
    }

    pub fn dev(&self) -> u64 {
        self.dev
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_stat_matches_open_handle() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello\n").unwrap();
        file.flush().unwrap();

        let (id, metadata) = FileId::stat(file.path()).unwrap();
        let from_handle = FileId::from_file(&file.reopen().unwrap()).unwrap();

        assert_eq!(id, from_handle);
        assert_eq!(metadata.len(), 6);
    }

    #[test]
    fn test_identity_survives_rename() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let rotated = dir.path().join("app.log.1");
        std::fs::write(&path, "line\n").unwrap();

        let (before, _) = FileId::stat(&path).unwrap();
        std::fs::rename(&path, &rotated).unwrap();
        let (after, _) = FileId::stat(&rotated).unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn test_recreated_path_has_new_identity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let rotated = dir.path().join("app.log.1");
        std::fs::write(&path, "old\n").unwrap();
        let (old, _) = FileId::stat(&path).unwrap();

        // Keep the old file alive so its inode cannot be reused
        std::fs::rename(&path, &rotated).unwrap();
        std::fs::write(&path, "new\n").unwrap();
        let (new, _) = FileId::stat(&path).unwrap();

        assert_ne!(old, new);
    }

    #[test]
    fn test_stat_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = FileId::stat(dir.path().join("missing.log")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_file_id_display_and_serde() {
        let id = FileId::new(123, 456);
        assert_eq!(id.to_string(), "123:456");

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#"{"dev":123,"ino":456}"#);
        assert_eq!(serde_json::from_str::<FileId>(&json).unwrap(), id);
    }
}
