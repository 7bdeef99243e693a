// SPDX-License-Identifier: Apache-2.0

//! JSON file-backed registry with atomic writes.
//!
//! Checkpoints live in memory and are written on `flush` using a
//! write-to-temp-then-rename strategy. A file that cannot be parsed is an
//! error on open rather than a silent reset to empty state.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::registry::{Checkpoint, MemoryRegistry, Registry, RegistryState};
use super::schema::{
    PERSISTED_STATE_VERSION, PersistedCheckpointV1, PersistedStateV1, PersistedVersion,
};
use crate::receivers::file::error::{Error, Result};
use crate::receivers::file::input::{FileId, ScanKey};

#[derive(Debug)]
pub struct JsonFileRegistry {
    path: PathBuf,
    inner: MemoryRegistry,
}

impl JsonFileRegistry {
    /// Open the registry at the given path, creating parent directories when
    /// the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let state = if path.exists() {
            let contents = fs::read(&path)
                .map_err(|e| Error::Persistence(format!("failed to open registry: {}", e)))?;
            load_state(&contents)?
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent).map_err(|e| {
                        Error::Persistence(format!("failed to create registry directory: {}", e))
                    })?;
                }
            }
            RegistryState::default()
        };

        debug!(
            path = %path.display(),
            checkpoints = state.checkpoints.len(),
            "Opened offset registry"
        );

        Ok(Self {
            path,
            inner: MemoryRegistry::with_state(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Registry for JsonFileRegistry {
    fn get_offset(&self, key: &ScanKey) -> Option<Checkpoint> {
        self.inner.get_offset(key)
    }

    fn set_offset(&self, key: &ScanKey, checkpoint: Checkpoint) {
        self.inner.set_offset(key, checkpoint)
    }

    fn config_id(&self) -> String {
        self.inner.config_id()
    }

    fn identifier(&self) -> String {
        self.inner.identifier()
    }

    fn flush(&self) -> Result<()> {
        let Some(persisted) = self.inner.take_dirty(to_persisted)? else {
            return Ok(());
        };

        if let Err(e) = atomic_write(&self.path, &persisted) {
            self.inner.mark_dirty();
            return Err(e);
        }
        Ok(())
    }
}

fn load_state(contents: &[u8]) -> Result<RegistryState> {
    let version: PersistedVersion = serde_json::from_slice(contents)
        .map_err(|e| Error::Persistence(format!("failed to parse registry: {}", e)))?;

    if version.version != PERSISTED_STATE_VERSION {
        return Err(Error::Persistence(format!(
            "unsupported registry version {}",
            version.version
        )));
    }

    let persisted: PersistedStateV1 = serde_json::from_slice(contents)
        .map_err(|e| Error::Persistence(format!("failed to parse registry: {}", e)))?;

    let checkpoints = persisted
        .checkpoints
        .into_values()
        .map(|entry| {
            let key = ScanKey::from_parts(Path::new(&entry.path), &entry.identifier);
            let checkpoint = Checkpoint {
                offset: entry.offset,
                file_id: FileId::new(entry.dev, entry.ino),
            };
            (key, checkpoint)
        })
        .collect();

    Ok(RegistryState {
        checkpoints,
        ..Default::default()
    })
}

fn to_persisted(state: &RegistryState) -> PersistedStateV1 {
    let checkpoints = state
        .checkpoints
        .iter()
        .map(|(key, checkpoint)| {
            let entry = PersistedCheckpointV1 {
                path: key.path().to_string_lossy().into_owned(),
                identifier: key.identifier().to_string(),
                dev: checkpoint.file_id.dev(),
                ino: checkpoint.file_id.ino(),
                offset: checkpoint.offset,
            };
            (key.as_str().to_string(), entry)
        })
        .collect();

    PersistedStateV1 {
        version: PERSISTED_STATE_VERSION,
        checkpoints,
    }
}

/// Write state to file atomically (write to temp, then rename)
fn atomic_write(path: &Path, state: &PersistedStateV1) -> Result<()> {
    use portable_atomic::{AtomicU64, Ordering};
    use std::io::Write;

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    // Process ID plus counter keeps concurrent flushes off each other's temp file
    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let file = File::create(&temp_path)
        .map_err(|e| Error::Persistence(format!("failed to create temp file: {}", e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, state)
        .map_err(|e| Error::Persistence(format!("failed to write registry: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Persistence(format!("failed to flush registry: {}", e)))?;
    drop(writer);

    fs::rename(&temp_path, path)
        .map_err(|e| Error::Persistence(format!("failed to rename registry file: {}", e)))?;

    Ok(())
}
