use crate::StorageError;
use fs2::FileExt;
use kgx_core::history::{HistorySink, MIN_RESTORE_BYTES};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Append-only history log, held under an exclusive advisory lock for the
/// lifetime of the handle. Readers outside the process open it read-only.
#[derive(Debug)]
pub struct HistoryLogFile {
    path: PathBuf,
    file: File,
}

impl HistoryLogFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked { path });
        }
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.file.metadata().map(|meta| meta.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistorySink for HistoryLogFile {
    fn append(&mut self, text: &str) -> io::Result<()> {
        self.file.write_all(text.as_bytes())?;
        self.file.flush()
    }

    fn has_entries(&self) -> bool {
        self.len() >= MIN_RESTORE_BYTES as u64
    }

    fn read_all(&self) -> io::Result<String> {
        let mut handle = &self.file;
        handle.seek(SeekFrom::Start(0))?;
        let mut contents = String::new();
        handle.read_to_string(&mut contents)?;
        Ok(contents)
    }
}

impl Drop for HistoryLogFile {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
