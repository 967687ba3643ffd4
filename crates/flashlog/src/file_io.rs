use crate::error::StorageError;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Standard file I/O helpers shared by the ingest and store segment files.
pub struct FileIo;

impl FileIo {
    pub fn ensure_directory_exists(dir: &Path) -> Result<(), StorageError> {
        fs::create_dir_all(dir).map_err(|e| {
            StorageError::from_io_error(e, &format!("Failed to create directory {dir:?}"))
        })
    }

    #[tracing::instrument(level = "debug", skip(path), fields(path = %path.display()))]
    pub fn create_new_for_append(path: &Path) -> Result<File, StorageError> {
        OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                StorageError::from_io_error(e, &format!("Failed to create segment file {path:?}"))
            })
    }

    #[tracing::instrument(level = "debug", skip(path), fields(path = %path.display()))]
    pub fn open_for_append(path: &Path) -> Result<File, StorageError> {
        OpenOptions::new()
            .append(true)
            .read(true)
            .open(path)
            .map_err(|e| StorageError::from_io_error(e, &format!("Failed to open {path:?}")))
    }

    #[tracing::instrument(level = "debug", skip(handle, data), fields(len = data.len()))]
    pub fn append(handle: &mut File, data: &[u8]) -> Result<(), StorageError> {
        handle
            .write_all(data)
            .map_err(|e| StorageError::from_io_error(e, "Failed to append data to file"))
    }

    #[tracing::instrument(level = "debug", skip(handle))]
    pub fn synchronize_to_disk(handle: &File) -> Result<(), StorageError> {
        handle
            .sync_all()
            .map_err(|e| StorageError::from_io_error(e, "Failed to sync file to disk"))
    }

    /// Write `data` to a fresh file at `path` and fsync it before returning.
    #[tracing::instrument(level = "debug", skip(path, data), fields(path = %path.display(), len = data.len()))]
    pub fn write_durably(path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| StorageError::from_io_error(e, &format!("Failed to create {path:?}")))?;
        Self::append(&mut file, data)?;
        Self::synchronize_to_disk(&file)
    }

    #[tracing::instrument(level = "debug", skip(path), fields(path = %path.display()))]
    pub fn read_all(path: &Path) -> Result<Vec<u8>, StorageError> {
        let mut file = File::open(path)
            .map_err(|e| StorageError::from_read_error(e, &format!("Failed to open {path:?}")))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|e| StorageError::from_read_error(e, &format!("Failed to read {path:?}")))?;
        Ok(buf)
    }

    /// Atomically rename `from` to `to`, then fsync the parent directory so the
    /// new name survives a crash.
    #[tracing::instrument(level = "debug", fields(from = %from.display(), to = %to.display()))]
    pub fn rename_durably(from: &Path, to: &Path) -> Result<(), StorageError> {
        fs::rename(from, to).map_err(|e| {
            StorageError::from_io_error(e, &format!("Failed to rename {from:?} to {to:?}"))
        })?;
        if let Some(parent) = to.parent() {
            Self::sync_directory(parent)?;
        }
        Ok(())
    }

    pub fn sync_directory(dir: &Path) -> Result<(), StorageError> {
        let handle = File::open(dir).map_err(|e| {
            StorageError::from_io_error(e, &format!("Failed to open directory {dir:?}"))
        })?;
        // Some platforms refuse fsync on directories; the rename itself already happened.
        let _ = handle.sync_all();
        Ok(())
    }

    pub fn truncate(path: &Path, len: u64) -> Result<(), StorageError> {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| StorageError::from_io_error(e, &format!("Failed to open {path:?}")))?;
        file.set_len(len)
            .map_err(|e| StorageError::from_io_error(e, &format!("Failed to truncate {path:?}")))?;
        Self::synchronize_to_disk(&file)
    }

    pub fn remove(path: &Path) -> Result<(), StorageError> {
        fs::remove_file(path)
            .map_err(|e| StorageError::from_io_error(e, &format!("Failed to remove {path:?}")))
    }

    pub fn file_size(path: &Path) -> Result<u64, StorageError> {
        fs::metadata(path)
            .map(|m| m.len())
            .map_err(|e| StorageError::from_read_error(e, &format!("Failed to stat {path:?}")))
    }

    /// List regular files in `dir` whose extension is `extension`, returning
    /// `(file stem, path)` pairs sorted by stem.
    pub fn list_with_extension(
        dir: &Path,
        extension: &str,
    ) -> Result<Vec<(String, PathBuf)>, StorageError> {
        let entries = fs::read_dir(dir)
            .map_err(|e| StorageError::from_read_error(e, &format!("Failed to list {dir:?}")))?;
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                StorageError::from_read_error(e, &format!("Failed to read entry in {dir:?}"))
            })?;
            let path = entry.path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != extension) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                found.push((stem.to_string(), path.clone()));
            }
        }
        found.sort();
        Ok(found)
    }
}
