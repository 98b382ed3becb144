//! Positional file I/O
//!
//! Fixed-layout files (the write-intent log) are mutated in place with
//! positioned reads and writes instead of a shared memory mapping. Records
//! are a few bytes wide, so the page cache is used and durability comes
//! from an explicit `sync_data` after each mutation.

use assetvault_common::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// File handle with read/write-at-offset access
pub struct RawFile {
    file: File,
    path: String,
    size: u64,
}

impl RawFile {
    /// Open an existing file for positional I/O
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| classify(&path_str, "open", e))?;

        let size = file
            .metadata()
            .map_err(|e| classify(&path_str, "stat", e))?
            .len();

        Ok(Self {
            file,
            path: path_str,
            size,
        })
    }

    /// Create a new zero-filled file of the given size
    ///
    /// Fails if the file already exists.
    pub fn create(path: impl AsRef<Path>, size: u64) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| classify(&path_str, "create parent of", e))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| classify(&path_str, "create", e))?;

        file.set_len(size)
            .map_err(|e| classify(&path_str, "set size for", e))?;

        Ok(Self {
            file,
            path: path_str,
            size,
        })
    }

    /// Get the file size
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Get the file path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Grow the file to `size` bytes; new bytes read as zero
    ///
    /// Never shrinks: a smaller `size` is a no-op.
    pub fn grow(&mut self, size: u64) -> Result<()> {
        if size <= self.size {
            return Ok(());
        }
        self.file
            .set_len(size)
            .map_err(|e| classify(&self.path, "grow", e))?;
        self.size = size;
        Ok(())
    }

    /// Read exactly `buf.len()` bytes at the given offset
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file
            .read_exact_at(buf, offset)
            .map_err(|e| classify(&self.path, "read", e))
    }

    /// Write all of `buf` at the given offset
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file
            .write_all_at(buf, offset)
            .map_err(|e| classify(&self.path, "write", e))
    }

    /// Sync data only (not metadata) to disk
    pub fn sync_data(&self) -> Result<()> {
        self.file
            .sync_data()
            .map_err(|e| classify(&self.path, "sync_data", e))
    }

    /// Sync data and metadata to disk
    pub fn sync(&self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| classify(&self.path, "sync", e))
    }
}

/// True for I/O failures caused by the environment (paths, permissions)
/// rather than by a single call
pub fn is_environment_error(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::PermissionDenied
            | ErrorKind::InvalidFilename
            | ErrorKind::NotADirectory
            | ErrorKind::ReadOnlyFilesystem
    )
}

fn classify(path: &str, op: &str, e: std::io::Error) -> Error {
    if is_environment_error(e.kind()) {
        Error::Environment(format!("failed to {op} {path}: {e}"))
    } else {
        Error::DiskIo(e)
    }
}
