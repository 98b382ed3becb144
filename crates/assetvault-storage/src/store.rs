//! Local content store
//!
//! One serialized asset per file in a directory tree sharded by id. The
//! 32-character hex id is cut into two-character directory names for the
//! first [`SHARD_DEPTH`] octets (at most 256 entries per level); the file
//! name carries the remaining octets:
//!
//! ```text
//! d5c70f1f606340c58b9382c5c5a31d6e
//!   -> <root>/d5/c7/0f/1f/606340c58b9382c5c5a31d6e.asset
//! ```
//!
//! Record format:
//! ```text
//! +--------+--------+------------------+
//! | Length | CRC32C | bincode(Asset)   |
//! | 4B LE  | 4B LE  | Length bytes     |
//! +--------+--------+------------------+
//! ```
//!
//! Concurrent writers of the same id collapse onto the first one; readers
//! see the in-flight copy until its file is complete. Emptied directories
//! are left in place after deletes.

use crate::filter::AssetFilter;
use crate::raw_io::is_environment_error;
use crate::state::Availability;
use assetvault_common::{Asset, AssetId, Error, LocalStoreConfig, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Number of directory levels above each asset file
pub const SHARD_DEPTH: usize = 4;

/// Extension of stored asset files
pub const ASSET_FILE_EXTENSION: &str = "asset";

/// Length + checksum prefix
const RECORD_HEADER_SIZE: usize = 8;

const SUBSYSTEM: &str = "local store";

/// Outcome of reading one stored file
enum ReadOutcome {
    Found(Asset),
    Missing,
    Corrupt(String),
}

/// UUID-sharded on-disk asset store
pub struct DiskStore {
    root: PathBuf,
    /// Assets currently being written, keyed by their target path
    in_flight: Mutex<HashMap<PathBuf, Arc<Asset>>>,
    availability: Availability,
}

impl DiskStore {
    /// Open (or create) a store rooted at `root`
    ///
    /// A root that cannot be created leaves the store disabled rather than
    /// failing: the process can still serve from upstream.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let availability = match fs::create_dir_all(&root) {
            Ok(()) => {
                info!(root = %root.display(), "opened local store");
                Availability::enabled(SUBSYSTEM)
            }
            Err(e) => {
                error!(root = %root.display(), error = %e, "cannot create local store root");
                Availability::disabled(SUBSYSTEM, format!("cannot create {}: {e}", root.display()))
            }
        };

        Self {
            root,
            in_flight: Mutex::new(HashMap::new()),
            availability,
        }
    }

    /// A store that never holds anything
    pub fn disabled(root: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            in_flight: Mutex::new(HashMap::new()),
            availability: Availability::disabled(SUBSYSTEM, reason),
        }
    }

    /// Build from configuration
    pub fn from_config(config: &LocalStoreConfig) -> Self {
        if config.enabled {
            Self::open(&config.path)
        } else {
            Self::disabled(&config.path, "disabled in configuration")
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_enabled(&self) -> bool {
        self.availability.is_enabled()
    }

    pub fn availability(&self) -> &Availability {
        &self.availability
    }

    /// Path of the file holding `id`; deterministic for a given root
    pub fn path_for(&self, id: AssetId) -> PathBuf {
        let hex = id.to_simple_hex();
        let mut path = self.root.clone();
        for level in 0..SHARD_DEPTH {
            path.push(&hex[level * 2..level * 2 + 2]);
        }
        path.push(format!("{}.{ASSET_FILE_EXTENSION}", &hex[SHARD_DEPTH * 2..]));
        path
    }

    /// Fetch an asset
    ///
    /// Absence, corruption and environment failures all come back as `None`;
    /// a corrupt file is deleted so the caller can fetch it again.
    pub fn get(&self, id: AssetId) -> Option<Arc<Asset>> {
        if !self.is_enabled() {
            return None;
        }

        let path = self.path_for(id);
        if let Some(asset) = self.in_flight.lock().get(&path) {
            debug!(%id, "local store hit on in-flight write");
            return Some(Arc::clone(asset));
        }

        match self.read_file(&path, id) {
            Ok(ReadOutcome::Found(asset)) => Some(Arc::new(asset)),
            Ok(ReadOutcome::Missing) => None,
            Ok(ReadOutcome::Corrupt(reason)) => {
                warn!(%id, path = %path.display(), %reason, "deleting corrupt asset record");
                if let Err(e) = fs::remove_file(&path)
                    && e.kind() != ErrorKind::NotFound
                {
                    self.handle_io_error(&path, "delete corrupt", e);
                }
                None
            }
            Err(e) => {
                self.handle_io_error(&path, "read", e);
                None
            }
        }
    }

    /// True when the asset is stored or being stored
    pub fn contains(&self, id: AssetId) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let path = self.path_for(id);
        self.in_flight.lock().contains_key(&path) || path.is_file()
    }

    /// Store an asset
    ///
    /// Returns `Ok(true)` when this call wrote the file and `Ok(false)` when
    /// it did nothing: the store is disabled, another writer already holds
    /// the same id, or the id is already on disk. Ids are immutable, so the
    /// first content stored for an id is kept.
    pub fn put(&self, asset: Arc<Asset>) -> Result<bool> {
        if !self.is_enabled() {
            return Ok(false);
        }

        let path = self.path_for(asset.id);
        {
            let mut in_flight = self.in_flight.lock();
            if in_flight.contains_key(&path) {
                debug!(id = %asset.id, "collapsing concurrent write of the same asset");
                return Ok(false);
            }
            in_flight.insert(path.clone(), Arc::clone(&asset));
        }
        let _guard = InFlightGuard {
            in_flight: &self.in_flight,
            path: &path,
        };

        match self.write_file(&path, &asset) {
            Ok(written) => Ok(written),
            Err(e) => Err(self.handle_io_error(&path, "write", e)),
        }
    }

    /// Delete one asset
    pub fn purge(&self, id: AssetId) -> Result<()> {
        self.check_enabled()?;
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(%id, "purged asset");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::NotFound(id)),
            Err(e) => Err(self.handle_io_error(&path, "purge", e)),
        }
    }

    /// Delete every asset matching any of `filters`; an empty list deletes
    /// everything. Returns the number of assets removed.
    pub fn purge_all(&self, filters: &[AssetFilter]) -> Result<usize> {
        self.check_enabled()?;

        let mut files = Vec::new();
        collect_asset_files(&self.root, &mut files)
            .map_err(|e| self.handle_io_error(&self.root, "scan", e))?;

        let mut purged = 0;
        for path in files {
            if !filters.is_empty() {
                match read_record(&path) {
                    Ok(ReadOutcome::Found(asset)) if AssetFilter::matches_any(filters, &asset) => {}
                    Ok(ReadOutcome::Found(_)) | Ok(ReadOutcome::Missing) => continue,
                    Ok(ReadOutcome::Corrupt(reason)) => {
                        warn!(path = %path.display(), %reason, "skipping corrupt record during purge");
                        continue;
                    }
                    Err(e) => return Err(self.handle_io_error(&path, "read", e)),
                }
            }

            match fs::remove_file(&path) {
                Ok(()) => purged += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(self.handle_io_error(&path, "purge", e)),
            }
        }

        info!(purged, filters = filters.len(), "purged assets from local store");
        Ok(purged)
    }

    fn read_file(&self, path: &Path, id: AssetId) -> std::io::Result<ReadOutcome> {
        Ok(match read_record(path)? {
            ReadOutcome::Found(asset) if asset.id != id => {
                ReadOutcome::Corrupt(format!("record holds asset {}", asset.id))
            }
            outcome => outcome,
        })
    }

    fn write_file(&self, path: &Path, asset: &Asset) -> std::io::Result<bool> {
        if path.is_file() {
            return Ok(false);
        }

        let record = encode_record(asset)?;
        let parent = path
            .parent()
            .ok_or_else(|| std::io::Error::other("asset path has no parent"))?;
        fs::create_dir_all(parent)?;

        // Write beside the target and rename so readers never see a
        // partial record.
        let tmp = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        let result = (|| {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&record)?;
            file.sync_data()?;
            fs::rename(&tmp, path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        debug!(id = %asset.id, bytes = record.len(), "stored asset");
        Ok(true)
    }

    fn check_enabled(&self) -> Result<()> {
        match self.availability.reason() {
            None => Ok(()),
            Some(reason) => Err(Error::Disabled {
                subsystem: SUBSYSTEM,
                reason,
            }),
        }
    }

    /// Map an I/O failure to an error, disabling the store for environment
    /// failures
    fn handle_io_error(&self, path: &Path, op: &str, e: std::io::Error) -> Error {
        if is_environment_error(e.kind()) {
            let reason = format!("failed to {op} {}: {e}", path.display());
            self.availability.disable(reason.clone());
            Error::Environment(reason)
        } else {
            warn!(path = %path.display(), error = %e, "local store {op} failed");
            Error::DiskIo(e)
        }
    }
}

/// Removes the in-flight entry when the write finishes, fails, or unwinds
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<PathBuf, Arc<Asset>>>,
    path: &'a Path,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(self.path);
    }
}

fn encode_record(asset: &Asset) -> std::io::Result<Vec<u8>> {
    let payload = bincode::serialize(asset).map_err(std::io::Error::other)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| std::io::Error::other("asset record exceeds 4 GiB"))?;

    let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&crc32c::crc32c(&payload).to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

fn decode_record(data: &[u8]) -> std::result::Result<Asset, String> {
    if data.len() < RECORD_HEADER_SIZE {
        return Err(format!("record too small: {} bytes", data.len()));
    }

    let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let stored_crc = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    let payload = &data[RECORD_HEADER_SIZE..];
    if payload.len() != len {
        return Err(format!("record length {} does not match header {len}", payload.len()));
    }

    let computed = crc32c::crc32c(payload);
    if computed != stored_crc {
        return Err(format!(
            "checksum mismatch: expected {stored_crc:08x}, got {computed:08x}"
        ));
    }

    bincode::deserialize(payload).map_err(|e| format!("bincode: {e}"))
}

fn read_record(path: &Path) -> std::io::Result<ReadOutcome> {
    match fs::read(path) {
        Ok(bytes) => Ok(match decode_record(&bytes) {
            Ok(asset) => ReadOutcome::Found(asset),
            Err(reason) => ReadOutcome::Corrupt(reason),
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(ReadOutcome::Missing),
        Err(e) => Err(e),
    }
}

fn collect_asset_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_asset_files(&path, out)?;
        } else if file_type.is_file()
            && path.extension().is_some_and(|ext| ext == ASSET_FILE_EXTENSION)
        {
            out.push(path);
        }
    }
    Ok(())
}
