//! Write-intent log
//!
//! A fixed set of slots recording which asset ids were written locally but
//! are not yet confirmed upstream. A slot is marked pending, and that fact
//! reaches the disk, before the upload starts; it is cleared only once the
//! upload is confirmed. Slots still pending at open time are handed back to
//! the caller for replay.
//!
//! File format:
//! ```text
//! +----------+--------+--------+-----+--------+
//! | Magic    | Slot 0 | Slot 1 | ... | Slot N |
//! | 8B ASCII | 17B    | 17B    |     | 17B    |
//! +----------+--------+--------+-----+--------+
//!
//! Slot: | Flag (0 = free) 1B | Asset ID 16B |
//! ```
//!
//! The slot count is grow-only. Asking for fewer slots than the file
//! already has keeps the larger existing count.

use crate::raw_io::RawFile;
use crate::state::Availability;
use assetvault_common::config::MIN_WAL_SLOTS;
use assetvault_common::{AssetId, Error, Result};
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info, warn};

/// File header magic
pub const WAL_MAGIC: [u8; 8] = *b"ASSETWAL";

/// Header size in bytes
const HEADER_SIZE: u64 = WAL_MAGIC.len() as u64;

/// Size of one slot record (flag + id)
pub const SLOT_SIZE: usize = 17;

/// Flag values
const SLOT_FREE: u8 = 0;
const SLOT_PENDING: u8 = 1;

const SUBSYSTEM: &str = "write-intent log";

/// Handle to one claimed slot
///
/// Not `Clone`: clearing consumes the handle, so a slot is released at most
/// once per claim.
#[derive(Debug, PartialEq, Eq)]
pub struct Slot {
    index: usize,
    asset_id: AssetId,
}

impl Slot {
    /// Position of the slot in the file
    pub fn index(&self) -> usize {
        self.index
    }

    /// Byte offset of the slot record
    pub fn offset(&self) -> u64 {
        slot_offset(self.index)
    }

    /// The asset this slot is holding for
    pub fn asset_id(&self) -> AssetId {
        self.asset_id
    }
}

/// A slot found pending when the log was opened
#[derive(Debug)]
pub struct PendingUpload {
    pub slot: Slot,
}

impl PendingUpload {
    pub fn asset_id(&self) -> AssetId {
        self.slot.asset_id
    }
}

/// In-memory mirror of the slot flags
struct SlotTable {
    slots: Vec<Option<AssetId>>,
    /// Next index to probe
    cursor: usize,
    in_use: usize,
}

/// Durable set of "pending upload" slots
pub struct WriteIntentLog {
    file: RawFile,
    table: Mutex<SlotTable>,
    /// Slots that were pending at open, until the caller takes them
    recovered: Mutex<Vec<PendingUpload>>,
    availability: Availability,
}

fn slot_offset(index: usize) -> u64 {
    HEADER_SIZE + (index * SLOT_SIZE) as u64
}

fn file_size(slot_count: usize) -> u64 {
    slot_offset(slot_count)
}

impl WriteIntentLog {
    /// Open the log at `path`, creating it if missing
    ///
    /// An existing file with fewer than `slot_count` slots is grown with
    /// free slots; one with more keeps its size.
    pub fn open_or_create(path: impl AsRef<Path>, slot_count: usize) -> Result<Self> {
        let path = path.as_ref();

        if slot_count < MIN_WAL_SLOTS {
            return Err(Error::configuration(format!(
                "write-intent log needs at least {MIN_WAL_SLOTS} slots, got {slot_count}"
            )));
        }

        let exists = path.try_exists().map_err(|e| {
            Error::Environment(format!("failed to probe {}: {e}", path.display()))
        })?;

        let (file, count) = if exists {
            Self::open_existing(path, slot_count)?
        } else {
            Self::create_new(path, slot_count)?
        };

        let mut region = vec![0u8; count * SLOT_SIZE];
        file.read_at(HEADER_SIZE, &mut region)?;

        let mut slots = Vec::with_capacity(count);
        let mut recovered = Vec::new();
        for (index, record) in region.chunks_exact(SLOT_SIZE).enumerate() {
            if record[0] == SLOT_FREE {
                slots.push(None);
                continue;
            }
            let mut id = [0u8; 16];
            id.copy_from_slice(&record[1..]);
            let asset_id = AssetId::from_bytes(id);
            slots.push(Some(asset_id));
            recovered.push(PendingUpload {
                slot: Slot { index, asset_id },
            });
        }

        let in_use = recovered.len();
        if in_use > 0 {
            warn!(
                path = %path.display(),
                pending = in_use,
                "write-intent log has uploads pending from a previous run"
            );
        }
        info!(
            path = %path.display(),
            slots = count,
            pending = in_use,
            "opened write-intent log"
        );

        Ok(Self {
            file,
            table: Mutex::new(SlotTable {
                slots,
                cursor: 0,
                in_use,
            }),
            recovered: Mutex::new(recovered),
            availability: Availability::enabled(SUBSYSTEM),
        })
    }

    fn create_new(path: &Path, slot_count: usize) -> Result<(RawFile, usize)> {
        let file = RawFile::create(path, file_size(slot_count))?;
        file.write_at(0, &WAL_MAGIC)?;
        file.sync()?;
        debug!(path = %path.display(), slots = slot_count, "created write-intent log");
        Ok((file, slot_count))
    }

    fn open_existing(path: &Path, slot_count: usize) -> Result<(RawFile, usize)> {
        let mut file = RawFile::open(path)?;

        if file.size() < HEADER_SIZE {
            return Err(Error::invalid_format(format!(
                "{} is too short for a write-intent log header",
                path.display()
            )));
        }

        let mut magic = [0u8; 8];
        file.read_at(0, &mut magic)?;
        if magic != WAL_MAGIC {
            return Err(Error::invalid_format(format!(
                "{} has an invalid write-intent log magic",
                path.display()
            )));
        }

        let existing = ((file.size() - HEADER_SIZE) as usize) / SLOT_SIZE;
        if existing >= slot_count {
            if existing > slot_count {
                debug!(
                    existing,
                    requested = slot_count,
                    "write-intent log cannot shrink, keeping existing slot count"
                );
            }
            return Ok((file, existing));
        }

        // Zero from the end of the last whole slot so a torn trailing record
        // cannot surface as a pending slot.
        let start = slot_offset(existing);
        let end = file_size(slot_count);
        file.grow(end)?;
        let zeros = vec![0u8; (end - start) as usize];
        file.write_at(start, &zeros)?;
        file.sync()?;

        info!(
            path = %path.display(),
            from = existing,
            to = slot_count,
            "grew write-intent log"
        );
        Ok((file, slot_count))
    }

    /// Claim a free slot for `asset_id`
    ///
    /// The pending mark is on disk before this returns. Fails with
    /// [`Error::WriteCacheFull`] when every slot is pending; that is never
    /// retried here.
    pub fn allocate(&self, asset_id: AssetId) -> Result<Slot> {
        self.check_enabled()?;

        let mut table = self.table.lock();
        let count = table.slots.len();

        let index = (0..count)
            .map(|step| (table.cursor + step) % count)
            .find(|&index| table.slots[index].is_none())
            .ok_or(Error::WriteCacheFull { slots: count })?;

        let mut record = [0u8; SLOT_SIZE];
        record[0] = SLOT_PENDING;
        record[1..].copy_from_slice(asset_id.as_bytes());

        // Pending must be durable before anyone can observe it.
        if let Err(e) = self.persist(index, &record) {
            self.note_failure(&e);
            return Err(e);
        }

        table.slots[index] = Some(asset_id);
        table.cursor = (index + 1) % count;
        table.in_use += 1;

        debug!(%asset_id, slot = index, "allocated write-intent slot");
        Ok(Slot { index, asset_id })
    }

    /// Release a slot after its asset is confirmed upstream
    pub fn clear(&self, slot: Slot) -> Result<()> {
        let result = self
            .check_enabled()
            .and_then(|()| self.persist(slot.index, &[SLOT_FREE; SLOT_SIZE]));

        if let Err(e) = &result {
            self.note_failure(e);
        }

        // The slot is still marked in memory, so no allocator can race the
        // write above.
        let mut table = self.table.lock();
        if table.slots[slot.index].take().is_some() {
            table.in_use -= 1;
        }
        drop(table);

        debug!(asset_id = %slot.asset_id, slot = slot.index, "cleared write-intent slot");
        result
    }

    fn persist(&self, index: usize, record: &[u8; SLOT_SIZE]) -> Result<()> {
        self.file.write_at(slot_offset(index), record)?;
        self.file.sync_data()
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

    fn note_failure(&self, e: &Error) {
        if let Error::Environment(reason) = e {
            self.availability.disable(reason.clone());
        }
    }

    /// Take the slots that were pending when the log was opened
    ///
    /// Returns an empty list on every call after the first.
    pub fn take_pending(&self) -> Vec<PendingUpload> {
        std::mem::take(&mut *self.recovered.lock())
    }

    /// Number of slots recovered at open and not yet taken
    pub fn pending_count(&self) -> usize {
        self.recovered.lock().len()
    }

    /// Total number of slots
    pub fn slot_count(&self) -> usize {
        self.table.lock().slots.len()
    }

    /// Number of slots currently pending
    pub fn in_use(&self) -> usize {
        self.table.lock().in_use
    }

    pub fn is_enabled(&self) -> bool {
        self.availability.is_enabled()
    }

    pub fn path(&self) -> &str {
        self.file.path()
    }
}
