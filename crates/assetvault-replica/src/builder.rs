//! Assembly of the replicated store
//!
//! Configuration arrives already parsed; the builder validates it, opens
//! the local store and write-intent log, creates the backends and hands
//! one shared set of them to both the reader and the writer.

use std::sync::Arc;

use assetvault_common::{Config, Error, Result};
use assetvault_storage::{DiskStore, WriteIntentLog};
use tracing::{info, warn};

use crate::reader::AssetReader;
use crate::topology::{BackendGroup, BackendTopology};
use crate::writer::{AssetWriter, ReplayReport};

/// Reader and writer over one store, log and topology
pub struct ReplicatedStore {
    reader: AssetReader,
    writer: AssetWriter,
    topology: Arc<BackendTopology>,
}

impl ReplicatedStore {
    pub fn reader(&self) -> &AssetReader {
        &self.reader
    }

    pub fn writer(&self) -> &AssetWriter {
        &self.writer
    }

    pub fn store(&self) -> &Arc<DiskStore> {
        self.writer.store()
    }

    pub fn wal(&self) -> Option<&Arc<WriteIntentLog>> {
        self.writer.wal()
    }

    pub fn topology(&self) -> &Arc<BackendTopology> {
        &self.topology
    }

    pub fn replay_report(&self) -> ReplayReport {
        self.writer.replay_report()
    }
}

/// Builder for [`ReplicatedStore`]
#[derive(Default)]
pub struct StoreBuilder {
    store: Option<Arc<DiskStore>>,
    wal: Option<Arc<WriteIntentLog>>,
    groups: Vec<BackendGroup>,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open everything the configuration names
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(DiskStore::from_config(&config.local_store));
        let wal = config
            .wal
            .as_ref()
            .map(|wal| WriteIntentLog::open_or_create(&wal.path, wal.slot_count).map(Arc::new))
            .transpose()?;
        let topology = BackendTopology::from_config(&config.backends)?;

        info!(
            store = %store.root().display(),
            store_enabled = store.is_enabled(),
            durable = wal.is_some(),
            groups = topology.groups().len(),
            backends = topology.backend_count(),
            "assembled asset store from configuration"
        );
        if wal.is_some() && !config.has_upstream() {
            warn!("write-intent log configured without any backend, writes stay local");
        }

        Ok(Self {
            store: Some(store),
            wal,
            groups: topology.groups().to_vec(),
        })
    }

    pub fn local_store(mut self, store: Arc<DiskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn wal(mut self, wal: Arc<WriteIntentLog>) -> Self {
        self.wal = Some(wal);
        self
    }

    /// Append a backend group; groups are tried in the order added
    pub fn group(mut self, group: BackendGroup) -> Self {
        self.groups.push(group);
        self
    }

    /// Build the reader and writer, replaying pending uploads first
    pub async fn build(self) -> Result<ReplicatedStore> {
        let store = self
            .store
            .ok_or_else(|| Error::configuration("no local store configured"))?;
        let topology = Arc::new(BackendTopology::new(self.groups)?);

        let writer = AssetWriter::open(Arc::clone(&store), self.wal, Arc::clone(&topology)).await?;
        let reader = AssetReader::new(store, Arc::clone(&topology));

        Ok(ReplicatedStore {
            reader,
            writer,
            topology,
        })
    }
}
