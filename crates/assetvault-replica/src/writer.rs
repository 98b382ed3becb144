//! Asset writer
//!
//! A write goes to the local store, takes a write-intent slot, then walks
//! the backend groups in order until one group accepts it. A group with one
//! backend is called directly; a larger group is fanned out and every
//! backend in it must succeed. The slot is released before `put` returns,
//! whatever the outcome.
//!
//! Slots still pending when the process died are replayed when the writer
//! is opened: the asset is read back from the local store and resent.

use std::collections::HashMap;
use std::sync::Arc;

use assetvault_client::{AssetServer, BackendError};
use assetvault_common::{Asset, AssetId, BackendFailure, Error, Result};
use assetvault_storage::{DiskStore, Slot, WriteIntentLog};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::topology::BackendTopology;

/// What startup replay did with the slots left pending by a previous run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Resent and accepted upstream
    pub resent: usize,
    /// Upstream answered that it already holds the asset
    pub already_upstream: usize,
    /// No local copy to resend; the slot was dropped
    pub missing_locally: usize,
    /// Every group failed; the slot stays pending for the next start
    pub still_pending: usize,
}

impl ReplayReport {
    pub fn total(&self) -> usize {
        self.resent + self.already_upstream + self.missing_locally + self.still_pending
    }
}

/// How a backend's "already exists" answer is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Existing {
    /// A failure like any other
    Reject,
    /// Proof the asset is upstream
    Accept,
}

/// Outcome of a group that took the asset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Stored,
    AlreadyPresent,
}

/// Durable replicated asset writer
pub struct AssetWriter {
    inner: Arc<WriterInner>,
    replay: ReplayReport,
}

struct WriterInner {
    store: Arc<DiskStore>,
    wal: Option<Arc<WriteIntentLog>>,
    topology: Arc<BackendTopology>,
    /// One entry per id being written; losers wait for the flag to flip
    writes: Mutex<HashMap<AssetId, watch::Receiver<bool>>>,
}

impl AssetWriter {
    /// Create a writer, replaying any slots a previous run left pending
    ///
    /// Fails if pending slots exist but the local store or the upstream
    /// needed to resend them is missing.
    pub async fn open(
        store: Arc<DiskStore>,
        wal: Option<Arc<WriteIntentLog>>,
        topology: Arc<BackendTopology>,
    ) -> Result<Self> {
        let inner = Arc::new(WriterInner {
            store,
            wal,
            topology,
            writes: Mutex::new(HashMap::new()),
        });
        let replay = inner.replay_pending().await?;
        Ok(Self { inner, replay })
    }

    /// Store an asset locally and upstream
    ///
    /// Concurrent calls for the same id wait for the first one and return
    /// `Ok(())` without repeating its work or learning its outcome.
    ///
    /// The write runs as its own task. A caller that stops waiting does not
    /// cancel it, so a claimed slot is always released.
    pub async fn put(&self, asset: Arc<Asset>) -> Result<()> {
        if asset.id.is_nil() {
            return Err(Error::invalid_argument("asset id is nil"));
        }
        let id = asset.id;

        let guard = match WriterInner::claim(&self.inner, id) {
            Claim::Owner(guard) => guard,
            Claim::Waiter(mut done) => {
                debug!(%id, "waiting on concurrent write of the same asset");
                // A dropped sender also means the owner is gone
                let _ = done.wait_for(|finished| *finished).await;
                return Ok(());
            }
        };

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _guard = guard;
            inner.write(asset).await
        });

        task.await.unwrap_or_else(|e| {
            error!(%id, error = %e, "asset write task failed");
            Err(Error::internal(format!("write task for {id} failed: {e}")))
        })
    }

    pub fn replay_report(&self) -> ReplayReport {
        self.replay
    }

    pub fn store(&self) -> &Arc<DiskStore> {
        &self.inner.store
    }

    pub fn wal(&self) -> Option<&Arc<WriteIntentLog>> {
        self.inner.wal.as_ref()
    }
}

impl WriterInner {
    fn claim(this: &Arc<Self>, id: AssetId) -> Claim {
        let mut writes = this.writes.lock();
        if let Some(done) = writes.get(&id) {
            return Claim::Waiter(done.clone());
        }
        let (done, waiters) = watch::channel(false);
        writes.insert(id, waiters);
        Claim::Owner(WriteGuard {
            inner: Arc::clone(this),
            id,
            done,
        })
    }

    async fn write(&self, asset: Arc<Asset>) -> Result<()> {
        let id = asset.id;
        if self.store.contains(id) {
            return Err(Error::AlreadyExists(id));
        }

        self.store.put(Arc::clone(&asset))?;

        if self.topology.is_empty() {
            debug!(%id, "stored asset locally, no upstream configured");
            return Ok(());
        }

        let slot = match &self.wal {
            Some(wal) if wal.is_enabled() => Some(wal.allocate(id)?),
            Some(_) => {
                warn!(%id, "write-intent log disabled, replicating without a slot");
                None
            }
            None => None,
        };

        let result = self.replicate(&asset, Existing::Reject).await;
        self.release(slot);

        match result {
            Ok(_) => Ok(()),
            Err(failures) => {
                warn!(%id, failures = failures.len(), "replication failed on every backend group");
                Err(Error::Replication { failures })
            }
        }
    }

    fn release(&self, slot: Option<Slot>) {
        let (Some(wal), Some(slot)) = (&self.wal, slot) else {
            return;
        };
        let id = slot.asset_id();
        if let Err(e) = wal.clear(slot) {
            error!(%id, error = %e, "failed to clear write-intent slot");
        }
    }

    /// Try each group in order until one takes the asset
    async fn replicate(
        &self,
        asset: &Asset,
        existing: Existing,
    ) -> std::result::Result<Delivery, Vec<BackendFailure>> {
        let mut failures = Vec::new();

        for (index, group) in self.topology.groups().iter().enumerate() {
            let attempt = match group.as_slice() {
                [backend] => store_one(backend.as_ref(), asset, existing).await,
                backends => store_all(backends, asset, existing).await,
            };
            match attempt {
                Ok(delivery) => {
                    debug!(id = %asset.id, group = index, ?delivery, "replicated asset");
                    return Ok(delivery);
                }
                Err(errors) => {
                    for failure in &errors {
                        warn!(id = %asset.id, group = index, %failure, "backend store failed");
                    }
                    failures.extend(errors);
                }
            }
        }

        Err(failures)
    }

    async fn replay_pending(&self) -> Result<ReplayReport> {
        let mut report = ReplayReport::default();
        let Some(wal) = &self.wal else {
            return Ok(report);
        };

        let pending = wal.take_pending();
        if pending.is_empty() {
            return Ok(report);
        }

        if !self.store.is_enabled() {
            return Err(Error::configuration(format!(
                "{} uploads are pending but the local store is unavailable",
                pending.len()
            )));
        }
        if self.topology.is_empty() {
            return Err(Error::configuration(format!(
                "{} uploads are pending but no backend is configured",
                pending.len()
            )));
        }

        info!(pending = pending.len(), "replaying pending uploads");

        for upload in pending {
            let id = upload.asset_id();
            let Some(asset) = self.store.get(id) else {
                error!(%id, "pending upload has no local copy, dropping it");
                report.missing_locally += 1;
                self.release(Some(upload.slot));
                continue;
            };

            match self.replicate(&asset, Existing::Accept).await {
                Ok(Delivery::Stored) => {
                    report.resent += 1;
                    self.release(Some(upload.slot));
                }
                Ok(Delivery::AlreadyPresent) => {
                    report.already_upstream += 1;
                    self.release(Some(upload.slot));
                }
                Err(failures) => {
                    warn!(%id, failures = failures.len(), "pending upload still cannot be replicated");
                    report.still_pending += 1;
                }
            }
        }

        info!(
            resent = report.resent,
            already_upstream = report.already_upstream,
            missing_locally = report.missing_locally,
            still_pending = report.still_pending,
            "finished replaying pending uploads"
        );
        Ok(report)
    }
}

enum Claim {
    Owner(WriteGuard),
    Waiter(watch::Receiver<bool>),
}

/// Releases the per-id section and wakes waiters, including on unwind
struct WriteGuard {
    inner: Arc<WriterInner>,
    id: AssetId,
    done: watch::Sender<bool>,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.inner.writes.lock().remove(&self.id);
        self.done.send_replace(true);
    }
}

async fn store_one(
    backend: &dyn AssetServer,
    asset: &Asset,
    existing: Existing,
) -> std::result::Result<Delivery, Vec<BackendFailure>> {
    match backend.store(asset).await {
        Ok(()) => Ok(Delivery::Stored),
        Err(e) if existing == Existing::Accept && e.is_already_exists() => {
            Ok(Delivery::AlreadyPresent)
        }
        Err(e) => Err(failures_from(backend.name(), e)),
    }
}

/// Every backend must take the asset
async fn store_all(
    backends: &[Arc<dyn AssetServer>],
    asset: &Asset,
    existing: Existing,
) -> std::result::Result<Delivery, Vec<BackendFailure>> {
    let results = join_all(
        backends
            .iter()
            .map(|backend| store_one(backend.as_ref(), asset, existing)),
    )
    .await;

    let mut failures = Vec::new();
    let mut all_present = true;
    for result in results {
        match result {
            Ok(Delivery::Stored) => all_present = false,
            Ok(Delivery::AlreadyPresent) => {}
            Err(errors) => failures.extend(errors),
        }
    }

    if !failures.is_empty() {
        return Err(failures);
    }
    Ok(if all_present {
        Delivery::AlreadyPresent
    } else {
        Delivery::Stored
    })
}

fn failures_from(backend: &str, error: BackendError) -> Vec<BackendFailure> {
    error
        .flatten_once()
        .into_iter()
        .map(|cause| BackendFailure {
            backend: backend.to_string(),
            already_exists: cause.is_already_exists(),
            cause: cause.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockServer;
    use assetvault_common::AssetType;
    use std::time::Duration;
    use tempfile::TempDir;

    fn sample() -> Arc<Asset> {
        Arc::new(Asset::new(AssetId::new(), AssetType::OBJECT, vec![5u8; 128]).with_name("crate"))
    }

    struct Fixture {
        dir: TempDir,
        store: Arc<DiskStore>,
        wal: Arc<WriteIntentLog>,
    }

    impl Fixture {
        fn new(slots: usize) -> Self {
            let dir = TempDir::new().unwrap();
            let store = Arc::new(DiskStore::open(dir.path().join("cache")));
            let wal = Arc::new(
                WriteIntentLog::open_or_create(dir.path().join("intent.wal"), slots).unwrap(),
            );
            Self { dir, store, wal }
        }

        async fn writer(&self, groups: Vec<Vec<Arc<dyn AssetServer>>>) -> AssetWriter {
            AssetWriter::open(
                Arc::clone(&self.store),
                Some(Arc::clone(&self.wal)),
                Arc::new(BackendTopology::new(groups).unwrap()),
            )
            .await
            .unwrap()
        }

        /// Drop everything and reopen the store and log from disk
        fn restart(self) -> Self {
            let Self { dir, store, wal } = self;
            let slots = wal.slot_count();
            drop(store);
            drop(wal);
            let store = Arc::new(DiskStore::open(dir.path().join("cache")));
            let wal = Arc::new(
                WriteIntentLog::open_or_create(dir.path().join("intent.wal"), slots).unwrap(),
            );
            Self { dir, store, wal }
        }
    }

    fn failing(name: &str) -> Arc<MockServer> {
        Arc::new(MockServer::new(name).failing(BackendError::Transport("connection refused".into())))
    }

    #[tokio::test]
    async fn test_put_replicates_and_clears_slot() {
        let fixture = Fixture::new(8);
        let s1 = Arc::new(MockServer::new("s1"));
        let writer = fixture.writer(vec![vec![s1.handle()]]).await;
        let asset = sample();

        writer.put(Arc::clone(&asset)).await.unwrap();

        assert!(fixture.store.contains(asset.id));
        assert!(s1.holds(asset.id));
        assert_eq!(fixture.wal.in_use(), 0);
    }

    #[tokio::test]
    async fn test_nil_id_rejected() {
        let fixture = Fixture::new(8);
        let writer = fixture.writer(vec![]).await;
        let asset = Arc::new(Asset::new(AssetId::NIL, AssetType::OBJECT, vec![1u8]));

        assert!(matches!(writer.put(asset).await, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_duplicate_write_keeps_first_content() {
        let fixture = Fixture::new(8);
        let writer = fixture.writer(vec![vec![MockServer::new("s1").shared()]]).await;
        let first = sample();
        let second = Arc::new(Asset::new(first.id, AssetType::OBJECT, vec![9u8; 4]));

        writer.put(Arc::clone(&first)).await.unwrap();
        let err = writer.put(second).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(id) if id == first.id));

        assert_eq!(fixture.store.get(first.id).unwrap().data, first.data);
    }

    #[tokio::test]
    async fn test_no_upstream_is_local_only() {
        let fixture = Fixture::new(8);
        let writer = fixture.writer(vec![]).await;
        let asset = sample();

        writer.put(Arc::clone(&asset)).await.unwrap();
        assert!(fixture.store.contains(asset.id));
        assert_eq!(fixture.wal.in_use(), 0);
    }

    #[tokio::test]
    async fn test_serial_fallback_order() {
        let fixture = Fixture::new(8);
        let s1 = failing("s1");
        let s2 = Arc::new(MockServer::new("s2"));
        let s3 = Arc::new(MockServer::new("s3"));
        let writer = fixture
            .writer(vec![vec![s1.handle()], vec![s2.handle()], vec![s3.handle()]])
            .await;
        let asset = sample();

        writer.put(Arc::clone(&asset)).await.unwrap();

        assert_eq!(s1.stores(), 1);
        assert!(s2.holds(asset.id));
        assert_eq!(s3.stores(), 0);
    }

    #[tokio::test]
    async fn test_parallel_group_needs_every_backend() {
        let fixture = Fixture::new(8);
        let bad = failing("bad");
        let good = Arc::new(MockServer::new("good"));
        let fallback = Arc::new(MockServer::new("fallback"));
        let writer = fixture
            .writer(vec![vec![bad.handle(), good.handle()], vec![fallback.handle()]])
            .await;
        let asset = sample();

        writer.put(Arc::clone(&asset)).await.unwrap();

        // Both members were tried; the partial success did not satisfy the group
        assert_eq!(bad.stores(), 1);
        assert!(good.holds(asset.id));
        assert!(fallback.holds(asset.id));
    }

    #[tokio::test]
    async fn test_aggregate_error_lists_every_cause() {
        let fixture = Fixture::new(8);
        let bundled = Arc::new(MockServer::new("bundled").failing(BackendError::Multiple(vec![
            BackendError::Transport("timeout".into()),
            BackendError::WriteFailed("quota".into()),
        ])));
        let writer = fixture
            .writer(vec![vec![failing("s1").handle(), bundled.handle()], vec![failing("s2").handle()]])
            .await;
        let asset = sample();

        let err = writer.put(Arc::clone(&asset)).await.unwrap_err();
        let failures = err.backend_failures();
        assert_eq!(failures.len(), 4);
        let names: Vec<_> = failures.iter().map(|f| f.backend.as_str()).collect();
        assert_eq!(names, ["s1", "bundled", "bundled", "s2"]);

        // The local copy stays and the slot is released
        assert!(fixture.store.contains(asset.id));
        assert_eq!(fixture.wal.in_use(), 0);
    }

    #[tokio::test]
    async fn test_repeated_failures_never_exhaust_slots() {
        let fixture = Fixture::new(4);
        let writer = fixture.writer(vec![vec![failing("s1").handle()]]).await;

        for _ in 0..3 {
            let err = writer.put(sample()).await.unwrap_err();
            assert!(matches!(err, Error::Replication { .. }));
            assert!(!err.is_capacity());
        }
        assert_eq!(fixture.wal.in_use(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_capacity_error_when_all_slots_pending() {
        let fixture = Fixture::new(4);
        let stuck = Arc::new(MockServer::new("stuck").with_delay(Duration::from_secs(60)));
        let writer = Arc::new(fixture.writer(vec![vec![stuck.handle()]]).await);

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let writer = Arc::clone(&writer);
            tasks.push(tokio::spawn(async move { writer.put(sample()).await }));
        }

        tokio::time::timeout(Duration::from_secs(10), async {
            while fixture.wal.in_use() < 4 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let err = writer.put(sample()).await.unwrap_err();
        assert!(matches!(err, Error::WriteCacheFull { slots: 4 }));

        for task in tasks {
            task.abort();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_abandoned_put_still_releases_slot() {
        let fixture = Fixture::new(2);
        let slow = Arc::new(MockServer::new("slow").with_delay(Duration::from_millis(300)));
        let writer = fixture.writer(vec![vec![slow.handle()]]).await;

        for _ in 0..2 {
            let result = tokio::time::timeout(Duration::from_millis(50), writer.put(sample())).await;
            assert!(result.is_err());
        }

        tokio::time::timeout(Duration::from_secs(10), async {
            while fixture.wal.in_use() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(slow.stores(), 2);

        // Both slots are free again, so a healthy write is accepted
        let asset = sample();
        writer.put(Arc::clone(&asset)).await.unwrap();
        assert!(slow.holds(asset.id));
        assert_eq!(fixture.wal.in_use(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_id_runs_once() {
        let fixture = Fixture::new(8);
        let slow = Arc::new(MockServer::new("slow").with_delay(Duration::from_millis(200)));
        let writer = Arc::new(fixture.writer(vec![vec![slow.handle()]]).await);
        let asset = sample();

        let mut tasks = Vec::new();
        for _ in 0..3 {
            let writer = Arc::clone(&writer);
            let asset = Arc::clone(&asset);
            tasks.push(tokio::spawn(async move { writer.put(asset).await }));
        }
        for task in tasks {
            // A straggler arriving after the owner finished sees the stored copy
            match task.await.unwrap() {
                Ok(()) | Err(Error::AlreadyExists(_)) => {}
                Err(e) => panic!("unexpected write error: {e}"),
            }
        }

        assert_eq!(slow.stores(), 1);
        assert!(slow.holds(asset.id));
    }

    #[tokio::test]
    async fn test_replay_resends_pending_upload() {
        let fixture = Fixture::new(8);
        let asset = sample();
        // Crash between the slot claim and the upstream write
        fixture.store.put(Arc::clone(&asset)).unwrap();
        let _slot = fixture.wal.allocate(asset.id).unwrap();

        let fixture = fixture.restart();
        assert_eq!(fixture.wal.pending_count(), 1);
        let s1 = Arc::new(MockServer::new("s1"));
        let writer = fixture.writer(vec![vec![s1.handle()]]).await;

        assert_eq!(
            writer.replay_report(),
            ReplayReport {
                resent: 1,
                ..ReplayReport::default()
            }
        );
        assert!(s1.holds(asset.id));
        assert_eq!(fixture.wal.in_use(), 0);
    }

    #[tokio::test]
    async fn test_replay_accepts_already_exists() {
        let fixture = Fixture::new(8);
        let asset = sample();
        fixture.store.put(Arc::clone(&asset)).unwrap();
        let _slot = fixture.wal.allocate(asset.id).unwrap();

        let fixture = fixture.restart();
        let s1 = Arc::new(MockServer::new("s1").with_asset((*asset).clone()));
        let writer = fixture.writer(vec![vec![s1.handle()]]).await;

        assert_eq!(writer.replay_report().already_upstream, 1);
        assert_eq!(fixture.wal.in_use(), 0);
    }

    #[tokio::test]
    async fn test_replay_drops_slot_without_local_copy() {
        let fixture = Fixture::new(8);
        let _slot = fixture.wal.allocate(AssetId::new()).unwrap();

        let fixture = fixture.restart();
        let s1 = Arc::new(MockServer::new("s1"));
        let writer = fixture.writer(vec![vec![s1.handle()]]).await;

        assert_eq!(writer.replay_report().missing_locally, 1);
        assert_eq!(s1.stores(), 0);
        assert_eq!(fixture.wal.in_use(), 0);
    }

    #[tokio::test]
    async fn test_replay_failure_keeps_slot_pending() {
        let fixture = Fixture::new(8);
        let asset = sample();
        fixture.store.put(Arc::clone(&asset)).unwrap();
        let _slot = fixture.wal.allocate(asset.id).unwrap();

        let fixture = fixture.restart();
        let writer = fixture.writer(vec![vec![failing("s1").handle()]]).await;
        assert_eq!(writer.replay_report().still_pending, 1);
        assert_eq!(fixture.wal.in_use(), 1);
        drop(writer);

        // Still there after another restart
        let fixture = fixture.restart();
        assert_eq!(fixture.wal.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_replay_without_upstream_is_fatal() {
        let fixture = Fixture::new(8);
        let asset = sample();
        fixture.store.put(Arc::clone(&asset)).unwrap();
        let _slot = fixture.wal.allocate(asset.id).unwrap();

        let fixture = fixture.restart();
        let result = AssetWriter::open(
            Arc::clone(&fixture.store),
            Some(Arc::clone(&fixture.wal)),
            Arc::new(BackendTopology::empty()),
        )
        .await;
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_replay_with_disabled_store_is_fatal() {
        let fixture = Fixture::new(8);
        let _slot = fixture.wal.allocate(AssetId::new()).unwrap();

        let fixture = fixture.restart();
        let result = AssetWriter::open(
            Arc::new(DiskStore::disabled(fixture.dir.path().join("cache"), "test")),
            Some(Arc::clone(&fixture.wal)),
            Arc::new(BackendTopology::new(vec![vec![MockServer::new("s1").shared()]]).unwrap()),
        )
        .await;
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
