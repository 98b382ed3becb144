//! In-memory backend for orchestrator tests

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assetvault_client::{AssetServer, BackendError};
use assetvault_common::{Asset, AssetId};
use async_trait::async_trait;
use parking_lot::Mutex;

pub(crate) struct MockServer {
    name: String,
    assets: Mutex<HashMap<AssetId, Asset>>,
    delay: Option<Duration>,
    failure: Option<BackendError>,
    requests: AtomicUsize,
    stores: AtomicUsize,
}

impl MockServer {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            assets: Mutex::new(HashMap::new()),
            delay: None,
            failure: None,
            requests: AtomicUsize::new(0),
            stores: AtomicUsize::new(0),
        }
    }

    /// Sleep before answering either call
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Reject every store with `error`
    pub(crate) fn failing(mut self, error: BackendError) -> Self {
        self.failure = Some(error);
        self
    }

    pub(crate) fn with_asset(self, asset: Asset) -> Self {
        self.assets.lock().insert(asset.id, asset);
        self
    }

    pub(crate) fn shared(self) -> Arc<dyn AssetServer> {
        Arc::new(self)
    }

    /// Trait-object handle sharing this mock's state
    pub(crate) fn handle(self: &Arc<Self>) -> Arc<dyn AssetServer> {
        Arc::clone(self) as Arc<dyn AssetServer>
    }

    pub(crate) fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub(crate) fn stores(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    pub(crate) fn holds(&self, id: AssetId) -> bool {
        self.assets.lock().contains_key(&id)
    }
}

#[async_trait]
impl AssetServer for MockServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn request(&self, id: AssetId) -> Option<Asset> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.assets.lock().get(&id).cloned()
    }

    async fn store(&self, asset: &Asset) -> Result<(), BackendError> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        let mut assets = self.assets.lock();
        if assets.contains_key(&asset.id) {
            return Err(BackendError::AlreadyExists);
        }
        assets.insert(asset.id, asset.clone());
        Ok(())
    }
}
