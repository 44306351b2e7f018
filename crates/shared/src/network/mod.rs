use crate::models::network::NetworkSnapshot;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod http;

pub use http::HttpNetworkSource;

/// Source of the registered neurons, their stake and their addresses.
#[async_trait]
pub trait NetworkSource: Send + Sync {
    async fn snapshot(&self) -> Result<NetworkSnapshot>;
}

/// Fixed snapshot, replaceable at runtime.
#[derive(Clone, Default)]
pub struct StaticNetworkSource {
    snapshot: Arc<RwLock<NetworkSnapshot>>,
}

impl StaticNetworkSource {
    pub fn new(snapshot: NetworkSnapshot) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(snapshot)),
        }
    }

    pub async fn replace(&self, snapshot: NetworkSnapshot) {
        *self.snapshot.write().await = snapshot;
    }
}

#[async_trait]
impl NetworkSource for StaticNetworkSource {
    async fn snapshot(&self) -> Result<NetworkSnapshot> {
        Ok(self.snapshot.read().await.clone())
    }
}
