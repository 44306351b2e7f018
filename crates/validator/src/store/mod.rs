use anyhow::Result;
use async_trait::async_trait;
use shared::models::network::Uid;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub mod redis;

/// Keeps the seeds a validator generated, by the term they were committed
/// in, so a restarted process still reveals what it committed to.
#[async_trait]
pub trait SeedStore: Send + Sync {
    async fn load_seed(&self, uid: Uid, term: u64) -> Result<Option<u64>>;

    async fn save_seed(&self, uid: Uid, term: u64, seed: u64) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct MemorySeedStore {
    seeds: Arc<Mutex<HashMap<(Uid, u64), u64>>>,
}

impl MemorySeedStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SeedStore for MemorySeedStore {
    async fn load_seed(&self, uid: Uid, term: u64) -> Result<Option<u64>> {
        Ok(self.seeds.lock().await.get(&(uid, term)).copied())
    }

    async fn save_seed(&self, uid: Uid, term: u64, seed: u64) -> Result<()> {
        self.seeds.lock().await.insert((uid, term), seed);
        Ok(())
    }
}
