use crate::models::commitment::{Commitment, CommitmentRecord};
use crate::models::network::Uid;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;

pub mod http;

pub use http::HttpLedger;

/// The shared, append-only ledger validators coordinate through.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn read_block_height(&self) -> Result<u64>;

    /// Publish `commitment` as validator `uid`. Replaces that validator's
    /// previous commitment.
    async fn publish_commitment(&self, uid: Uid, commitment: &Commitment) -> Result<()>;

    /// Latest commitment published by `uid`, if any.
    async fn read_commitment(&self, uid: Uid) -> Result<Option<CommitmentRecord>>;

    async fn set_weights(&self, uid: Uid, weights: &[(Uid, f64)]) -> Result<()>;
}

pub struct MockLedger {
    block: AtomicU64,
    reject_writes: AtomicBool,
    commitments: Mutex<HashMap<Uid, CommitmentRecord>>,
    published: Mutex<Vec<(Uid, CommitmentRecord)>>,
    weights: Mutex<HashMap<Uid, Vec<(Uid, f64)>>>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new(0)
    }
}

impl MockLedger {
    pub fn new(block: u64) -> Self {
        Self {
            block: AtomicU64::new(block),
            reject_writes: AtomicBool::new(false),
            commitments: Mutex::new(HashMap::new()),
            published: Mutex::new(Vec::new()),
            weights: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_block_height(&self, block: u64) {
        self.block.store(block, Ordering::SeqCst);
    }

    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Places a commitment as if `uid` had published it at `block`.
    pub async fn insert_commitment(&self, uid: Uid, block: u64, commitment: Commitment) {
        let mut commitments = self.commitments.lock().await;
        commitments.insert(uid, CommitmentRecord { block, commitment });
    }

    /// Every successful publish, in order.
    pub async fn published(&self) -> Vec<(Uid, CommitmentRecord)> {
        self.published.lock().await.clone()
    }

    pub async fn weights_of(&self, uid: Uid) -> Option<Vec<(Uid, f64)>> {
        self.weights.lock().await.get(&uid).cloned()
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn read_block_height(&self) -> Result<u64> {
        Ok(self.block.load(Ordering::SeqCst))
    }

    async fn publish_commitment(&self, uid: Uid, commitment: &Commitment) -> Result<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            bail!("ledger rejected commitment from {uid}");
        }
        let record = CommitmentRecord {
            block: self.block.load(Ordering::SeqCst),
            commitment: commitment.clone(),
        };
        self.commitments.lock().await.insert(uid, record.clone());
        self.published.lock().await.push((uid, record));
        Ok(())
    }

    async fn read_commitment(&self, uid: Uid) -> Result<Option<CommitmentRecord>> {
        Ok(self.commitments.lock().await.get(&uid).cloned())
    }

    async fn set_weights(&self, uid: Uid, weights: &[(Uid, f64)]) -> Result<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            bail!("ledger rejected weights from {uid}");
        }
        self.weights.lock().await.insert(uid, weights.to_vec());
        Ok(())
    }
}
