use log::debug;
use shared::models::benchmark::{JobState, WorkerStatus};
use shared::models::network::{NetworkSnapshot, Uid};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// What the worker knows about itself and about who may probe it.
#[derive(Debug)]
pub struct WorkerState {
    version: String,
    active_benchmarks: AtomicUsize,
    // None until the first snapshot arrived
    validators: RwLock<Option<HashSet<Uid>>>,
}

impl WorkerState {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            active_benchmarks: AtomicUsize::new(0),
            validators: RwLock::new(None),
        }
    }

    pub fn job_state(&self) -> JobState {
        if self.active_benchmarks.load(Ordering::SeqCst) > 0 {
            JobState::Benchmarking
        } else {
            JobState::Idle
        }
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            version: self.version.clone(),
            job_id: self.job_state().job_id(),
        }
    }

    /// Marks a payload as being served until the guard is dropped.
    pub fn begin_benchmark(self: &Arc<Self>) -> BenchmarkGuard {
        self.active_benchmarks.fetch_add(1, Ordering::SeqCst);
        BenchmarkGuard {
            state: Arc::clone(self),
        }
    }

    /// Replaces the allow-list with the validators of `snapshot`.
    pub async fn replace_validators(&self, snapshot: &NetworkSnapshot, min_stake: f64) {
        let uids: HashSet<Uid> = snapshot.validator_uids(min_stake).into_iter().collect();
        debug!("Allow-listing {} validators", uids.len());
        *self.validators.write().await = Some(uids);
    }

    /// `None` while no snapshot has been loaded yet.
    pub async fn is_validator(&self, uid: Uid) -> Option<bool> {
        self.validators
            .read()
            .await
            .as_ref()
            .map(|uids| uids.contains(&uid))
    }
}

pub struct BenchmarkGuard {
    state: Arc<WorkerState>,
}

impl Drop for BenchmarkGuard {
    fn drop(&mut self) {
        self.state.active_benchmarks.fetch_sub(1, Ordering::SeqCst);
    }
}
