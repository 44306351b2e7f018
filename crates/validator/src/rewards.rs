use crate::vote::ObservedSeedHashes;
use anyhow::{Context as _, Result};
use log::{debug, info, warn};
use shared::artifacts::ArtifactStore;
use shared::ledger::Ledger;
use shared::models::artifact::{benchmark_artifact_key, benchmark_artifact_name};
use shared::models::benchmark::BenchmarkResults;
use shared::models::commitment::Commitment;
use shared::models::network::Uid;
use shared::protocol::TermConfig;
use std::collections::BTreeMap;

/// Throughput samples per worker, one per validator that measured it,
/// ordered by validator uid.
pub type WorkerSamples = BTreeMap<Uid, Vec<f64>>;

pub const SCORE_ALPHA: f64 = 0.1;

/// Turns per-worker samples into scalar rewards.
pub trait RewardFunction: Send + Sync {
    fn rewards(&self, samples: &WorkerSamples) -> BTreeMap<Uid, f64>;
}

/// Median throughput per worker, relative to the best median.
#[derive(Debug, Clone, Copy, Default)]
pub struct MedianThroughputReward;

impl RewardFunction for MedianThroughputReward {
    fn rewards(&self, samples: &WorkerSamples) -> BTreeMap<Uid, f64> {
        let medians: BTreeMap<Uid, f64> = samples
            .iter()
            .filter_map(|(uid, values)| median(values).map(|m| (*uid, m)))
            .collect();
        let best = medians.values().copied().fold(0.0, f64::max);
        if best <= 0.0 {
            return medians.into_keys().map(|uid| (uid, 0.0)).collect();
        }
        medians
            .into_iter()
            .map(|(uid, m)| (uid, m / best))
            .collect()
    }
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// What one aggregation pass over the ledger found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub samples: WorkerSamples,
    /// Seed-hash commitments seen for the term, to check next term's reveals
    /// against.
    pub seedhashes: ObservedSeedHashes,
}

/// Collects every validator's benchmark results for a term and keeps a
/// moving average of worker scores across terms.
pub struct RewardAggregator {
    config: TermConfig,
    reward: Box<dyn RewardFunction>,
    scores: BTreeMap<Uid, f64>,
    alpha: f64,
}

impl RewardAggregator {
    pub fn new(config: TermConfig, reward: Box<dyn RewardFunction>) -> Self {
        Self {
            config,
            reward,
            scores: BTreeMap::new(),
            alpha: SCORE_ALPHA,
        }
    }

    pub fn scores(&self) -> &BTreeMap<Uid, f64> {
        &self.scores
    }

    /// Reads each validator's seed-hash commitment for `term` and downloads
    /// the benchmark artifact it points at. Only commitments published inside
    /// the seed-hash window of `term` count. Unmeasured workers contribute no
    /// sample.
    ///
    /// Fails without a partial result when the ledger or the store could not
    /// be reached, so the pass can simply be repeated.
    pub async fn collect(
        &self,
        ledger: &dyn Ledger,
        artifacts: &dyn ArtifactStore,
        term: u64,
        validator_uids: &[Uid],
    ) -> Result<Aggregation> {
        let mut uids = validator_uids.to_vec();
        uids.sort_unstable();
        uids.dedup();

        let mut aggregation = Aggregation::default();
        for uid in uids {
            let Some(record) = ledger
                .read_commitment(uid)
                .await
                .with_context(|| format!("failed to read commitment of {uid}"))?
            else {
                continue;
            };
            let Commitment::SeedHash(commit) = record.commitment else {
                continue;
            };
            if commit.term != term || !self.in_seedhash_window(record.block, term) {
                debug!("Ignoring seedhash commitment of {uid} from block {}", record.block);
                continue;
            }
            aggregation
                .seedhashes
                .insert(uid, (term, commit.seedhash.clone()));

            let Some(version) = commit.benchmark_version else {
                continue;
            };
            let Some(data) = artifacts
                .fetch_artifact(
                    &benchmark_artifact_name(uid),
                    &benchmark_artifact_key(term),
                    &version,
                )
                .await
                .with_context(|| format!("failed to fetch benchmark of {uid}"))?
            else {
                warn!("Benchmark {version} of validator {uid} not found");
                continue;
            };
            let results: BenchmarkResults = match serde_json::from_str(&data) {
                Ok(results) => results,
                Err(e) => {
                    warn!("Malformed benchmark {version} of validator {uid}: {e}");
                    continue;
                }
            };
            for (worker, entry) in results {
                if let Some(throughput) = entry.throughput() {
                    aggregation.samples.entry(worker).or_default().push(throughput);
                }
            }
        }
        info!(
            "Aggregated term {term}: {} workers sampled by {} validators",
            aggregation.samples.len(),
            aggregation.seedhashes.len()
        );
        Ok(aggregation)
    }

    /// Folds this term's rewards into the moving average. Workers without
    /// samples keep their score.
    pub fn update_scores(&mut self, samples: &WorkerSamples) {
        for (uid, reward) in self.reward.rewards(samples) {
            let score = self.scores.entry(uid).or_insert(0.0);
            *score = self.alpha * reward + (1.0 - self.alpha) * *score;
        }
    }

    /// Scores normalised to sum to one, by ascending worker uid.
    pub fn weights(&self) -> Vec<(Uid, f64)> {
        let total: f64 = self.scores.values().sum();
        if total <= 0.0 {
            return Vec::new();
        }
        self.scores
            .iter()
            .map(|(uid, score)| (*uid, score / total))
            .collect()
    }

    fn in_seedhash_window(&self, block: u64, term: u64) -> bool {
        let Some(elapsed) = block.checked_sub(self.config.origin_block) else {
            return false;
        };
        let offset = elapsed % self.config.blocks_per_term;
        elapsed / self.config.blocks_per_term == term
            && offset >= self.config.blocks_seedhash_start
            && offset < self.config.blocks_seedhash_end
    }
}
