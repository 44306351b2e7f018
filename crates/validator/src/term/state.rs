use crate::benchmark::BenchmarkEvent;
use crate::vote::VoteOutcome;
use serde::Serialize;
use shared::models::benchmark::BenchmarkResults;
use shared::models::network::{Group, Uid};
use std::collections::BTreeSet;

/// Everything a validator tracks for one term. Built fresh on every
/// rollover; nothing in here outlives its term except `next_seed`, which is
/// handed to the next term's state as its `seed`.
#[derive(Debug, Clone)]
pub struct TermState {
    pub term: u64,
    /// Seed revealed during this term.
    pub seed: u64,
    /// Seed whose hash is committed during this term and revealed in the next.
    pub next_seed: u64,
    pub seedhash_committed: bool,
    pub seed_committed: bool,
    pub groups: Option<Vec<Group>>,
    /// Version of the uploaded state bundle backing our seed reveal.
    pub state_version: Option<String>,
    pub vote: Option<VoteOutcome>,
    pub benchmark: BenchmarkProgress,
    /// This term's rewards went into the scores.
    pub scores_updated: bool,
    pub weights_set: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BenchmarkProgress {
    pub results: BenchmarkResults,
    pub completed_groups: BTreeSet<usize>,
    /// Version of the latest published benchmark artifact.
    pub version: Option<String>,
    pub finished: bool,
}

impl TermState {
    pub fn new(term: u64, seed: u64, next_seed: u64) -> Self {
        Self {
            term,
            seed,
            next_seed,
            seedhash_committed: false,
            seed_committed: false,
            groups: None,
            state_version: None,
            vote: None,
            benchmark: BenchmarkProgress::default(),
            scores_updated: false,
            weights_set: false,
        }
    }

    /// Folds an orchestrator event into this term. Events from another term
    /// are dropped.
    pub fn apply_benchmark_event(&mut self, event: BenchmarkEvent) -> bool {
        if event.term() != self.term {
            return false;
        }
        match event {
            BenchmarkEvent::GroupMeasured {
                group_index,
                results,
                version,
                ..
            } => {
                self.benchmark.completed_groups.insert(group_index);
                self.benchmark.results.extend(results);
                if version.is_some() {
                    self.benchmark.version = version;
                }
            }
            BenchmarkEvent::Finished { .. } => {
                self.benchmark.finished = true;
            }
        }
        true
    }

    pub fn voted_groups(&self) -> Option<&[Group]> {
        self.vote.as_ref().map(|v| v.groups.as_slice())
    }

    pub fn summary(&self, offset: u64) -> TermSummary {
        TermSummary {
            term: self.term,
            offset,
            seedhash_committed: self.seedhash_committed,
            seed_committed: self.seed_committed,
            proposed_groups: self.groups.as_ref().map(Vec::len),
            voted_uid: self.vote.as_ref().map(|v| v.winner),
            voted_groups: self.vote.as_ref().map(|v| v.groups.len()),
            benchmarked_groups: self.benchmark.completed_groups.len(),
            benchmark_finished: self.benchmark.finished,
            benchmark_version: self.benchmark.version.clone(),
            weights_set: self.weights_set,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TermSummary {
    pub term: u64,
    pub offset: u64,
    pub seedhash_committed: bool,
    pub seed_committed: bool,
    pub proposed_groups: Option<usize>,
    pub voted_uid: Option<Uid>,
    pub voted_groups: Option<usize>,
    pub benchmarked_groups: usize,
    pub benchmark_finished: bool,
    pub benchmark_version: Option<String>,
    pub weights_set: bool,
}
