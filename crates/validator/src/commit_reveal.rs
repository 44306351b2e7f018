use crate::metrics::MetricsContext;
use crate::term::TermState;
use anyhow::{Context as _, Result};
use log::{info, warn};
use shared::artifacts::{publish_json, ArtifactStore};
use shared::ledger::Ledger;
use shared::models::artifact::{state_artifact_key, state_artifact_name, StateBundle};
use shared::models::commitment::Commitment;
use shared::models::network::Uid;
use shared::protocol::TermConfig;
use std::sync::Arc;

/// Publishes this validator's commitments for a term.
///
/// During `[seedhash_start, seedhash_end)` of term T the hash of the seed
/// prepared for T + 1 goes on the ledger. During `[0, share_seed)` of T + 1
/// the seed itself is revealed, pointing at a state bundle with the proposed
/// grouping. Each publish happens at most once per term; a failed publish
/// leaves its flag unset so the next tick tries again.
#[derive(Clone)]
pub struct CommitRevealCoordinator {
    uid: Uid,
    config: Arc<TermConfig>,
    ledger: Arc<dyn Ledger>,
    artifacts: Arc<dyn ArtifactStore>,
    metrics: MetricsContext,
}

impl CommitRevealCoordinator {
    pub fn new(
        uid: Uid,
        config: Arc<TermConfig>,
        ledger: Arc<dyn Ledger>,
        artifacts: Arc<dyn ArtifactStore>,
        metrics: MetricsContext,
    ) -> Self {
        Self {
            uid,
            config,
            ledger,
            artifacts,
            metrics,
        }
    }

    pub fn in_seedhash_window(&self, offset: u64) -> bool {
        offset >= self.config.blocks_seedhash_start && offset < self.config.blocks_seedhash_end
    }

    pub fn in_share_window(&self, offset: u64) -> bool {
        offset < self.config.blocks_share_seed
    }

    /// Commits `hash(next_seed)` along with the latest benchmark artifact
    /// version. Returns whether a commitment was published by this call.
    pub async fn commit_seedhash(&self, state: &mut TermState, offset: u64) -> Result<bool> {
        if state.seedhash_committed || !self.in_seedhash_window(offset) {
            return Ok(false);
        }
        let commitment = Commitment::seed_hash(
            state.term,
            state.next_seed,
            state.benchmark.version.clone(),
        );
        self.publish(&commitment).await?;
        state.seedhash_committed = true;
        info!("Committed {commitment}");
        Ok(true)
    }

    /// Uploads the state bundle for the proposed grouping, then reveals the
    /// term's seed pointing at it. Needs `state.groups` to be set.
    pub async fn share_seed(&self, state: &mut TermState, offset: u64) -> Result<bool> {
        if state.seed_committed || !self.in_share_window(offset) {
            return Ok(false);
        }
        let Some(groups) = state.groups.clone() else {
            warn!("No grouping proposed for term {}, not sharing seed yet", state.term);
            return Ok(false);
        };

        let version = match &state.state_version {
            Some(version) => version.clone(),
            None => {
                let bundle = StateBundle::new(state.term, state.seed, groups.clone())?;
                let version = publish_json(
                    self.artifacts.as_ref(),
                    &state_artifact_name(self.uid),
                    &state_artifact_key(state.term),
                    &bundle,
                )
                .await
                .context("failed to upload state bundle")?;
                info!(
                    "Uploaded state bundle for term {} as {version} ({} groups)",
                    state.term,
                    groups.len()
                );
                state.state_version = Some(version.clone());
                version
            }
        };

        let commitment = Commitment::seed_reveal(state.term, state.seed, &groups, version)?;
        self.publish(&commitment).await?;
        state.seed_committed = true;
        info!("Committed {commitment}");
        Ok(true)
    }

    async fn publish(&self, commitment: &Commitment) -> Result<()> {
        let kind = match commitment {
            Commitment::SeedHash(_) => "seedhash",
            Commitment::Seed(_) => "seed",
        };
        let result = self
            .ledger
            .publish_commitment(self.uid, commitment)
            .await
            .with_context(|| format!("failed to publish {kind} commitment"));
        self.metrics.record_commitment(kind, result.is_ok());
        result
    }
}
