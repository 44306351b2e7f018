use anyhow::{bail, Result};
use futures::future::join_all;
use log::{info, warn};
use serde::Serialize;
use shared::artifacts::ArtifactStore;
use shared::ledger::Ledger;
use shared::models::artifact::{state_artifact_key, state_artifact_name, StateBundle};
use shared::models::commitment::{Commitment, SeedReveal};
use shared::models::network::{Group, Uid};
use shared::protocol::TermConfig;
use shared::utils::hash::{hash_json, hash_seed};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Seed hashes seen on the ledger, by validator: `(term, seedhash)`. A hash
/// committed in term T must match the seed revealed in term T + 1.
pub type ObservedSeedHashes = HashMap<Uid, (u64, String)>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteOutcome {
    pub winner: Uid,
    pub groups: Vec<Group>,
    pub seed_sum: u128,
}

/// A candidate whose reveal and state bundle checked out.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteRecord {
    pub uid: Uid,
    pub term: u64,
    pub seed: u64,
    pub seedhash: String,
    pub grouphash: String,
    pub version: String,
    pub groups: Vec<Group>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VoteRejection {
    NoCommitment,
    NotASeedReveal,
    WrongTerm { expected: u64, found: u64 },
    OutsideCommitWindow { block: u64 },
    /// The store could not be reached; worth retrying.
    StoreUnavailable(String),
    ArtifactMissing { version: String },
    MalformedArtifact(String),
    SeedHashMismatch,
    SeedMismatch { revealed: u64, shared: u64 },
    GroupHashMismatch,
    MalformedGrouping(String),
    PriorCommitMismatch { committed_in: u64 },
}

impl VoteRejection {
    pub fn is_transient(&self) -> bool {
        matches!(self, VoteRejection::StoreUnavailable(_))
    }
}

impl fmt::Display for VoteRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteRejection::NoCommitment => write!(f, "no commitment"),
            VoteRejection::NotASeedReveal => write!(f, "latest commitment is not a seed reveal"),
            VoteRejection::WrongTerm { expected, found } => {
                write!(f, "commitment is for term {found}, expected {expected}")
            }
            VoteRejection::OutsideCommitWindow { block } => {
                write!(f, "committed at block {block}, outside the share window")
            }
            VoteRejection::StoreUnavailable(e) => write!(f, "store unavailable: {e}"),
            VoteRejection::ArtifactMissing { version } => {
                write!(f, "state artifact {version} not found")
            }
            VoteRejection::MalformedArtifact(e) => write!(f, "malformed state artifact: {e}"),
            VoteRejection::SeedHashMismatch => write!(f, "revealed seed does not match its hash"),
            VoteRejection::SeedMismatch { revealed, shared } => {
                write!(f, "revealed seed {revealed} differs from shared seed {shared}")
            }
            VoteRejection::GroupHashMismatch => write!(f, "groups do not match the group hash"),
            VoteRejection::MalformedGrouping(e) => write!(f, "malformed grouping: {e}"),
            VoteRejection::PriorCommitMismatch { committed_in } => {
                write!(f, "seed does not match the hash committed in term {committed_in}")
            }
        }
    }
}

/// Checks that `groups` could have come out of clustering: no worker twice,
/// no empty group, none above `group_size` and at most one undersized.
pub fn check_grouping(groups: &[Group], group_size: usize) -> Result<(), VoteRejection> {
    let mut seen = HashSet::new();
    let mut undersized = 0;
    for (index, group) in groups.iter().enumerate() {
        if group.is_empty() {
            return Err(VoteRejection::MalformedGrouping(format!(
                "group {index} is empty"
            )));
        }
        if group.len() > group_size {
            return Err(VoteRejection::MalformedGrouping(format!(
                "group {index} has {} workers, limit is {group_size}",
                group.len()
            )));
        }
        if group.len() < group_size {
            undersized += 1;
        }
        if let Some(uid) = group.iter().find(|uid| !seen.insert(**uid)) {
            return Err(VoteRejection::MalformedGrouping(format!(
                "worker {uid} appears more than once"
            )));
        }
    }
    if undersized > 1 {
        return Err(VoteRejection::MalformedGrouping(format!(
            "{undersized} undersized groups"
        )));
    }
    Ok(())
}

/// Picks one proposal out of the valid set: the one at
/// `sum(seeds) mod count`, counting in ascending uid order. The input order
/// does not matter.
pub fn select_winner(valid: &[VoteRecord]) -> Option<VoteOutcome> {
    if valid.is_empty() {
        return None;
    }
    let mut ordered: Vec<&VoteRecord> = valid.iter().collect();
    ordered.sort_by_key(|v| v.uid);

    let seed_sum: u128 = ordered.iter().map(|v| v.seed as u128).sum();
    let index = (seed_sum % ordered.len() as u128) as usize;
    let chosen = ordered[index];
    Some(VoteOutcome {
        winner: chosen.uid,
        groups: chosen.groups.clone(),
        seed_sum,
    })
}

pub struct VoteResolver<'a> {
    ledger: &'a dyn Ledger,
    artifacts: &'a dyn ArtifactStore,
    config: &'a TermConfig,
    observed: &'a ObservedSeedHashes,
}

impl<'a> VoteResolver<'a> {
    pub fn new(
        ledger: &'a dyn Ledger,
        artifacts: &'a dyn ArtifactStore,
        config: &'a TermConfig,
        observed: &'a ObservedSeedHashes,
    ) -> Self {
        Self {
            ledger,
            artifacts,
            config,
            observed,
        }
    }

    /// Resolves the vote for `term` among `validator_uids`.
    ///
    /// Returns `Ok(None)` when no candidate is valid. Fails when any
    /// candidate could not be checked because the ledger or the artifact
    /// store was unreachable, so a partial view is never frozen as the
    /// outcome.
    pub async fn resolve(&self, term: u64, validator_uids: &[Uid]) -> Result<Option<VoteOutcome>> {
        let mut uids = validator_uids.to_vec();
        uids.sort_unstable();
        uids.dedup();
        info!("Voting on validators {uids:?}");

        let checks = join_all(uids.iter().map(|uid| self.check_candidate(*uid, term))).await;

        let mut valid = Vec::new();
        let mut transient = 0;
        for (uid, check) in uids.iter().zip(checks) {
            match check {
                Ok(record) => valid.push(record),
                Err(VoteRejection::NoCommitment) => {}
                Err(rejection) if rejection.is_transient() => {
                    warn!("Could not check commitment of {uid}: {rejection}");
                    transient += 1;
                }
                Err(rejection) => info!("Rejected commitment of {uid}: {rejection}"),
            }
        }
        if transient > 0 {
            bail!("{transient} candidate(s) could not be checked");
        }

        let outcome = select_winner(&valid);
        match &outcome {
            Some(outcome) => info!(
                "Voted validator uid: {}, seed sum: {}, valid commitments: {}",
                outcome.winner,
                outcome.seed_sum,
                valid.len()
            ),
            None => warn!("No valid commitments for term {term}"),
        }
        Ok(outcome)
    }

    async fn check_candidate(&self, uid: Uid, term: u64) -> Result<VoteRecord, VoteRejection> {
        let record = self
            .ledger
            .read_commitment(uid)
            .await
            .map_err(|e| VoteRejection::StoreUnavailable(format!("{e:#}")))?
            .ok_or(VoteRejection::NoCommitment)?;

        let Commitment::Seed(reveal) = record.commitment else {
            return Err(VoteRejection::NotASeedReveal);
        };
        if reveal.term != term {
            return Err(VoteRejection::WrongTerm {
                expected: term,
                found: reveal.term,
            });
        }
        if !self.within_commit_window(record.block) {
            return Err(VoteRejection::OutsideCommitWindow {
                block: record.block,
            });
        }
        if !reveal.is_self_consistent() {
            return Err(VoteRejection::SeedHashMismatch);
        }
        if let Some((committed_in, seedhash)) = self.observed.get(&uid) {
            if committed_in + 1 == term && *seedhash != reveal.seedhash {
                return Err(VoteRejection::PriorCommitMismatch {
                    committed_in: *committed_in,
                });
            }
        }

        let bundle = self.fetch_bundle(uid, &reveal).await?;
        if bundle.seed != reveal.seed {
            return Err(VoteRejection::SeedMismatch {
                revealed: reveal.seed,
                shared: bundle.seed,
            });
        }
        if bundle.hash != hash_seed(bundle.seed) || bundle.hash != reveal.seedhash {
            return Err(VoteRejection::SeedHashMismatch);
        }
        let grouphash = hash_json(&bundle.groups)
            .map_err(|e| VoteRejection::MalformedArtifact(e.to_string()))?;
        if grouphash != reveal.grouphash {
            return Err(VoteRejection::GroupHashMismatch);
        }
        check_grouping(&bundle.groups, self.config.group_size)?;

        Ok(VoteRecord {
            uid,
            term,
            seed: reveal.seed,
            seedhash: reveal.seedhash,
            grouphash: reveal.grouphash,
            version: reveal.version,
            groups: bundle.groups,
        })
    }

    async fn fetch_bundle(&self, uid: Uid, reveal: &SeedReveal) -> Result<StateBundle, VoteRejection> {
        let data = self
            .artifacts
            .fetch_artifact(
                &state_artifact_name(uid),
                &state_artifact_key(reveal.term),
                &reveal.version,
            )
            .await
            .map_err(|e| VoteRejection::StoreUnavailable(format!("{e:#}")))?
            .ok_or_else(|| VoteRejection::ArtifactMissing {
                version: reveal.version.clone(),
            })?;
        serde_json::from_str(&data).map_err(|e| VoteRejection::MalformedArtifact(e.to_string()))
    }

    /// Reveals count only if they landed no later than the share-seed block
    /// of their term.
    fn within_commit_window(&self, block: u64) -> bool {
        block
            .checked_sub(self.config.origin_block)
            .is_some_and(|elapsed| {
                elapsed % self.config.blocks_per_term <= self.config.blocks_share_seed
            })
    }
}
