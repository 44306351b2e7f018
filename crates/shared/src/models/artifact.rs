use crate::models::network::{Group, Uid};
use crate::utils::hash::{hash_json, hash_seed};
use serde::{Deserialize, Serialize};

pub fn state_artifact_name(uid: Uid) -> String {
    format!("state-{uid}")
}

pub fn state_artifact_key(term: u64) -> String {
    term.to_string()
}

pub fn benchmark_artifact_name(uid: Uid) -> String {
    format!("benchmark-{uid}")
}

pub fn benchmark_artifact_key(term: u64) -> String {
    format!("benchmark-{term}")
}

/// A validator's grouping proposal for a term, shared through the artifact
/// store before the seed reveal points at it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateBundle {
    pub term: u64,
    pub seed: u64,
    pub hash: String,
    pub groups: Vec<Group>,
    pub grouphash: String,
}

impl StateBundle {
    pub fn new(term: u64, seed: u64, groups: Vec<Group>) -> anyhow::Result<Self> {
        let grouphash = hash_json(&groups)?;
        Ok(Self {
            term,
            seed,
            hash: hash_seed(seed),
            groups,
            grouphash,
        })
    }
}
