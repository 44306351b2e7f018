use crate::models::network::Group;
use crate::utils::hash::{hash_json, hash_seed};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A record a validator publishes to the ledger. Only the latest commitment
/// per validator is readable, so the two phases overwrite each other.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Commitment {
    /// Hash of the seed the validator will reveal in the next term. Also
    /// carries the version of the validator's benchmark artifact for the
    /// current term.
    SeedHash(SeedHashCommitment),
    /// Reveal of this term's seed, plus a pointer to the grouping proposal.
    Seed(SeedReveal),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedHashCommitment {
    pub term: u64,
    pub seedhash: String,
    #[serde(default)]
    pub benchmark_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedReveal {
    pub term: u64,
    pub seed: u64,
    pub seedhash: String,
    pub grouphash: String,
    /// Version handle of the `state-{uid}` artifact backing this reveal.
    pub version: String,
}

impl Commitment {
    pub fn seed_hash(term: u64, next_seed: u64, benchmark_version: Option<String>) -> Self {
        Commitment::SeedHash(SeedHashCommitment {
            term,
            seedhash: hash_seed(next_seed),
            benchmark_version,
        })
    }

    pub fn seed_reveal(
        term: u64,
        seed: u64,
        groups: &[Group],
        version: String,
    ) -> anyhow::Result<Self> {
        Ok(Commitment::Seed(SeedReveal {
            term,
            seed,
            seedhash: hash_seed(seed),
            grouphash: hash_json(&groups)?,
            version,
        }))
    }

    pub fn term(&self) -> u64 {
        match self {
            Commitment::SeedHash(c) => c.term,
            Commitment::Seed(c) => c.term,
        }
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Commitment::SeedHash(c) => write!(f, "seedhash(term={})", c.term),
            Commitment::Seed(c) => write!(f, "seed(term={}, version={})", c.term, c.version),
        }
    }
}

impl SeedReveal {
    /// The revealed seed hashes to the seed hash declared alongside it.
    pub fn is_self_consistent(&self) -> bool {
        hash_seed(self.seed) == self.seedhash
    }
}

/// A commitment as read back from the ledger, with the block it landed in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitmentRecord {
    pub block: u64,
    #[serde(flatten)]
    pub commitment: Commitment,
}
