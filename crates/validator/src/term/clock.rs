use serde::Serialize;
use shared::protocol::TermConfig;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermTick {
    pub height: u64,
    pub term: u64,
    pub offset: u64,
    /// Set on the first observation and whenever the term index grows.
    pub rolled_over: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    BeforeOrigin { height: u64, origin: u64 },
    Regressed { previous: u64, current: u64 },
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockError::BeforeOrigin { height, origin } => {
                write!(f, "block height {height} is before the origin block {origin}")
            }
            ClockError::Regressed { previous, current } => {
                write!(f, "block height moved backwards from {previous} to {current}")
            }
        }
    }
}

impl std::error::Error for ClockError {}

/// Maps block heights onto terms. A height lower than one already observed
/// means the chain feed is broken and is reported as an error, never
/// smoothed over.
#[derive(Debug, Clone)]
pub struct TermClock {
    origin_block: u64,
    blocks_per_term: u64,
    last_height: Option<u64>,
    current_term: Option<u64>,
}

impl TermClock {
    pub fn new(config: &TermConfig) -> Self {
        Self {
            origin_block: config.origin_block,
            blocks_per_term: config.blocks_per_term,
            last_height: None,
            current_term: None,
        }
    }

    /// `(term, offset)` for `height`, without touching the clock.
    pub fn locate(&self, height: u64) -> Result<(u64, u64), ClockError> {
        let Some(elapsed) = height.checked_sub(self.origin_block) else {
            return Err(ClockError::BeforeOrigin {
                height,
                origin: self.origin_block,
            });
        };
        Ok((
            elapsed / self.blocks_per_term,
            elapsed % self.blocks_per_term,
        ))
    }

    pub fn advance(&mut self, height: u64) -> Result<TermTick, ClockError> {
        if let Some(previous) = self.last_height {
            if height < previous {
                return Err(ClockError::Regressed {
                    previous,
                    current: height,
                });
            }
        }
        let (term, offset) = self.locate(height)?;
        let rolled_over = self.current_term.map_or(true, |current| term > current);

        self.last_height = Some(height);
        self.current_term = Some(term);

        Ok(TermTick {
            height,
            term,
            offset,
            rolled_over,
        })
    }

    pub fn current_term(&self) -> Option<u64> {
        self.current_term
    }
}

/// The activity a term offset belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    ShareSeed,
    Vote,
    Benchmark,
    CommitSeedHash,
    SetWeights,
}

impl Phase {
    pub fn at(offset: u64, config: &TermConfig) -> Phase {
        if offset < config.blocks_share_seed {
            Phase::ShareSeed
        } else if offset < config.blocks_start_benchmark {
            Phase::Vote
        } else if offset < config.blocks_seedhash_start {
            Phase::Benchmark
        } else if offset < config.blocks_seedhash_end {
            Phase::CommitSeedHash
        } else {
            Phase::SetWeights
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::ShareSeed => "share_seed",
            Phase::Vote => "vote",
            Phase::Benchmark => "benchmark",
            Phase::CommitSeedHash => "commit_seedhash",
            Phase::SetWeights => "set_weights",
        }
    }

    /// Votes are still accepted on the block benchmarking starts.
    pub fn accepts_vote(offset: u64, config: &TermConfig) -> bool {
        offset >= config.blocks_share_seed && offset <= config.blocks_start_benchmark
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
