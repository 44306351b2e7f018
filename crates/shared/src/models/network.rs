use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Stable identifier of a neuron (worker or validator) in the network.
pub type Uid = u16;

/// Ordered worker uids benchmarked together.
pub type Group = Vec<Uid>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Neuron {
    pub uid: Uid,
    pub stake: f64,
    pub ip: IpAddr,
    pub port: u16,
}

impl Default for Neuron {
    fn default() -> Self {
        Self {
            uid: 0,
            stake: 0.0,
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

impl Neuron {
    pub fn endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn has_address(&self) -> bool {
        !self.ip.is_unspecified()
    }

    pub fn is_validator(&self, min_stake: f64) -> bool {
        self.stake >= min_stake
    }
}

/// Read-only view of the network's registered neurons.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NetworkSnapshot {
    pub block: u64,
    pub neurons: Vec<Neuron>,
}

impl NetworkSnapshot {
    pub fn neuron(&self, uid: Uid) -> Option<&Neuron> {
        self.neurons.iter().find(|n| n.uid == uid)
    }

    /// Validator uids in ascending order.
    pub fn validator_uids(&self, min_stake: f64) -> Vec<Uid> {
        let mut uids: Vec<Uid> = self
            .neurons
            .iter()
            .filter(|n| n.is_validator(min_stake))
            .map(|n| n.uid)
            .collect();
        uids.sort_unstable();
        uids
    }

    /// Workers that may be grouped: below the validator stake threshold and
    /// serving on a real address. Status is checked separately.
    pub fn worker_candidates(&self, min_stake: f64) -> Vec<&Neuron> {
        let mut workers: Vec<&Neuron> = self
            .neurons
            .iter()
            .filter(|n| !n.is_validator(min_stake) && n.has_address())
            .collect();
        workers.sort_by_key(|n| n.uid);
        workers
    }
}
