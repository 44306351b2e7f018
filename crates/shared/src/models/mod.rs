pub mod api;
pub mod artifact;
pub mod benchmark;
pub mod commitment;
pub mod network;

pub use commitment::Commitment;
pub use commitment::CommitmentRecord;
pub use network::NetworkSnapshot;
