pub(crate) mod worker_state;

pub use worker_state::WorkerState;
