pub mod benchmark;
mod cli;
pub mod clustering;
pub mod commit_reveal;
mod handler;
mod metrics;
pub mod rewards;
mod store;
pub mod term;
mod validator;
pub mod vote;

pub use benchmark::probe::{HttpWorkerProber, WorkerProber};
pub use cli::Cli;
pub use metrics::export_metrics;
pub use metrics::MetricsContext;
pub use store::redis::RedisSeedStore;
pub use store::{MemorySeedStore, SeedStore};
pub use validator::{is_fatal, Validator, ValidatorHealth, ValidatorServices};
