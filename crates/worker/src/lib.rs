mod api;
mod cli;
mod services;
mod state;
mod utils;

pub use cli::Cli;
pub use state::WorkerState;
pub use utils::logging::setup_logging;

pub type TaskHandles = std::sync::Arc<tokio::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>>;
