pub mod artifacts;
pub mod ledger;
pub mod models;
pub mod network;
pub mod protocol;
pub mod utils;
