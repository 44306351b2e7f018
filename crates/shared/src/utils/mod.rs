pub mod hash;
pub mod signal;
