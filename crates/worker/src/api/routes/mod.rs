pub(crate) mod benchmark;
pub(crate) mod status;
