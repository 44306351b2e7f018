pub(crate) mod allowlist_updater;
