//! Shared helpers for lock protocol tests

use std::sync::Arc;

use lockz::{BasicOptions, Locker, LockerOptions, MemoryStore};
use tracing_subscriber::EnvFilter;

/// Install a test-scoped subscriber; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A locker backed by `store`
pub fn memory_locker(store: &MemoryStore, basic: BasicOptions) -> Arc<Locker> {
    let opts = LockerOptions::new()
        .with_basic(basic)
        .with_memory(store.clone());
    Arc::new(Locker::new(opts).unwrap())
}
