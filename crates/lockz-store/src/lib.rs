//! lockz store - KV and session drivers
//!
//! This crate provides:
//! - The `Store` trait: the KV + session capability set the lock protocol consumes
//! - `ConsulStore`: HTTP driver for a Consul agent, with blocking queries
//! - `MemoryStore`: in-process driver with the same session, TTL, lock-delay
//!   and blocking-read semantics, used for tests and single-process setups

pub mod consul;
pub mod error;
pub mod memory;
pub mod model;
pub mod store;

pub use consul::{ConsulConfig, ConsulStore};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use model::*;
pub use store::Store;
