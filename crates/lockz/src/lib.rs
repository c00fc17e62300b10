//! lockz - session-leased distributed lock
//!
//! A `Locker` competes for a key in a Consul-style KV store. Ownership is bound
//! to a TTL session, so a crashed holder releases the key when its session
//! expires. A holder keeps the lease alive with `extend`, which renews the
//! session and counts extensions up to a configured limit.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chrono::TimeDelta;
//! use lockz::{BasicOptions, Locker, LockerOptions};
//!
//! # async fn run() -> lockz::Result<()> {
//! let opts = LockerOptions::new().with_basic(
//!     BasicOptions::new()
//!         .with_address("127.0.0.1:8500")
//!         .with_session_ttl(TimeDelta::seconds(10))
//!         .with_extend_period(TimeDelta::seconds(3))
//!         .with_extend_limit(20),
//! );
//! let locker = Arc::new(Locker::new(opts)?);
//!
//! if locker.lock("jobs/nightly").await? {
//!     let daemon = {
//!         let locker = locker.clone();
//!         tokio::spawn(async move { locker.extend("jobs/nightly").await })
//!     };
//!     // ... work ...
//!     locker.cancel().await?;
//!     let _ = daemon.await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
mod extend;
mod lock;
pub mod locker;
pub mod options;
pub mod record;
pub mod session;

pub use error::{LockError, Result};
pub use locker::{Locker, LockerStatus};
pub use options::{BasicOptions, Driver, LockerOptions, validate};
pub use record::LockRecord;

pub use lockz_store::MemoryStore;
