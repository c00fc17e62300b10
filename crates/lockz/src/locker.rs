//! The local lock handle
//!
//! A `Locker` is one competitor's view of one lock key. It owns the store
//! client, the current session ID and the cancellation channel used by the
//! extension loop. Share it with the extension task through `Arc<Locker>`.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::TimeDelta;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use lockz_store::consul::DEFAULT_CONSUL_ADDRESS;
use lockz_store::{ConsulConfig, ConsulStore, Store};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::error::{LockError, Result};
use crate::options::{Driver, LockerOptions, check_address, validate};
use crate::session::format_ttl;

/// Consul clients shared across handles, keyed by agent address
static CONSUL_CLIENTS: LazyLock<DashMap<String, Arc<ConsulStore>>> = LazyLock::new(DashMap::new);

/// Coarse progress indicator, for observability only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LockerStatus {
    CheckedOptions = 1,
    AddressAltered,
    Initialized,
    BlockOnRelease,
    Competing,
    Locking,
    ExtendLimitReached,
}

impl LockerStatus {
    fn from_u32(value: u32) -> Self {
        match value {
            1 => LockerStatus::CheckedOptions,
            2 => LockerStatus::AddressAltered,
            4 => LockerStatus::BlockOnRelease,
            5 => LockerStatus::Competing,
            6 => LockerStatus::Locking,
            7 => LockerStatus::ExtendLimitReached,
            _ => LockerStatus::Initialized,
        }
    }
}

/// Sent by `cancel`; the extension loop acknowledges before tearing down
pub(crate) struct CancelRequest(pub(crate) oneshot::Sender<()>);

/// Distributed lock handle
pub struct Locker {
    client: RwLock<Arc<dyn Store>>,
    /// The only field the extension loop mutates
    pub(crate) session_id: Mutex<String>,
    session_ttl: String,
    pub(crate) cancel_tx: mpsc::Sender<CancelRequest>,
    pub(crate) cancel_rx: tokio::sync::Mutex<mpsc::Receiver<CancelRequest>>,
    reestablish: AtomicBool,
    status: AtomicU32,
    opts: RwLock<LockerOptions>,
}

impl fmt::Debug for Locker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locker")
            .field("session_id", &*self.session_id.lock())
            .field("session_ttl", &self.session_ttl)
            .field("status", &self.status())
            .finish()
    }
}

impl Locker {
    /// Validate options, derive the session TTL and build the store client
    pub fn new(opts: LockerOptions) -> Result<Self> {
        validate(&opts.basic)?;
        let status = AtomicU32::new(LockerStatus::CheckedOptions as u32);

        let client = build_client(&opts)?;
        let session_ttl = format_ttl(opts.basic.session_ttl);
        let (cancel_tx, cancel_rx) = mpsc::channel(1);

        debug!(
            driver = %opts.basic.driver,
            address = %opts.basic.address,
            ttl = %session_ttl,
            "locker initialized"
        );
        status.store(LockerStatus::Initialized as u32, Ordering::Release);

        Ok(Self {
            client: RwLock::new(client),
            session_id: Mutex::new(String::new()),
            session_ttl,
            cancel_tx,
            cancel_rx: tokio::sync::Mutex::new(cancel_rx),
            reestablish: AtomicBool::new(false),
            status,
            opts: RwLock::new(opts),
        })
    }

    /// Point the handle at a new store address. The client is rebuilt at the
    /// start of the next `lock`.
    pub fn alter_client(&self, address: &str) -> Result<()> {
        check_address(address)?;
        self.opts.write().basic.address = address.to_string();
        self.reestablish.store(true, Ordering::Release);
        self.set_status(LockerStatus::AddressAltered);
        info!(address, "store address altered");
        Ok(())
    }

    pub(crate) fn reestablish_if_needed(&self) -> Result<()> {
        if !self.reestablish.load(Ordering::Acquire) {
            return Ok(());
        }
        let client = build_client(&self.opts.read())?;
        *self.client.write() = client;
        self.reestablish.store(false, Ordering::Release);
        debug!("store client re-established");
        Ok(())
    }

    // ============== Accessors ==============

    pub fn session_id(&self) -> String {
        self.session_id.lock().clone()
    }

    pub fn session_ttl(&self) -> &str {
        &self.session_ttl
    }

    pub fn status(&self) -> LockerStatus {
        LockerStatus::from_u32(self.status.load(Ordering::Acquire))
    }

    pub fn options(&self) -> LockerOptions {
        self.opts.read().clone()
    }

    pub fn needs_reestablish(&self) -> bool {
        self.reestablish.load(Ordering::Acquire)
    }

    pub(crate) fn set_status(&self, status: LockerStatus) {
        self.status.store(status as u32, Ordering::Release);
    }

    pub(crate) fn client(&self) -> Arc<dyn Store> {
        self.client.read().clone()
    }

    pub(crate) fn extend_limit(&self) -> i64 {
        self.opts.read().basic.extend_limit
    }

    pub(crate) fn lock_delay(&self) -> Duration {
        self.opts.read().basic.lock_delay.to_std().unwrap_or_default()
    }

    /// `None` when extension ticks are disabled
    pub(crate) fn extend_period(&self) -> Option<Duration> {
        let period: TimeDelta = self.opts.read().basic.extend_period;
        period.to_std().ok().filter(|p| !p.is_zero())
    }
}

fn build_client(opts: &LockerOptions) -> Result<Arc<dyn Store>> {
    match opts.basic.driver {
        Driver::Memory => {
            let store = opts.memory.clone().ok_or(LockError::NoDriverConfigured)?;
            Ok(Arc::new(store))
        }
        Driver::Consul => {
            let address = if opts.basic.address.is_empty() {
                DEFAULT_CONSUL_ADDRESS
            } else {
                opts.basic.address.as_str()
            };
            // The shard lock held by the entry guards client creation only
            let store = match CONSUL_CLIENTS.entry(address.to_string()) {
                Entry::Occupied(entry) => entry.get().clone(),
                Entry::Vacant(entry) => {
                    let store = Arc::new(ConsulStore::new(ConsulConfig::new(address))?);
                    debug!(address, "consul client created");
                    entry.insert(store).clone()
                }
            };
            Ok(store)
        }
    }
}
