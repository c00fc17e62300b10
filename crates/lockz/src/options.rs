//! Locker configuration and validation

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use chrono::TimeDelta;
use lockz_store::MemoryStore;

use crate::error::{LockError, Result};

/// Store driver backing a locker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Driver {
    /// Consul agent over HTTP
    #[default]
    Consul,
    /// In-process `MemoryStore`
    Memory,
}

impl Driver {
    pub fn as_str(&self) -> &'static str {
        match self {
            Driver::Consul => "consul",
            Driver::Memory => "memory",
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Driver {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "consul" => Ok(Driver::Consul),
            "memory" | "mock" => Ok(Driver::Memory),
            _ => Err(LockError::NoDriverConfigured),
        }
    }
}

/// The commonly used configuration values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicOptions {
    pub driver: Driver,
    /// Store address as `ip:port`; empty uses the driver default
    pub address: String,
    /// Lifetime of the session; zero uses the 10s default
    pub session_ttl: TimeDelta,
    /// Interval between extensions; zero disables extension ticks
    pub extend_period: TimeDelta,
    /// Window after release during which the key cannot be re-acquired
    pub lock_delay: TimeDelta,
    /// Maximum number of extensions; zero or negative makes the lock non-extendable
    pub extend_limit: i64,
}

impl Default for BasicOptions {
    fn default() -> Self {
        Self {
            driver: Driver::Consul,
            address: String::new(),
            session_ttl: TimeDelta::zero(),
            extend_period: TimeDelta::zero(),
            lock_delay: TimeDelta::zero(),
            extend_limit: 0,
        }
    }
}

impl BasicOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_driver(mut self, driver: Driver) -> Self {
        self.driver = driver;
        self
    }

    pub fn with_address(mut self, address: &str) -> Self {
        self.address = address.to_string();
        self
    }

    pub fn with_session_ttl(mut self, ttl: TimeDelta) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn with_extend_period(mut self, period: TimeDelta) -> Self {
        self.extend_period = period;
        self
    }

    pub fn with_lock_delay(mut self, delay: TimeDelta) -> Self {
        self.lock_delay = delay;
        self
    }

    pub fn with_extend_limit(mut self, limit: i64) -> Self {
        self.extend_limit = limit;
        self
    }
}

/// Full option set for constructing a `Locker`
#[derive(Debug, Clone, Default)]
pub struct LockerOptions {
    pub basic: BasicOptions,
    /// Store handle used when `basic.driver` is `Driver::Memory`
    pub memory: Option<MemoryStore>,
}

impl LockerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_basic(mut self, basic: BasicOptions) -> Self {
        self.basic = basic;
        self
    }

    /// Attach an in-process store and select the memory driver
    pub fn with_memory(mut self, store: MemoryStore) -> Self {
        self.basic.driver = Driver::Memory;
        self.memory = Some(store);
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Validate basic options. The extend limit is not checked.
pub fn validate(opts: &BasicOptions) -> Result<()> {
    check_address(&opts.address)?;
    check_duration(opts.session_ttl).map_err(|_| LockError::SessionTTLFormat)?;
    check_duration(opts.extend_period).map_err(|_| LockError::ExtendPeriodFormat)?;
    check_duration(opts.lock_delay).map_err(|_| LockError::LockDelayFormat)?;
    Ok(())
}

/// Accepts an empty string or `ip:port` with a port in 1..=65535
pub fn check_address(address: &str) -> Result<()> {
    if address.is_empty() {
        return Ok(());
    }
    match address.parse::<SocketAddr>() {
        Ok(addr) if addr.port() != 0 => Ok(()),
        _ => Err(LockError::AddressFormat),
    }
}

pub fn check_duration(d: TimeDelta) -> Result<()> {
    if d < TimeDelta::zero() {
        return Err(LockError::NegativeDuration);
    }
    Ok(())
}
