//! Store data models shared by every driver

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// KV Models
// ============================================================================

/// A key-value entry. `value` holds decoded bytes; drivers deal with wire encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Vec<u8>,
    /// Session currently holding the key, if any
    pub session: Option<String>,
    pub flags: u64,
    pub create_index: u64,
    pub modify_index: u64,
    /// Number of times the key has been acquired by a new session
    pub lock_index: u64,
}

impl KvPair {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    /// Bind the pair to a session (used by acquire)
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }
}

/// Options for blocking reads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Block until the index moves past this value; 0 returns immediately
    pub wait_index: u64,
    /// Upper bound on the block; `None` uses the driver default
    pub wait_time: Option<Duration>,
}

impl QueryOptions {
    pub fn blocking(wait_index: u64) -> Self {
        Self {
            wait_index,
            wait_time: None,
        }
    }
}

/// Metadata returned with every read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryMeta {
    /// Index to pass as `wait_index` on the next blocking read (never 0)
    pub last_index: u64,
}

// ============================================================================
// Session Models
// ============================================================================

/// What happens to held keys when a session is invalidated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBehavior {
    /// Clear the holder, keep the key
    #[default]
    Release,
    /// Delete the key
    Delete,
}

impl SessionBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionBehavior::Release => "release",
            SessionBehavior::Delete => "delete",
        }
    }
}

impl fmt::Display for SessionBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub name: String,
    pub behavior: SessionBehavior,
    /// TTL in Consul duration syntax, e.g. "10s"
    pub ttl: String,
    /// Window after invalidation during which held keys cannot be re-acquired
    pub lock_delay: Duration,
}

impl Default for SessionEntry {
    fn default() -> Self {
        Self {
            name: String::new(),
            behavior: SessionBehavior::Release,
            ttl: "10s".to_string(),
            lock_delay: Duration::from_secs(15),
        }
    }
}

// ============================================================================
// Duration helpers
// ============================================================================

/// Parse a Consul duration string ("15s", "1m", "1h", "500ms", "250us"; bare numbers are seconds)
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let (num_str, multiplier) = if let Some(stripped) = s.strip_suffix("ns") {
        (stripped, 1u64)
    } else if let Some(stripped) = s.strip_suffix("us") {
        (stripped, 1_000u64)
    } else if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, 1_000_000u64)
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, 1_000_000_000u64)
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, 60_000_000_000u64)
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, 3_600_000_000_000u64)
    } else {
        (s, 1_000_000_000u64)
    };

    let num: u64 = num_str.parse().ok()?;
    Some(Duration::from_nanos(num.checked_mul(multiplier)?))
}

/// Format a duration in Consul syntax, in the coarsest unit that loses nothing
pub fn format_duration(d: Duration) -> String {
    let nanos = d.subsec_nanos();
    if nanos == 0 {
        format!("{}s", d.as_secs())
    } else if nanos % 1_000_000 == 0 {
        format!("{}ms", d.as_millis())
    } else if nanos % 1_000 == 0 {
        format!("{}us", d.as_micros())
    } else {
        format!("{}ns", d.as_nanos())
    }
}
