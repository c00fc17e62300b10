//! The value stored at a lock key

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Lock record persisted as `{"session_id", "extend", "update_time"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    #[serde(rename = "session_id")]
    pub owner_session_id: String,
    #[serde(rename = "extend")]
    pub extend_count: u32,
    #[serde(rename = "update_time")]
    pub updated_at: DateTime<Utc>,
}

impl LockRecord {
    /// A fresh record for a newly acquired lock
    pub fn new(owner_session_id: &str) -> Self {
        Self {
            owner_session_id: owner_session_id.to_string(),
            extend_count: 0,
            updated_at: Utc::now(),
        }
    }

    /// The record after one more extension
    pub fn extended(&self) -> Self {
        Self {
            owner_session_id: self.owner_session_id.clone(),
            extend_count: self.extend_count.saturating_add(1),
            updated_at: Utc::now(),
        }
    }

    /// A record without an owner is treated as absent
    pub fn is_owned(&self) -> bool {
        !self.owner_session_id.is_empty()
    }

    /// Whether the extension budget is used up
    pub fn limit_reached(&self, extend_limit: i64) -> bool {
        i64::from(self.extend_count) >= extend_limit
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
