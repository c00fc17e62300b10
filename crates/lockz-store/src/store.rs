//! The store capability set consumed by the lock protocol

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{KvPair, QueryMeta, QueryOptions, SessionEntry};

/// Consistent KV store with sessions, TTL expiry, session-bound CAS and blocking reads
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a key. With a non-zero `wait_index` the call blocks until the key
    /// changes past that index or the wait time runs out.
    async fn kv_get(
        &self,
        key: &str,
        opts: Option<&QueryOptions>,
    ) -> Result<(Option<KvPair>, QueryMeta)>;

    /// Plain write
    async fn kv_put(&self, pair: &KvPair) -> Result<bool>;

    /// Write bound to `pair.session`; `false` when another session holds the key
    async fn kv_acquire(&self, pair: &KvPair) -> Result<bool>;

    async fn kv_delete(&self, key: &str) -> Result<bool>;

    /// Delete `key` only while its modify index equals `modify_index`;
    /// `false` when the key has been written since
    async fn kv_delete_cas(&self, key: &str, modify_index: u64) -> Result<bool>;

    /// Create a session, returning its ID
    async fn session_create(&self, entry: &SessionEntry) -> Result<String>;

    /// Reset the TTL clock of a session
    async fn session_renew(&self, session_id: &str) -> Result<()>;

    /// Invalidate a session, applying its behavior to the keys it holds
    async fn session_destroy(&self, session_id: &str) -> Result<()>;
}
