//! Session lifecycle for a locker

use chrono::TimeDelta;
use lockz_store::{SessionBehavior, SessionEntry};
use tracing::{debug, warn};

use crate::error::{LockError, Result};
use crate::locker::Locker;

/// Name given to every session minted by a locker
pub const SESSION_NAME: &str = "consensusLockz";

pub const DEFAULT_SESSION_TTL: &str = "10s";

/// Format a TTL as whole seconds; zero falls back to the default.
/// A sub-second TTL rounds up to one second.
pub fn format_ttl(ttl: TimeDelta) -> String {
    if ttl <= TimeDelta::zero() {
        return DEFAULT_SESSION_TTL.to_string();
    }
    format!("{}s", ttl.num_seconds().max(1))
}

impl Locker {
    /// Mint a fresh session, destroying any session this handle already holds
    pub async fn new_session(&self) -> Result<String> {
        self.discard_session().await;

        let entry = SessionEntry {
            name: SESSION_NAME.to_string(),
            behavior: SessionBehavior::Delete,
            ttl: self.session_ttl().to_string(),
            lock_delay: self.lock_delay(),
        };
        let session_id = self.client().session_create(&entry).await?;
        *self.session_id.lock() = session_id.clone();

        debug!(session = %session_id, ttl = %entry.ttl, "session created");
        Ok(session_id)
    }

    /// Reset the TTL clock of the current session
    pub async fn renew_session(&self) -> Result<()> {
        let session_id = self.session_id();
        if session_id.is_empty() {
            return Err(LockError::LockReleased);
        }
        self.client().session_renew(&session_id).await?;
        debug!(session = %session_id, "session renewed");
        Ok(())
    }

    /// Destroy the current session. The local ID is cleared even when the
    /// store call fails.
    pub async fn destroy_session(&self) -> Result<()> {
        let session_id = std::mem::take(&mut *self.session_id.lock());
        if session_id.is_empty() {
            return Ok(());
        }
        self.client().session_destroy(&session_id).await?;
        debug!(session = %session_id, "session destroyed");
        Ok(())
    }

    /// Destroy during cleanup; failures are logged and left to TTL expiry
    pub(crate) async fn discard_session(&self) {
        if let Err(e) = self.destroy_session().await {
            warn!(error = %e, "failed to destroy session, it will expire by ttl");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{BasicOptions, LockerOptions};
    use lockz_store::{MemoryStore, Store, StoreError};

    fn locker(store: &MemoryStore) -> Locker {
        let opts = LockerOptions::new()
            .with_basic(BasicOptions::new().with_lock_delay(TimeDelta::seconds(2)))
            .with_memory(store.clone());
        Locker::new(opts).unwrap()
    }

    #[test]
    fn test_format_ttl() {
        assert_eq!(format_ttl(TimeDelta::zero()), "10s");
        assert_eq!(format_ttl(TimeDelta::seconds(15)), "15s");
        assert_eq!(format_ttl(TimeDelta::milliseconds(2500)), "2s");
        assert_eq!(format_ttl(TimeDelta::milliseconds(300)), "1s");
        assert_eq!(format_ttl(TimeDelta::minutes(2)), "120s");
    }

    #[tokio::test]
    async fn test_new_session_replaces_previous() {
        let store = MemoryStore::new();
        let locker = locker(&store);

        let first = locker.new_session().await.unwrap();
        assert_eq!(locker.session_id(), first);
        assert!(store.has_session(&first));

        let second = locker.new_session().await.unwrap();
        assert_ne!(first, second);
        assert!(!store.has_session(&first));
        assert!(store.has_session(&second));
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn test_destroy_session_clears_id() {
        let store = MemoryStore::new();
        let locker = locker(&store);

        let id = locker.new_session().await.unwrap();
        locker.destroy_session().await.unwrap();
        assert!(locker.session_id().is_empty());
        assert!(!store.has_session(&id));

        // idempotent
        locker.destroy_session().await.unwrap();
    }

    #[tokio::test]
    async fn test_renew_without_session() {
        let store = MemoryStore::new();
        let locker = locker(&store);
        assert!(matches!(
            locker.renew_session().await,
            Err(LockError::LockReleased)
        ));
    }

    #[tokio::test]
    async fn test_renew_forgotten_session() {
        let store = MemoryStore::new();
        let locker = locker(&store);
        let id = locker.new_session().await.unwrap();

        // Another party destroys the session behind the handle's back
        store.session_destroy(&id).await.unwrap();
        let err = locker.renew_session().await.unwrap_err();
        assert!(matches!(
            err,
            LockError::Store(StoreError::SessionNotFound(_))
        ));
    }
}
