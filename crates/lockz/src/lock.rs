//! Lock acquisition, ownership checks and release

use lockz_store::{KvPair, QueryOptions};
use tracing::{debug, info};

use crate::error::{LockError, Result};
use crate::locker::{Locker, LockerStatus};
use crate::record::LockRecord;

impl Locker {
    /// Read the record at `key`. A missing key or a record without an owner
    /// yields `None`.
    pub async fn lock_record(&self, key: &str) -> Result<Option<LockRecord>> {
        let (pair, _) = self.client().kv_get(key, None).await?;
        decode_owned(pair)
    }

    /// Check that this handle owns `key` and may still extend it
    pub async fn lock_status(&self, key: &str) -> Result<LockRecord> {
        let record = self
            .lock_record(key)
            .await?
            .ok_or(LockError::LockReleased)?;

        // The extend limit wins over an ownership mismatch
        if record.limit_reached(self.extend_limit()) {
            return Err(LockError::CannotExtend);
        }
        if record.owner_session_id != self.session_id() {
            return Err(LockError::OccupiedByOther);
        }
        Ok(record)
    }

    /// Long-poll `key` until it is released. Returns `Ok(())` once the key is
    /// observed absent; transport errors end the wait.
    pub async fn block_on_released(&self, key: &str) -> Result<()> {
        self.set_status(LockerStatus::BlockOnRelease);
        let client = self.client();
        let mut query = QueryOptions::blocking(0);

        loop {
            let (pair, meta) = client.kv_get(key, Some(&query)).await?;
            if decode_owned(pair)?.is_none() {
                debug!(key, index = meta.last_index, "lock observed released");
                return Ok(());
            }
            query.wait_index = meta.last_index;
        }
    }

    /// One acquisition attempt. Waits for a contested key to be released,
    /// then competes for it with a fresh session. Returns `Ok(true)` right away
    /// if this handle already holds the key.
    pub async fn lock(&self, key: &str) -> Result<bool> {
        self.reestablish_if_needed()?;

        match self.lock_status(key).await {
            Ok(_) => {
                debug!(key, "lock already held by this handle");
                return Ok(true);
            }
            Err(LockError::OccupiedByOther | LockError::CannotExtend) => {
                self.block_on_released(key).await?;
            }
            Err(LockError::LockReleased) => {}
            Err(e) => return Err(e),
        }

        self.set_status(LockerStatus::Competing);
        self.new_session().await?;
        self.try_lock(key).await
    }

    /// Compete for `key` with the current session. A lost race destroys the
    /// session and returns `Ok(false)`.
    pub async fn try_lock(&self, key: &str) -> Result<bool> {
        let session_id = self.session_id();
        if session_id.is_empty() {
            return Ok(false);
        }

        let record = LockRecord::new(&session_id);
        let pair = KvPair::new(key, record.encode()?).with_session(&session_id);

        let acquired = match self.client().kv_acquire(&pair).await {
            Ok(acquired) => acquired,
            Err(e) => {
                self.discard_session().await;
                return Err(e.into());
            }
        };

        if !acquired {
            debug!(key, session = %session_id, "lost the acquire race");
            self.discard_session().await;
            return Ok(false);
        }

        self.set_status(LockerStatus::Locking);
        info!(key, session = %session_id, "lock acquired");
        Ok(true)
    }

    /// Release `key` if this handle owns it, then drop the session.
    ///
    /// The delete is conditional on the index of the record that passed the
    /// ownership check; a write in between sends it back to the check.
    pub async fn unlock(&self, key: &str) -> Result<bool> {
        let client = self.client();
        let session_id = loop {
            let (pair, _) = client.kv_get(key, None).await?;
            let modify_index = pair.as_ref().map_or(0, |pair| pair.modify_index);
            let record = decode_owned(pair)?.ok_or(LockError::LockReleased)?;

            let session_id = self.session_id();
            if session_id.is_empty() || record.owner_session_id != session_id {
                return Err(LockError::NoAuthorizationToDelete);
            }
            if client.kv_delete_cas(key, modify_index).await? {
                break session_id;
            }
            debug!(key, modify_index, "lock record changed before delete");
        };

        self.discard_session().await;
        self.set_status(LockerStatus::Initialized);
        info!(key, session = %session_id, "lock released");
        Ok(true)
    }

    /// Bump the extend counter of a held lock
    pub async fn incr(&self, key: &str) -> Result<()> {
        let client = self.client();
        let (pair, _) = client.kv_get(key, None).await?;
        let record = decode_owned(pair)?.ok_or(LockError::LockReleased)?;

        if record.limit_reached(self.extend_limit()) {
            self.set_status(LockerStatus::ExtendLimitReached);
            return Err(LockError::CannotExtend);
        }
        let session_id = self.session_id();
        if record.owner_session_id != session_id {
            return Err(LockError::OccupiedByOther);
        }

        let next = record.extended();
        let pair = KvPair::new(key, next.encode()?).with_session(&session_id);
        // Bound to the session, so an expired session cannot extend
        if !client.kv_acquire(&pair).await? {
            return Err(LockError::OccupiedByOther);
        }

        debug!(key, extend = next.extend_count, "lock extended");
        Ok(())
    }
}

fn decode_owned(pair: Option<KvPair>) -> Result<Option<LockRecord>> {
    let Some(pair) = pair else {
        return Ok(None);
    };
    let record = LockRecord::decode(&pair.value)?;
    Ok(record.is_owned().then_some(record))
}
