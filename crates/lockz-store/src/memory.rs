//! In-memory store driver
//!
//! Mirrors the Consul semantics the lock protocol relies on: a global index that
//! bumps on every write, sessions with TTL and lock-delay, delete/release behavior
//! on invalidation, session-bound acquire and blocking reads.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::model::{
    KvPair, QueryMeta, QueryOptions, SessionBehavior, SessionEntry, parse_duration,
};
use crate::store::Store;

/// Default upper bound on a blocking read (Consul default)
const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(300);

struct StoredSession {
    entry: SessionEntry,
    ttl: Option<Duration>,
    deadline: Option<Instant>,
}

impl StoredSession {
    fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}

#[derive(Default)]
struct State {
    /// Global index counter
    index: u64,
    kv: HashMap<String, KvPair>,
    /// Index and time at which a missing key was deleted
    tombstones: HashMap<String, (u64, Instant)>,
    /// Highest index of a collected tombstone; missing keys report at least this
    tombstone_floor: u64,
    sessions: HashMap<String, StoredSession>,
    /// key -> instant until which acquire is refused
    lock_delays: HashMap<String, Instant>,
}

impl State {
    fn next_index(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    fn key_index(&self, key: &str) -> u64 {
        self.kv
            .get(key)
            .map(|pair| pair.modify_index)
            .or_else(|| self.tombstones.get(key).map(|(index, _)| *index))
            .unwrap_or(self.tombstone_floor)
    }

    fn remove_key(&mut self, key: &str, now: Instant) -> bool {
        if self.kv.remove(key).is_some() {
            let index = self.next_index();
            self.tombstones.insert(key.to_string(), (index, now));
            true
        } else {
            false
        }
    }

    /// Invalidate a session: apply its behavior to held keys and start lock-delay windows
    fn invalidate_session(&mut self, session_id: &str, now: Instant) -> bool {
        let Some(stored) = self.sessions.remove(session_id) else {
            return false;
        };

        let held: Vec<String> = self
            .kv
            .values()
            .filter(|pair| pair.session.as_deref() == Some(session_id))
            .map(|pair| pair.key.clone())
            .collect();

        for key in held {
            if !stored.entry.lock_delay.is_zero() {
                self.lock_delays
                    .insert(key.clone(), now + stored.entry.lock_delay);
            }
            match stored.entry.behavior {
                SessionBehavior::Delete => {
                    self.remove_key(&key, now);
                }
                SessionBehavior::Release => {
                    let index = self.next_index();
                    if let Some(pair) = self.kv.get_mut(&key) {
                        pair.session = None;
                        pair.modify_index = index;
                    }
                }
            }
        }

        self.next_index();
        debug!(session_id, "session invalidated");
        true
    }

    /// Drop finished lock-delay windows and tombstones older than `tombstone_ttl`.
    /// Returns whether any tombstone was collected.
    fn collect_garbage(&mut self, now: Instant, tombstone_ttl: Duration) -> bool {
        self.lock_delays.retain(|_, until| now < *until);

        let mut floor = self.tombstone_floor;
        self.tombstones.retain(|_, (index, deleted_at)| {
            if now.duration_since(*deleted_at) < tombstone_ttl {
                return true;
            }
            floor = floor.max(*index);
            false
        });
        let collected = floor != self.tombstone_floor;
        self.tombstone_floor = floor;
        collected
    }

    fn reap_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, stored)| stored.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            self.invalidate_session(&id, now);
        }
    }

    fn session_is_live(&self, session_id: &str, now: Instant) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|stored| !stored.is_expired(now))
    }
}

struct Inner {
    state: Mutex<State>,
    index_tx: watch::Sender<u64>,
    max_wait: Duration,
}

impl Inner {
    /// Publish the current index to blocked readers. Never called with `state` locked.
    fn notify(&self, index: u64) {
        self.index_tx.send_replace(index);
    }
}

/// In-memory KV + session store
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MemoryStore")
            .field("index", &state.index)
            .field("keys", &state.kv.len())
            .field("sessions", &state.sessions.len())
            .finish()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_max_wait(DEFAULT_MAX_WAIT)
    }

    /// Create a store whose blocking reads give up after `max_wait` by default
    pub fn with_max_wait(max_wait: Duration) -> Self {
        let (index_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                index_tx,
                max_wait,
            }),
        }
    }

    /// Current global index
    pub fn index(&self) -> u64 {
        self.inner.state.lock().index
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        let mut state = self.inner.state.lock();
        state.reap_expired(Instant::now());
        state.sessions.len()
    }

    /// Whether `session_id` names a live session
    pub fn has_session(&self, session_id: &str) -> bool {
        self.inner
            .state
            .lock()
            .session_is_live(session_id, Instant::now())
    }

    fn key_index(&self, key: &str) -> u64 {
        self.inner.state.lock().key_index(key)
    }

    /// Run a mutation under the state lock, then wake blocked readers
    fn mutate<T>(&self, f: impl FnOnce(&mut State, Instant) -> T) -> T {
        let (out, before, after, collected) = {
            let mut state = self.inner.state.lock();
            let before = state.index;
            let now = Instant::now();
            state.reap_expired(now);
            // Readers behind a collected tombstone now see the floor
            let collected = state.collect_garbage(now, self.inner.max_wait);
            let out = f(&mut state, now);
            (out, before, state.index, collected)
        };
        if after != before || collected {
            self.inner.notify(after);
        }
        out
    }

    async fn wait_for_change(&self, key: &str, target: u64, wait: Duration) {
        let mut rx = self.inner.index_tx.subscribe();
        let deadline = Instant::now() + wait;
        loop {
            // Mark the current version seen before checking, so a change racing
            // the check still wakes `changed()`.
            let _ = *rx.borrow_and_update();
            if self.key_index(key) > target {
                return;
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => continue,
                _ => return,
            }
        }
    }

    /// Expiry task for one session; re-arms whenever the session is renewed
    fn spawn_expiry(&self, session_id: String) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let deadline = {
                    let Some(inner) = weak.upgrade() else { return };
                    let state = inner.state.lock();
                    state.sessions.get(&session_id).and_then(|s| s.deadline)
                };
                let Some(deadline) = deadline else { return };

                tokio::time::sleep_until(deadline).await;

                let Some(inner) = weak.upgrade() else { return };
                let index = {
                    let mut state = inner.state.lock();
                    let now = Instant::now();
                    let expired = state
                        .sessions
                        .get(&session_id)
                        .map(|stored| stored.is_expired(now));
                    match expired {
                        None => return,
                        // Renewed while we slept
                        Some(false) => continue,
                        Some(true) => {
                            debug!(session_id = %session_id, "session ttl expired");
                            state.invalidate_session(&session_id, now);
                            state.index
                        }
                    }
                };
                inner.notify(index);
                return;
            }
        });
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn kv_get(
        &self,
        key: &str,
        opts: Option<&QueryOptions>,
    ) -> Result<(Option<KvPair>, QueryMeta)> {
        if let Some(query) = opts
            && query.wait_index > 0
        {
            let wait = query.wait_time.unwrap_or(self.inner.max_wait);
            self.wait_for_change(key, query.wait_index, wait).await;
        }

        let (pair, last_index) = self.mutate(|state, _| {
            let pair = state.kv.get(key).cloned();
            let key_index = state.key_index(key);
            let last_index = if key_index > 0 { key_index } else { state.index };
            (pair, last_index.max(1))
        });

        Ok((pair, QueryMeta { last_index }))
    }

    async fn kv_put(&self, pair: &KvPair) -> Result<bool> {
        Ok(self.mutate(|state, _| {
            let index = state.next_index();
            state.tombstones.remove(&pair.key);
            match state.kv.get_mut(&pair.key) {
                Some(existing) => {
                    existing.value = pair.value.clone();
                    existing.flags = pair.flags;
                    existing.modify_index = index;
                }
                None => {
                    state.kv.insert(
                        pair.key.clone(),
                        KvPair {
                            key: pair.key.clone(),
                            value: pair.value.clone(),
                            session: None,
                            flags: pair.flags,
                            create_index: index,
                            modify_index: index,
                            lock_index: 0,
                        },
                    );
                }
            }
            true
        }))
    }

    async fn kv_acquire(&self, pair: &KvPair) -> Result<bool> {
        let Some(session_id) = pair.session.clone() else {
            return Err(StoreError::SessionNotFound(String::new()));
        };

        self.mutate(|state, now| {
            if !state.session_is_live(&session_id, now) {
                return Err(StoreError::SessionNotFound(session_id.clone()));
            }

            if let Some(until) = state.lock_delays.get(&pair.key) {
                if now < *until {
                    debug!(key = %pair.key, "acquire refused inside lock-delay window");
                    return Ok(false);
                }
                state.lock_delays.remove(&pair.key);
            }

            let index = state.next_index();
            match state.kv.get_mut(&pair.key) {
                Some(existing) => match existing.session.as_deref() {
                    Some(holder) if holder != session_id => Ok(false),
                    Some(_) => {
                        existing.value = pair.value.clone();
                        existing.flags = pair.flags;
                        existing.modify_index = index;
                        Ok(true)
                    }
                    None => {
                        existing.value = pair.value.clone();
                        existing.flags = pair.flags;
                        existing.session = Some(session_id.clone());
                        existing.lock_index += 1;
                        existing.modify_index = index;
                        Ok(true)
                    }
                },
                None => {
                    state.tombstones.remove(&pair.key);
                    state.kv.insert(
                        pair.key.clone(),
                        KvPair {
                            key: pair.key.clone(),
                            value: pair.value.clone(),
                            session: Some(session_id.clone()),
                            flags: pair.flags,
                            create_index: index,
                            modify_index: index,
                            lock_index: 1,
                        },
                    );
                    Ok(true)
                }
            }
        })
    }

    async fn kv_delete(&self, key: &str) -> Result<bool> {
        self.mutate(|state, now| {
            state.remove_key(key, now);
        });
        Ok(true)
    }

    async fn kv_delete_cas(&self, key: &str, modify_index: u64) -> Result<bool> {
        Ok(self.mutate(|state, now| {
            let current = state.kv.get(key).map(|pair| pair.modify_index);
            match current {
                Some(index) if index == modify_index => state.remove_key(key, now),
                Some(_) => false,
                None => modify_index == 0,
            }
        }))
    }

    async fn session_create(&self, entry: &SessionEntry) -> Result<String> {
        let ttl = parse_duration(&entry.ttl)
            .ok_or_else(|| StoreError::InvalidTtl(entry.ttl.clone()))?;
        let ttl = (!ttl.is_zero()).then_some(ttl);
        let session_id = uuid::Uuid::new_v4().to_string();

        self.mutate(|state, now| {
            state.sessions.insert(
                session_id.clone(),
                StoredSession {
                    entry: entry.clone(),
                    ttl,
                    deadline: ttl.map(|ttl| now + ttl),
                },
            );
            state.next_index();
        });

        if ttl.is_some() {
            self.spawn_expiry(session_id.clone());
        }
        debug!(session_id = %session_id, ttl = %entry.ttl, "session created");
        Ok(session_id)
    }

    async fn session_renew(&self, session_id: &str) -> Result<()> {
        self.mutate(|state, now| match state.sessions.get_mut(session_id) {
            Some(stored) => {
                stored.deadline = stored.ttl.map(|ttl| now + ttl);
                Ok(())
            }
            None => Err(StoreError::SessionNotFound(session_id.to_string())),
        })
    }

    async fn session_destroy(&self, session_id: &str) -> Result<()> {
        self.mutate(|state, now| {
            state.invalidate_session(session_id, now);
        });
        Ok(())
    }
}
