//! Background lease extension

use std::future;

use tokio::sync::oneshot;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::error::{LockError, Result};
use crate::locker::{CancelRequest, Locker, LockerStatus};

impl Locker {
    /// Keep a held lock alive: every extend period renew the session and bump
    /// the extend counter, until a step fails or `cancel` is called.
    ///
    /// Returns `Ok(())` after a cancel has torn the session down, or the
    /// error that stopped the loop.
    pub async fn extend(&self, key: &str) -> Result<()> {
        let mut cancel_rx = self.cancel_rx.lock().await;
        let mut ticker = self.extend_period().map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                _ = tick(&mut ticker) => {
                    if let Err(e) = self.extend_once(key).await {
                        warn!(key, error = %e, "lock extension stopped");
                        return Err(e);
                    }
                }
                request = cancel_rx.recv() => {
                    // The caller gave up waiting; this request predates the lease
                    if let Some(CancelRequest(ack)) = request
                        && ack.send(()).is_err()
                    {
                        debug!(key, "stale cancel request ignored");
                        continue;
                    }
                    self.discard_session().await;
                    self.set_status(LockerStatus::Initialized);
                    info!(key, "lock extension cancelled");
                    return Ok(());
                }
            }
        }
    }

    async fn extend_once(&self, key: &str) -> Result<()> {
        self.renew_session().await?;
        self.incr(key).await
    }

    /// Ask the running `extend` loop to stop. Waits until the loop has taken
    /// the request, so session teardown has begun when this returns.
    pub async fn cancel(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.cancel_tx.send(CancelRequest(ack_tx)).await.is_err() {
            return Err(LockError::LockReleased);
        }
        ack_rx.await.map_err(|_| LockError::LockReleased)
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => future::pending::<()>().await,
    }
}
