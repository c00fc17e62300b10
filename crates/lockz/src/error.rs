//! Lock error types

use lockz_store::StoreError;

/// Error type for the lock protocol
///
/// Protocol and validation kinds carry no payload so callers can match on them
/// directly; store and serialization failures are wrapped unchanged.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    // ============== Protocol ==============
    #[error("distributed lock error because the lease cannot be extended")]
    CannotExtend,

    #[error("distributed lock error because the lock was occupied by others")]
    OccupiedByOther,

    #[error("distributed lock error because the lock was released")]
    LockReleased,

    #[error("distributed lock error because no authorization to delete the lock")]
    NoAuthorizationToDelete,

    #[error("distributed lock error because no driver is configured")]
    NoDriverConfigured,

    // ============== Options ==============
    #[error("lock options error because ip and port string format are not correct")]
    AddressFormat,

    #[error("lock options error because the time duration is negative")]
    NegativeDuration,

    #[error("lock options error because the session ttl format is not correct")]
    SessionTTLFormat,

    #[error("lock options error because the extended period format is not correct")]
    ExtendPeriodFormat,

    #[error("lock options error because the lock delay format is not correct")]
    LockDelayFormat,

    // ============== Propagated ==============
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LockError>;
