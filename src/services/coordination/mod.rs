//! Shared store the scheduler fleet coordinates through.
//!
//! Three primitives, mirroring the Redis commands the production backend uses:
//!
//! - a time-ordered queue (`ZADD` / `ZRANGEBYSCORE` + `ZREMRANGEBYSCORE` / `ZREM`)
//! - a processed-key set where every key carries its own expiry, kept as a
//!   sorted set scored by expiry time (`ZADD NX` / `ZSCORE` / `ZREMRANGEBYSCORE`)
//! - a lease (`SET NX EX`) that is never released explicitly and simply expires

pub mod memory;
pub mod redis_store;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("task codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Inserts `member` with `score` (unix seconds). Re-inserting the same member
    /// overwrites its score.
    async fn schedule(&self, queue: &str, score: i64, member: &str) -> StoreResult<()>;

    /// Fetches and removes every member with score <= `max_score` as one atomic step.
    async fn take_due(&self, queue: &str, max_score: i64) -> StoreResult<Vec<String>>;

    /// All members, due or not, ordered by score.
    async fn queued(&self, queue: &str) -> StoreResult<Vec<String>>;

    async fn unschedule(&self, queue: &str, member: &str) -> StoreResult<bool>;

    async fn queue_depth(&self, queue: &str) -> StoreResult<usize>;

    async fn is_processed(&self, set: &str, key: &str) -> StoreResult<bool>;

    /// Records `key` for `ttl` unless a live entry already exists. Returns
    /// whether this caller added it; check and insert are one atomic step.
    async fn claim(&self, set: &str, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Live keys only; expired entries are pruned on the way.
    async fn processed(&self, set: &str) -> StoreResult<HashSet<String>>;

    /// Records `keys`, each expiring `ttl` from now. Existing entries get the
    /// new expiry.
    async fn mark_processed(&self, set: &str, keys: &[String], ttl: Duration) -> StoreResult<()>;

    async fn unmark(&self, set: &str, keys: &[String]) -> StoreResult<()>;

    /// Claims `key` for `ttl` if nobody else holds it; the current holder
    /// refreshes its TTL. Fails fast, never blocks, and is never released.
    async fn try_acquire_lease(&self, key: &str, holder: &str, ttl: Duration)
        -> StoreResult<bool>;
}

/// Key names under a common prefix, so several deployments can share one Redis.
#[derive(Debug, Clone)]
pub struct StoreKeys {
    pub queue: String,
    pub processed: String,
    pub lease: String,
}

impl StoreKeys {
    pub fn new(prefix: &str) -> Self {
        Self {
            queue: format!("{prefix}:tasks"),
            processed: format!("{prefix}:processed"),
            lease: format!("{prefix}:lock"),
        }
    }
}
