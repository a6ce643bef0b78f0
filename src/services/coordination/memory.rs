//! In-process coordination store.
//!
//! Same semantics as [`super::RedisStore`] within a single process: used by the
//! test suite and by single-node development runs. Not shared across processes.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{CoordinationStore, StoreError, StoreResult};

/// Members with their own expiry, like a sorted set scored by expiry time.
#[derive(Debug, Default)]
struct ExpiringSet {
    members: HashMap<String, Instant>,
}

impl ExpiringSet {
    fn prune(&mut self, now: Instant) {
        self.members.retain(|_, expires_at| *expires_at > now);
    }
}

#[derive(Debug)]
struct Lease {
    holder: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    queues: HashMap<String, HashMap<String, i64>>,
    sets: HashMap<String, ExpiringSet>,
    leases: HashMap<String, Lease>,
}

impl Inner {
    fn live_set(&mut self, name: &str) -> &mut ExpiringSet {
        let set = self.sets.entry(name.to_string()).or_default();
        set.prune(Instant::now());
        set
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

fn poison_err<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Poisoned
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holder of a live lease, if any.
    pub fn lease_holder(&self, key: &str) -> StoreResult<Option<String>> {
        let inner = self.inner.lock().map_err(poison_err)?;
        let now = Instant::now();
        Ok(inner
            .leases
            .get(key)
            .filter(|lease| lease.expires_at > now)
            .map(|lease| lease.holder.clone()))
    }
}

fn sorted_by_score(queue: &HashMap<String, i64>, max_score: Option<i64>) -> Vec<String> {
    let mut entries: Vec<(&String, &i64)> = queue
        .iter()
        .filter(|(_, score)| max_score.map_or(true, |max| **score <= max))
        .collect();
    entries.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));
    entries.into_iter().map(|(member, _)| member.clone()).collect()
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn schedule(&self, queue: &str, score: i64, member: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().map_err(poison_err)?;
        inner
            .queues
            .entry(queue.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn take_due(&self, queue: &str, max_score: i64) -> StoreResult<Vec<String>> {
        let mut inner = self.inner.lock().map_err(poison_err)?;
        let Some(entries) = inner.queues.get_mut(queue) else {
            return Ok(vec![]);
        };

        let due = sorted_by_score(entries, Some(max_score));
        for member in &due {
            entries.remove(member);
        }
        Ok(due)
    }

    async fn queued(&self, queue: &str) -> StoreResult<Vec<String>> {
        let inner = self.inner.lock().map_err(poison_err)?;
        Ok(inner
            .queues
            .get(queue)
            .map(|entries| sorted_by_score(entries, None))
            .unwrap_or_default())
    }

    async fn unschedule(&self, queue: &str, member: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().map_err(poison_err)?;
        Ok(inner
            .queues
            .get_mut(queue)
            .is_some_and(|entries| entries.remove(member).is_some()))
    }

    async fn queue_depth(&self, queue: &str) -> StoreResult<usize> {
        let inner = self.inner.lock().map_err(poison_err)?;
        Ok(inner.queues.get(queue).map_or(0, HashMap::len))
    }

    async fn is_processed(&self, set: &str, key: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().map_err(poison_err)?;
        Ok(inner.live_set(set).members.contains_key(key))
    }

    async fn claim(&self, set: &str, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut inner = self.inner.lock().map_err(poison_err)?;
        let set = inner.live_set(set);
        if set.members.contains_key(key) {
            return Ok(false);
        }
        set.members.insert(key.to_string(), Instant::now() + ttl);
        Ok(true)
    }

    async fn processed(&self, set: &str) -> StoreResult<HashSet<String>> {
        let mut inner = self.inner.lock().map_err(poison_err)?;
        Ok(inner.live_set(set).members.keys().cloned().collect())
    }

    async fn mark_processed(&self, set: &str, keys: &[String], ttl: Duration) -> StoreResult<()> {
        let mut inner = self.inner.lock().map_err(poison_err)?;
        let expires_at = Instant::now() + ttl;
        let set = inner.live_set(set);
        for key in keys {
            set.members.insert(key.clone(), expires_at);
        }
        Ok(())
    }

    async fn unmark(&self, set: &str, keys: &[String]) -> StoreResult<()> {
        let mut inner = self.inner.lock().map_err(poison_err)?;
        let set = inner.live_set(set);
        for key in keys {
            set.members.remove(key);
        }
        Ok(())
    }

    async fn try_acquire_lease(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().map_err(poison_err)?;
        let now = Instant::now();

        if let Some(lease) = inner.leases.get(key) {
            if lease.expires_at > now && lease.holder != holder {
                return Ok(false);
            }
        }

        inner.leases.insert(
            key.to_string(),
            Lease {
                holder: holder.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUEUE: &str = "test:tasks";
    const SET: &str = "test:processed";

    #[tokio::test]
    async fn test_take_due_returns_only_due_members_in_order() {
        let store = MemoryStore::new();
        store.schedule(QUEUE, 30, "c").await.unwrap();
        store.schedule(QUEUE, 10, "a").await.unwrap();
        store.schedule(QUEUE, 20, "b").await.unwrap();
        store.schedule(QUEUE, 99, "later").await.unwrap();

        let due = store.take_due(QUEUE, 30).await.unwrap();
        assert_eq!(due, vec!["a", "b", "c"]);
        assert_eq!(store.queue_depth(QUEUE).await.unwrap(), 1);

        // A second fetch must not hand the same members out again.
        assert!(store.take_due(QUEUE, 30).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_same_member_overwrites_score() {
        let store = MemoryStore::new();
        store.schedule(QUEUE, 10, "task").await.unwrap();
        store.schedule(QUEUE, 50, "task").await.unwrap();

        assert_eq!(store.queue_depth(QUEUE).await.unwrap(), 1);
        assert!(store.take_due(QUEUE, 10).await.unwrap().is_empty());
        assert_eq!(store.take_due(QUEUE, 50).await.unwrap(), vec!["task"]);
    }

    #[tokio::test]
    async fn test_unschedule() {
        let store = MemoryStore::new();
        store.schedule(QUEUE, 10, "task").await.unwrap();
        assert!(store.unschedule(QUEUE, "task").await.unwrap());
        assert!(!store.unschedule(QUEUE, "task").await.unwrap());
        assert!(store.queued(QUEUE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_processed_set_membership_and_unmark() {
        let store = MemoryStore::new();
        let keys = vec!["a_1".to_string(), "b_1".to_string()];
        store
            .mark_processed(SET, &keys, Duration::from_secs(60))
            .await
            .unwrap();

        assert!(store.is_processed(SET, "a_1").await.unwrap());
        assert_eq!(store.processed(SET).await.unwrap().len(), 2);

        store.unmark(SET, &keys[..1]).await.unwrap();
        assert!(!store.is_processed(SET, "a_1").await.unwrap());
        assert!(store.is_processed(SET, "b_1").await.unwrap());
    }

    #[tokio::test]
    async fn test_processed_set_expires() {
        let store = MemoryStore::new();
        store
            .mark_processed(SET, &["k".to_string()], Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!store.is_processed(SET, "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_expire_individually() {
        let store = MemoryStore::new();
        store
            .mark_processed(SET, &["old".to_string()], Duration::from_millis(20))
            .await
            .unwrap();
        store
            .mark_processed(SET, &["new".to_string()], Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        // Marking "new" again must not have kept "old" alive.
        let live = store.processed(SET).await.unwrap();
        assert_eq!(live.len(), 1);
        assert!(live.contains("new"));
    }

    #[tokio::test]
    async fn test_claim_succeeds_once_per_live_key() {
        let store = MemoryStore::new();
        let ttl = Duration::from_millis(30);

        assert!(store.claim(SET, "activate_booking_1", ttl).await.unwrap());
        assert!(!store.claim(SET, "activate_booking_1", ttl).await.unwrap());
        assert!(store.claim(SET, "activate_booking_2", ttl).await.unwrap());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.claim(SET, "activate_booking_1", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_loses_to_premarked_key() {
        let store = MemoryStore::new();
        store
            .mark_processed(SET, &["close_chat_7".to_string()], Duration::from_secs(60))
            .await
            .unwrap();
        assert!(!store
            .claim(SET, "close_chat_7", Duration::from_secs(60))
            .await
            .unwrap());

        store.unmark(SET, &["close_chat_7".to_string()]).await.unwrap();
        assert!(store
            .claim(SET, "close_chat_7", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_lease_is_exclusive_until_expiry() {
        let store = MemoryStore::new();
        let ttl = Duration::from_millis(30);

        assert!(store.try_acquire_lease("lock", "a", ttl).await.unwrap());
        assert!(!store.try_acquire_lease("lock", "b", ttl).await.unwrap());
        assert_eq!(store.lease_holder("lock").unwrap().as_deref(), Some("a"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.try_acquire_lease("lock", "b", ttl).await.unwrap());
        assert_eq!(store.lease_holder("lock").unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_holder_renews_own_lease() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);

        assert!(store.try_acquire_lease("lock", "a", ttl).await.unwrap());
        assert!(store.try_acquire_lease("lock", "a", ttl).await.unwrap());
        assert!(!store.try_acquire_lease("lock", "b", ttl).await.unwrap());
    }
}
