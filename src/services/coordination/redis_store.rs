use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{CoordinationStore, StoreResult};

/// `SET NX EX`, or a TTL refresh when the caller already holds the lease.
const LEASE_SCRIPT: &str = r#"
if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'EX', ARGV[2]) then
    return 1
end
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn ttl_secs(ttl: Duration) -> i64 {
    ttl.as_secs().max(1) as i64
}

/// Coordination store backed by a shared Redis instance.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn schedule(&self, queue: &str, score: i64, member: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.zadd(queue, member, score).await?;
        Ok(())
    }

    async fn take_due(&self, queue: &str, max_score: i64) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();

        // MULTI/EXEC so two instances can never both read the same due member.
        let (due, _removed): (Vec<String>, i64) = redis::pipe()
            .atomic()
            .zrangebyscore(queue, "-inf", max_score)
            .zrembyscore(queue, "-inf", max_score)
            .query_async(&mut conn)
            .await?;

        Ok(due)
    }

    async fn queued(&self, queue: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.zrange(queue, 0, -1).await?;
        Ok(members)
    }

    async fn unschedule(&self, queue: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.zrem(queue, member).await?;
        Ok(removed > 0)
    }

    async fn queue_depth(&self, queue: &str) -> StoreResult<usize> {
        let mut conn = self.conn.clone();
        let depth: usize = conn.zcard(queue).await?;
        Ok(depth)
    }

    async fn is_processed(&self, set: &str, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let expires_at: Option<f64> = conn.zscore(set, key).await?;
        Ok(expires_at.is_some_and(|at| at > unix_now() as f64))
    }

    async fn claim(&self, set: &str, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let now = unix_now();
        let (_pruned, added): (i64, i64) = redis::pipe()
            .atomic()
            .zrembyscore(set, "-inf", now)
            .cmd("ZADD")
            .arg(set)
            .arg("NX")
            .arg(now + ttl_secs(ttl))
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(added == 1)
    }

    async fn processed(&self, set: &str) -> StoreResult<HashSet<String>> {
        let mut conn = self.conn.clone();
        let (_pruned, members): (i64, HashSet<String>) = redis::pipe()
            .atomic()
            .zrembyscore(set, "-inf", unix_now())
            .zrange(set, 0, -1)
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn mark_processed(&self, set: &str, keys: &[String], ttl: Duration) -> StoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.clone();
        let expires_at = unix_now() + ttl_secs(ttl);
        let items: Vec<(i64, &str)> = keys.iter().map(|key| (expires_at, key.as_str())).collect();
        let _: () = redis::pipe()
            .atomic()
            .zrembyscore(set, "-inf", unix_now())
            .ignore()
            .zadd_multiple(set, &items)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn unmark(&self, set: &str, keys: &[String]) -> StoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.clone();
        let _: () = conn.zrem(set, keys).await?;
        Ok(())
    }

    async fn try_acquire_lease(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let acquired: i64 = redis::Script::new(LEASE_SCRIPT)
            .key(key)
            .arg(holder)
            .arg(ttl_secs(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(acquired == 1)
    }
}
