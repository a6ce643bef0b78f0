use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub admin_token: String,
    pub gateway_url: String,
    pub gateway_api_key: String,
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "rental.db".to_string()),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            gateway_url: env::var("GATEWAY_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            gateway_api_key: env::var("GATEWAY_API_KEY").unwrap_or_default(),
            scheduler: SchedulerConfig::from_env(),
        }
    }
}

/// Tunables for the scheduler loops, the lease and the task catalog.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub execution_interval: Duration,
    pub planning_interval: Duration,
    pub self_check_interval: Duration,
    pub lease_ttl: Duration,
    /// Upper bound on concurrently executing tasks within one tick.
    pub worker_capacity: usize,
    /// Batches up to this size run sequentially instead of on the pool.
    pub sequential_threshold: usize,
    pub planning_batch_limit: usize,
    pub processed_ttl: Duration,
    /// How long a claimed task stays reserved before it finishes. A claim
    /// left by a crashed instance expires and the planner re-enqueues it.
    pub claim_ttl: Duration,
    pub key_prefix: String,
    pub cleanup_batch_size: usize,
    pub cleanup_max_rounds: usize,
    pub cleanup_retention: chrono::Duration,
    pub missed_completion_tolerance: chrono::Duration,
    pub extension_grace: chrono::Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            execution_interval: Duration::from_secs(30),
            planning_interval: Duration::from_secs(30),
            self_check_interval: Duration::from_secs(300),
            lease_ttl: Duration::from_secs(60),
            worker_capacity: 50,
            sequential_threshold: 3,
            planning_batch_limit: 500,
            processed_ttl: Duration::from_secs(48 * 3600),
            claim_ttl: Duration::from_secs(300),
            key_prefix: "booking_scheduler".to_string(),
            cleanup_batch_size: 100,
            cleanup_max_rounds: 10,
            cleanup_retention: chrono::Duration::hours(24),
            missed_completion_tolerance: chrono::Duration::minutes(10),
            extension_grace: chrono::Duration::minutes(30),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            execution_interval: secs_var("SCHEDULER_EXECUTION_INTERVAL_SECS")
                .unwrap_or(defaults.execution_interval),
            planning_interval: secs_var("SCHEDULER_PLANNING_INTERVAL_SECS")
                .unwrap_or(defaults.planning_interval),
            self_check_interval: secs_var("SCHEDULER_SELF_CHECK_INTERVAL_SECS")
                .unwrap_or(defaults.self_check_interval),
            lease_ttl: secs_var("SCHEDULER_LEASE_TTL_SECS").unwrap_or(defaults.lease_ttl),
            claim_ttl: secs_var("SCHEDULER_CLAIM_TTL_SECS").unwrap_or(defaults.claim_ttl),
            worker_capacity: usize_var("SCHEDULER_WORKERS").unwrap_or(defaults.worker_capacity),
            planning_batch_limit: usize_var("SCHEDULER_PLANNING_BATCH")
                .unwrap_or(defaults.planning_batch_limit),
            key_prefix: env::var("SCHEDULER_KEY_PREFIX").unwrap_or(defaults.key_prefix.clone()),
            cleanup_batch_size: usize_var("CLEANUP_BATCH_SIZE")
                .unwrap_or(defaults.cleanup_batch_size),
            ..defaults
        }
    }
}

fn secs_var(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v| *v > 0)
        .map(Duration::from_secs)
}

fn usize_var(name: &str) -> Option<usize> {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v| *v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_durations_fall_back_to_defaults() {
        env::set_var("RENTAL_TEST_ZERO_SECS", "0");
        env::set_var("RENTAL_TEST_SOME_SECS", "15");
        env::set_var("RENTAL_TEST_BAD_SECS", "soon");

        assert_eq!(secs_var("RENTAL_TEST_ZERO_SECS"), None);
        assert_eq!(secs_var("RENTAL_TEST_SOME_SECS"), Some(Duration::from_secs(15)));
        assert_eq!(secs_var("RENTAL_TEST_BAD_SECS"), None);
        assert_eq!(secs_var("RENTAL_TEST_UNSET_SECS"), None);
    }

    #[test]
    fn test_zero_counts_fall_back_to_defaults() {
        env::set_var("RENTAL_TEST_ZERO_COUNT", "0");
        env::set_var("RENTAL_TEST_SOME_COUNT", "8");

        assert_eq!(usize_var("RENTAL_TEST_ZERO_COUNT"), None);
        assert_eq!(usize_var("RENTAL_TEST_SOME_COUNT"), Some(8));
    }
}
