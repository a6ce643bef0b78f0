//! Time-driven task engine for the booking lifecycle.
//!
//! Three periodic activities run per instance:
//!
//! - **execution**: under the fleet-wide lease, pulls due tasks from the shared
//!   queue and runs them, deduplicated by their processed key
//! - **planning**: lock-free on every instance, derives future tasks from live
//!   bookings and writes the ones not yet processed into the queue
//! - **self-check**: repairs drift between booking rows and availability
//!   without going through the queue
//!
//! Delivery is at-least-once. Every task re-reads its booking and applies
//! status changes as compare-and-set, so duplicates and stale tasks are no-ops.

pub mod executor;
pub mod metrics;
pub mod planner;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::SchedulerConfig;
use crate::db::queries;
use crate::errors::{AppError, AppResult};
use crate::models::task::booking_dedup_keys;
use crate::models::{Booking, BookingStatus, Notification, Reminder, ScheduledTask, Task};
use crate::services::collaborators::notify_in_background;
use crate::services::coordination::{CoordinationStore, StoreError, StoreKeys};
use crate::state::AppState;

pub use executor::TaskOutcome;
pub use metrics::{MetricsSnapshot, SchedulerMetrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionTick {
    /// Another instance holds the execution lease.
    NotLeader,
    Ran { dispatched: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub instance_id: String,
    pub running: bool,
    pub queue_depth: usize,
    pub worker_capacity: usize,
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
}

#[derive(Clone)]
pub struct Scheduler {
    pub(crate) state: Arc<AppState>,
    pub(crate) store: Arc<dyn CoordinationStore>,
    pub(crate) keys: StoreKeys,
    pub(crate) config: SchedulerConfig,
    pub(crate) metrics: Arc<SchedulerMetrics>,
    instance_id: String,
    running: Arc<AtomicBool>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Scheduler {
    pub fn new(state: Arc<AppState>, store: Arc<dyn CoordinationStore>) -> Self {
        let config = state.config.scheduler.clone();
        let (shutdown, _) = watch::channel(false);

        Self {
            keys: StoreKeys::new(&config.key_prefix),
            state,
            store,
            config,
            metrics: Arc::new(SchedulerMetrics::default()),
            instance_id: uuid::Uuid::new_v4().to_string(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawns the execution, planning and self-check loops. A second call while
    /// running only logs.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!(instance_id = %self.instance_id, "scheduler already running");
            return;
        }
        self.shutdown.send_replace(false);

        let this = self.clone();
        self.spawn_loop("execution", self.config.execution_interval, move || {
            let this = this.clone();
            async move {
                if let Err(e) = this.run_execution_tick(Utc::now()).await {
                    tracing::warn!(error = %e, "execution tick failed");
                }
            }
        });

        let this = self.clone();
        self.spawn_loop("planning", self.config.planning_interval, move || {
            let this = this.clone();
            async move {
                if let Err(e) = this.run_planning_tick(Utc::now()).await {
                    tracing::warn!(error = %e, "planning tick failed");
                }
            }
        });

        let this = self.clone();
        self.spawn_loop("self_check", self.config.self_check_interval, move || {
            let this = this.clone();
            async move {
                match this.run_self_check(Utc::now()).await {
                    Ok(report) if report.corrections() > 0 => {
                        tracing::warn!(?report, "self-check corrected drift");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "self-check failed"),
                }
            }
        });

        tracing::info!(instance_id = %self.instance_id, "scheduler started");
    }

    /// Signals the loops to exit. In-flight tasks are not awaited.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);
        tracing::info!(instance_id = %self.instance_id, "scheduler stopping");
    }

    fn spawn_loop<F, Fut>(&self, name: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => tick().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!(loop_name = name, "scheduler loop stopped");
        });
    }

    /// One execution tick: take the lease, drain the due tasks and run them.
    pub async fn run_execution_tick(&self, now: DateTime<Utc>) -> AppResult<ExecutionTick> {
        let leased = self
            .store
            .try_acquire_lease(&self.keys.lease, &self.instance_id, self.config.lease_ttl)
            .await?;
        if !leased {
            tracing::debug!("execution lease held elsewhere, skipping tick");
            return Ok(ExecutionTick::NotLeader);
        }

        let raw = self
            .store
            .take_due(&self.keys.queue, now.timestamp())
            .await?;

        let mut tasks = Vec::with_capacity(raw.len());
        for member in raw {
            match ScheduledTask::decode(&member) {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    self.metrics.record_error();
                    tracing::error!(error = %e, member, "dropping undecodable task");
                }
            }
        }

        let dispatched = tasks.len();
        if dispatched > 0 {
            tracing::debug!(count = dispatched, "dispatching due tasks");
            self.dispatch(tasks, now).await;
        }

        Ok(ExecutionTick::Ran { dispatched })
    }

    /// One planning tick: enqueue every derived task whose key is not yet processed.
    pub async fn run_planning_tick(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let processed = self.store.processed(&self.keys.processed).await?;
        let limit = self.config.planning_batch_limit;

        let (approved, active) = {
            let conn = self.state.conn();
            let approved = queries::get_bookings_by_status(&conn, &[BookingStatus::Approved], limit)?;
            let active = queries::get_bookings_by_status(&conn, &[BookingStatus::Active], limit)?;
            (approved, active)
        };

        for (status, count) in [("approved", approved.len()), ("active", active.len())] {
            if count >= limit {
                tracing::warn!(status, limit, "planning batch truncated");
            }
        }

        let tasks: Vec<ScheduledTask> = approved
            .iter()
            .chain(active.iter())
            .flat_map(|booking| planner::plan_booking(booking, now))
            .chain(planner::plan_cleanup(now))
            .filter(|task| !processed.contains(&task.dedup_key()))
            .collect();

        for task in &tasks {
            self.enqueue(task).await?;
        }

        self.metrics.record_planned(tasks.len());
        tracing::debug!(
            bookings = approved.len() + active.len(),
            planned = tasks.len(),
            "planning tick finished"
        );
        Ok(tasks.len())
    }

    pub async fn enqueue(&self, task: &ScheduledTask) -> AppResult<()> {
        let member = task.encode().map_err(StoreError::from)?;
        self.store
            .schedule(&self.keys.queue, task.scheduled_at.timestamp(), &member)
            .await?;
        Ok(())
    }

    /// Drops every queued task for the booking and pre-marks all of its keys,
    /// so neither a late planner nor a tick that dequeued one but has not yet
    /// claimed it can run it.
    pub async fn remove_scheduled_tasks_for_booking(&self, booking_id: i64) -> AppResult<usize> {
        let removed = self
            .unschedule_matching(|task| task.booking_id() == Some(booking_id))
            .await?;

        self.store
            .mark_processed(
                &self.keys.processed,
                &booking_dedup_keys(booking_id),
                self.config.processed_ttl,
            )
            .await?;

        tracing::info!(booking_id, removed, "removed scheduled tasks for booking");
        Ok(removed)
    }

    /// Re-plans the end-of-stay tasks (completion, ending reminder, chat close)
    /// against `new_end`.
    pub async fn reschedule_completion_task(
        &self,
        booking_id: i64,
        new_end: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut booking = self
            .load_booking(booking_id)?
            .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;

        let removed = self
            .unschedule_matching(|task| {
                task.booking_id() == Some(booking_id) && is_end_anchored(task)
            })
            .await?;

        booking.end_date = new_end;
        booking.clear_extension();

        let mut tasks = planner::plan_end_tasks(&booking, Utc::now());
        tasks.push(ScheduledTask::new(Task::CompleteBooking { booking_id }, new_end));

        let keys: Vec<String> = tasks.iter().map(ScheduledTask::dedup_key).collect();
        self.store.unmark(&self.keys.processed, &keys).await?;
        for task in &tasks {
            self.enqueue(task).await?;
        }

        tracing::info!(booking_id, removed, %new_end, "rescheduled completion");
        Ok(())
    }

    async fn unschedule_matching<F>(&self, matches: F) -> AppResult<usize>
    where
        F: Fn(&Task) -> bool + Send + Sync,
    {
        let members = self.store.queued(&self.keys.queue).await?;
        let mut removed = 0;

        for member in members {
            let hit = ScheduledTask::decode(&member)
                .map(|scheduled| matches(&scheduled.task))
                .unwrap_or(false);
            if hit && self.store.unschedule(&self.keys.queue, &member).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn get_scheduler_stats(&self) -> AppResult<SchedulerStats> {
        let queue_depth = self.store.queue_depth(&self.keys.queue).await?;
        Ok(SchedulerStats {
            instance_id: self.instance_id.clone(),
            running: self.is_running(),
            queue_depth,
            worker_capacity: self.config.worker_capacity,
            metrics: self.metrics.snapshot(),
        })
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub(crate) fn load_booking(&self, booking_id: i64) -> AppResult<Option<Booking>> {
        let conn = self.state.conn();
        Ok(queries::get_booking_by_id(&conn, booking_id)?)
    }

    pub(crate) fn notify(&self, notification: Notification) {
        notify_in_background(&self.state.notifier, notification);
    }
}

fn is_end_anchored(task: &Task) -> bool {
    matches!(
        task,
        Task::CompleteBooking { .. }
            | Task::CloseChat { .. }
            | Task::SendReminder {
                reminder: Reminder::EndingSoon,
                ..
            }
    )
}
