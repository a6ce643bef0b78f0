use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use super::metrics::SchedulerMetrics;
use super::Scheduler;
use crate::db::queries;
use crate::errors::AppResult;
use crate::models::{Booking, BookingStatus, Notification, Reminder, ScheduledTask, Task};
use crate::services::availability;

/// What running one task amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Already processed, or the booking no longer matches the task.
    Skipped(&'static str),
    /// Re-enqueued for the given time; the claim on the dedup key is released.
    Deferred(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy)]
enum CleanupTarget {
    Bookings,
    Extensions,
}

/// Keeps the active-worker gauge honest even if a worker panics.
struct WorkerGuard(Arc<SchedulerMetrics>);

impl WorkerGuard {
    fn new(metrics: Arc<SchedulerMetrics>) -> Self {
        metrics.worker_started();
        Self(metrics)
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.0.worker_finished();
    }
}

impl Scheduler {
    /// Runs a due batch. Small batches run inline; larger ones are pulled from
    /// a shared intake by at most `worker_capacity` workers. Returns once every
    /// task has finished.
    pub(crate) async fn dispatch(&self, tasks: Vec<ScheduledTask>, now: DateTime<Utc>) {
        if tasks.len() <= self.config.sequential_threshold {
            for task in tasks {
                self.run_task(task, now).await;
            }
            return;
        }

        let workers = self.config.worker_capacity.clamp(1, tasks.len());
        let (tx, rx) = mpsc::channel(tasks.len());
        for task in tasks {
            // The channel is sized to the batch, so this never waits.
            if tx.send(task).await.is_err() {
                break;
            }
        }
        drop(tx);

        let intake = Arc::new(Mutex::new(rx));
        let mut pool = JoinSet::new();
        for _ in 0..workers {
            let this = self.clone();
            let intake = Arc::clone(&intake);
            pool.spawn(async move {
                let _guard = WorkerGuard::new(Arc::clone(&this.metrics));
                loop {
                    let next = intake.lock().await.recv().await;
                    let Some(task) = next else { break };
                    this.run_task(task, now).await;
                }
            });
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                self.metrics.record_error();
                tracing::error!(error = %e, "scheduler worker panicked");
            }
        }
    }

    async fn run_task(&self, task: ScheduledTask, now: DateTime<Utc>) {
        let key = task.dedup_key();
        match self.process_task(&task, now).await {
            Ok(TaskOutcome::Completed) => {
                self.metrics.record_processed();
                tracing::debug!(key, "task completed");
            }
            Ok(TaskOutcome::Skipped(reason)) => {
                self.metrics.record_skipped();
                tracing::debug!(key, reason, "task skipped");
            }
            Ok(TaskOutcome::Deferred(until)) => {
                self.metrics.record_deferred();
                tracing::info!(key, %until, "task deferred");
            }
            Err(e) => {
                self.metrics.record_error();
                tracing::error!(error = %e, key, "task failed");
            }
        }
    }

    /// Claim, execution, and recording of the key.
    ///
    /// The key is claimed atomically before any side effect, so a key
    /// pre-marked by cancellation turns a dequeued task into a no-op and two
    /// deliveries of one task never both run. Deferred and failed tasks give
    /// their claim back.
    pub async fn process_task(
        &self,
        task: &ScheduledTask,
        now: DateTime<Utc>,
    ) -> AppResult<TaskOutcome> {
        let key = task.dedup_key();
        if !self
            .store
            .claim(&self.keys.processed, &key, self.config.claim_ttl)
            .await?
        {
            return Ok(TaskOutcome::Skipped("already processed"));
        }

        let result = self.execute(&task.task, now).await;
        let finished = matches!(result, Ok(TaskOutcome::Completed | TaskOutcome::Skipped(_)));
        let keys = [key];
        if finished {
            self.store
                .mark_processed(&self.keys.processed, &keys, self.config.processed_ttl)
                .await?;
        } else if let Err(e) = self.store.unmark(&self.keys.processed, &keys).await {
            tracing::warn!(error = %e, key = %keys[0], "releasing task claim failed");
        }
        result
    }

    async fn execute(&self, task: &Task, now: DateTime<Utc>) -> AppResult<TaskOutcome> {
        match task {
            Task::ActivateBooking { booking_id } => self.activate_booking(*booking_id, now).await,
            Task::CompleteBooking { booking_id } => self.complete_booking(*booking_id, now).await,
            Task::SendReminder {
                booking_id,
                reminder,
            } => self.send_reminder(*booking_id, *reminder),
            Task::OpenChat { booking_id } => self.open_chats(*booking_id).await,
            Task::CloseChat { booking_id } => self.close_chats(*booking_id).await,
            Task::CleanupBookings { .. } => self.cleanup(CleanupTarget::Bookings, now).await,
            Task::CleanupExtensions { .. } => self.cleanup(CleanupTarget::Extensions, now).await,
        }
    }

    async fn activate_booking(&self, booking_id: i64, now: DateTime<Utc>) -> AppResult<TaskOutcome> {
        let Some(booking) = self.load_booking(booking_id)? else {
            return Ok(TaskOutcome::Skipped("booking not found"));
        };
        if booking.status != BookingStatus::Approved {
            return Ok(TaskOutcome::Skipped("booking is not approved"));
        }
        if booking.start_date > now {
            let task = ScheduledTask::new(Task::ActivateBooking { booking_id }, booking.start_date);
            self.enqueue(&task).await?;
            return Ok(TaskOutcome::Deferred(booking.start_date));
        }

        let (activated, owner_id) = {
            let conn = self.state.conn();
            let activated = queries::transition_status(
                &conn,
                booking_id,
                BookingStatus::Approved,
                BookingStatus::Active,
            )?;
            if activated {
                if let Err(e) = availability::recalculate(&conn, booking.apartment_id, now) {
                    tracing::warn!(error = %e, booking_id, "availability recalculation failed");
                }
            }
            (activated, queries::get_apartment_owner(&conn, booking.apartment_id)?)
        };
        if !activated {
            return Ok(TaskOutcome::Skipped("booking is not approved"));
        }

        tracing::info!(booking_id, apartment_id = booking.apartment_id, "booking activated");

        self.notify(Notification::BookingStarted {
            booking_id,
            user_id: booking.renter_id,
        });
        if let Some(owner_id) = owner_id {
            self.notify(Notification::BookingStarted {
                booking_id,
                user_id: owner_id,
            });
        }

        if let Some(room_id) = booking.chat_room_id {
            if let Err(e) = self.state.chats.activate_chat(room_id, booking.renter_id).await {
                tracing::warn!(error = %e, booking_id, room_id, "chat activation failed");
            }
        }

        Ok(TaskOutcome::Completed)
    }

    /// Completes an active booking once its stay is over, settling an
    /// undecided extension first. Shared by the complete task and the
    /// self-check.
    pub async fn complete_booking(
        &self,
        booking_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<TaskOutcome> {
        let Some(mut booking) = self.load_booking(booking_id)? else {
            return Ok(TaskOutcome::Skipped("booking not found"));
        };
        if booking.status != BookingStatus::Active {
            return Ok(TaskOutcome::Skipped("booking is not active"));
        }

        if booking.extension_requested {
            if let Some(deadline) = self.settle_pending_extension(&booking, now).await? {
                let task = ScheduledTask::new(Task::CompleteBooking { booking_id }, deadline);
                self.enqueue(&task).await?;
                return Ok(TaskOutcome::Deferred(deadline));
            }

            // Settling rewrote the extension fields.
            booking = match self.load_booking(booking_id)? {
                Some(b) if b.status == BookingStatus::Active => b,
                _ => return Ok(TaskOutcome::Skipped("booking is not active")),
            };
        }

        if booking.end_date > now {
            let task = ScheduledTask::new(Task::CompleteBooking { booking_id }, booking.end_date);
            self.enqueue(&task).await?;
            return Ok(TaskOutcome::Deferred(booking.end_date));
        }

        self.finish_completion(&booking, now).await
    }

    async fn finish_completion(&self, booking: &Booking, now: DateTime<Utc>) -> AppResult<TaskOutcome> {
        let booking_id = booking.id;
        let (completed, owner_id) = {
            let conn = self.state.conn();
            let completed = queries::complete_active_booking(&conn, booking_id)?;
            if completed {
                if let Err(e) = availability::recalculate(&conn, booking.apartment_id, now) {
                    tracing::warn!(error = %e, booking_id, "availability recalculation failed");
                }
            }
            (completed, queries::get_apartment_owner(&conn, booking.apartment_id)?)
        };
        if !completed {
            return Ok(TaskOutcome::Skipped("booking is not active"));
        }

        tracing::info!(booking_id, apartment_id = booking.apartment_id, "booking completed");

        if let Err(e) = self.state.locks.deactivate_password_for_booking(booking_id).await {
            tracing::warn!(error = %e, booking_id, "lock password deactivation failed");
        }

        self.notify(Notification::BookingCompleted {
            booking_id,
            user_id: booking.renter_id,
        });
        if let Some(owner_id) = owner_id {
            self.notify(Notification::BookingCompleted {
                booking_id,
                user_id: owner_id,
            });
        }

        Ok(TaskOutcome::Completed)
    }

    fn send_reminder(&self, booking_id: i64, reminder: Reminder) -> AppResult<TaskOutcome> {
        let Some(booking) = self.load_booking(booking_id)? else {
            return Ok(TaskOutcome::Skipped("booking not found"));
        };
        if !matches!(booking.status, BookingStatus::Approved | BookingStatus::Active) {
            return Ok(TaskOutcome::Skipped("booking is no longer live"));
        }

        let notification = match reminder {
            Reminder::StartingSoon => Notification::StartingSoon {
                booking_id,
                user_id: booking.renter_id,
                start_date: booking.start_date,
            },
            Reminder::EndingSoon => Notification::EndingSoon {
                booking_id,
                user_id: booking.renter_id,
                end_date: booking.end_date,
            },
        };
        self.notify(notification);
        Ok(TaskOutcome::Completed)
    }

    async fn open_chats(&self, booking_id: i64) -> AppResult<TaskOutcome> {
        let live = self
            .load_booking(booking_id)?
            .is_some_and(|b| matches!(b.status, BookingStatus::Approved | BookingStatus::Active));
        if !live {
            return Ok(TaskOutcome::Skipped("booking is no longer live"));
        }

        if let Err(e) = self.state.chats.open_scheduled_chats().await {
            tracing::warn!(error = %e, booking_id, "opening scheduled chats failed");
        }
        Ok(TaskOutcome::Completed)
    }

    async fn close_chats(&self, booking_id: i64) -> AppResult<TaskOutcome> {
        if let Err(e) = self.state.chats.close_expired_chats().await {
            tracing::warn!(error = %e, booking_id, "closing expired chats failed");
        }
        Ok(TaskOutcome::Completed)
    }

    async fn cleanup(&self, target: CleanupTarget, now: DateTime<Utc>) -> AppResult<TaskOutcome> {
        let cutoff = now - self.config.cleanup_retention;
        let batch = self.config.cleanup_batch_size;
        let mut removed = 0;

        for _ in 0..self.config.cleanup_max_rounds {
            let deleted = {
                let conn = self.state.conn();
                match target {
                    CleanupTarget::Bookings => queries::cleanup_expired_bookings(&conn, &cutoff, batch)?,
                    CleanupTarget::Extensions => {
                        queries::cleanup_expired_extensions(&conn, &cutoff, batch)?
                    }
                }
            };
            removed += deleted;
            if deleted < batch {
                break;
            }
            tokio::task::yield_now().await;
        }

        if removed > 0 {
            tracing::info!(?target, removed, "expired rows cleaned up");
        }
        Ok(TaskOutcome::Completed)
    }
}
