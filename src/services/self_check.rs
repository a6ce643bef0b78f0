//! Periodic reconciliation of booking rows against apartment availability,
//! independent of the task queue.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::queries;
use crate::errors::AppResult;
use crate::services::availability;
use crate::services::scheduler::{Scheduler, TaskOutcome};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SelfCheckReport {
    /// Apartments flagged unavailable without a booking to back it.
    pub released_apartments: usize,
    /// Active bookings past their end that no task completed.
    pub completed_bookings: usize,
    /// Apartments flagged free while an active booking occupies them.
    pub occupied_apartments: usize,
}

impl SelfCheckReport {
    pub fn corrections(&self) -> usize {
        self.released_apartments + self.completed_bookings + self.occupied_apartments
    }
}

impl Scheduler {
    /// One reconciliation pass. Safe to run alongside the task path: every
    /// correction goes through the same compare-and-set writes.
    pub async fn run_self_check(&self, now: DateTime<Utc>) -> AppResult<SelfCheckReport> {
        let mut report = SelfCheckReport::default();

        report.released_apartments = {
            let conn = self.state.conn();
            let unavailable = queries::get_unavailable_apartment_ids(&conn)?;
            let mut released = 0;
            for apartment_id in unavailable {
                if availability::is_free(&conn, apartment_id, now)?
                    && queries::set_apartment_free(&conn, apartment_id, true)?
                {
                    released += 1;
                }
            }
            released
        };

        let overdue = {
            let conn = self.state.conn();
            let cutoff = now - self.config.missed_completion_tolerance;
            queries::get_overdue_active_bookings(&conn, &cutoff, self.config.planning_batch_limit)?
        };
        for booking in overdue {
            match self.complete_booking(booking.id, now).await {
                Ok(TaskOutcome::Completed) => {
                    tracing::warn!(booking_id = booking.id, "completed overdue booking");
                    report.completed_bookings += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, booking_id = booking.id, "overdue completion failed");
                }
            }
        }

        report.occupied_apartments = {
            let conn = self.state.conn();
            let stale = queries::get_free_apartments_with_active_booking(&conn)?;
            availability::recalculate_many(&conn, &stale, now)?
        };

        if report.corrections() > 0 {
            tracing::info!(?report, "self-check finished");
        }
        Ok(report)
    }
}
