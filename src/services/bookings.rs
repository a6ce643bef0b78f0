use chrono::Utc;

use crate::db::queries;
use crate::errors::{AppError, AppResult};
use crate::models::Notification;
use crate::services::availability;
use crate::services::scheduler::Scheduler;

impl Scheduler {
    /// Cancels a booking that has not finished yet.
    ///
    /// The status flips first, so an activation or completion that already
    /// claimed its task fails its own compare-and-set. The queued tasks are
    /// removed after that and their keys pre-marked.
    pub async fn cancel_booking(&self, booking_id: i64, reason: Option<&str>) -> AppResult<()> {
        let booking = self
            .load_booking(booking_id)?
            .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;
        if !booking.status.can_cancel() {
            return Err(AppError::InvalidState(format!(
                "booking {booking_id} is {}",
                booking.status.as_str()
            )));
        }

        let (canceled, owner_id) = {
            let conn = self.state.conn();
            let canceled = queries::cancel_booking(&conn, booking_id, reason)?;
            if canceled {
                if let Err(e) = availability::recalculate(&conn, booking.apartment_id, Utc::now()) {
                    tracing::warn!(error = %e, booking_id, "availability recalculation failed");
                }
            }
            (canceled, queries::get_apartment_owner(&conn, booking.apartment_id)?)
        };
        if !canceled {
            return Err(AppError::InvalidState(format!(
                "booking {booking_id} finished before it could be canceled"
            )));
        }

        self.remove_scheduled_tasks_for_booking(booking_id).await?;

        tracing::info!(booking_id, reason, "booking canceled");

        if let Err(e) = self.state.locks.deactivate_password_for_booking(booking_id).await {
            tracing::warn!(error = %e, booking_id, "lock password deactivation failed");
        }

        let reason = reason.map(str::to_string);
        self.notify(Notification::BookingCanceled {
            booking_id,
            user_id: booking.renter_id,
            reason: reason.clone(),
        });
        if let Some(owner_id) = owner_id {
            self.notify(Notification::BookingCanceled {
                booking_id,
                user_id: owner_id,
                reason,
            });
        }
        Ok(())
    }
}
