//! Paid stay extensions: request, payment, owner decision, and the grace
//! period that stops an undecided request from blocking completion.

use chrono::{DateTime, Duration, Utc};

use crate::db::queries;
use crate::errors::{AppError, AppResult};
use crate::models::{Booking, BookingExtension, BookingStatus, ExtensionStatus, Notification};
use crate::services::scheduler::Scheduler;

const GRACE_TIMEOUT_REASON: &str = "owner did not respond in time";

impl Scheduler {
    /// Opens an unpaid extension request on an active booking.
    pub fn request_extension(
        &self,
        booking_id: i64,
        duration_hours: i64,
        price: i64,
    ) -> AppResult<BookingExtension> {
        if duration_hours <= 0 {
            return Err(AppError::InvalidState(
                "extension must last at least one hour".into(),
            ));
        }

        let conn = self.state.conn();
        let booking = queries::get_booking_by_id(&conn, booking_id)?
            .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;
        if booking.status != BookingStatus::Active {
            return Err(AppError::InvalidState(format!(
                "booking {booking_id} is {}",
                booking.status.as_str()
            )));
        }

        let open = queries::get_extensions_by_booking(&conn, booking_id)?
            .into_iter()
            .any(|ext| ext.status.is_open());
        if open {
            return Err(AppError::InvalidState(format!(
                "booking {booking_id} already has an open extension request"
            )));
        }

        let mut ext = BookingExtension {
            id: 0,
            booking_id,
            duration_hours,
            price,
            status: ExtensionStatus::AwaitingPayment,
            payment_id: None,
            requested_at: Utc::now(),
            approved_at: None,
        };
        ext.id = queries::create_extension(&conn, &ext)?;

        tracing::info!(booking_id, extension_id = ext.id, duration_hours, "extension requested");
        Ok(ext)
    }

    /// Marks the extension paid and puts it in front of the owner. The grace
    /// period starts here.
    pub fn confirm_extension_payment(
        &self,
        extension_id: i64,
        payment_id: &str,
    ) -> AppResult<BookingExtension> {
        let (ext, owner_id, booking) = {
            let conn = self.state.conn();
            let mut ext = queries::get_extension_by_id(&conn, extension_id)?
                .ok_or_else(|| AppError::NotFound(format!("extension {extension_id}")))?;
            if ext.status != ExtensionStatus::AwaitingPayment {
                return Err(AppError::InvalidState(format!(
                    "extension {extension_id} is {}",
                    ext.status.as_str()
                )));
            }
            let booking = queries::get_booking_by_id(&conn, ext.booking_id)?
                .ok_or_else(|| AppError::NotFound(format!("booking {}", ext.booking_id)))?;

            ext.status = ExtensionStatus::Pending;
            ext.payment_id = Some(payment_id.to_string());
            ext.requested_at = Utc::now();
            if !queries::update_extension(&conn, &ext, ExtensionStatus::AwaitingPayment)? {
                return Err(AppError::InvalidState(format!(
                    "extension {extension_id} changed concurrently"
                )));
            }

            let extension_end = booking.end_date + Duration::hours(ext.duration_hours);
            if !queries::set_pending_extension(
                &conn,
                booking.id,
                &extension_end,
                ext.duration_hours,
                ext.price,
            )? {
                tracing::warn!(
                    booking_id = booking.id,
                    extension_id,
                    "booking left active before extension payment landed"
                );
            }

            let owner_id = queries::get_apartment_owner(&conn, booking.apartment_id)?;
            (ext, owner_id, booking)
        };

        tracing::info!(booking_id = booking.id, extension_id, "extension payment confirmed");

        if let Some(owner_id) = owner_id {
            self.notify(Notification::ExtensionRequested {
                booking_id: booking.id,
                user_id: owner_id,
                duration_hours: ext.duration_hours,
            });
        }
        Ok(ext)
    }

    /// Owner approval: moves the end date, extends the lock code and re-plans
    /// the end-of-stay tasks. Returns the new end.
    pub async fn approve_extension(&self, extension_id: i64) -> AppResult<DateTime<Utc>> {
        let (booking, new_end) = {
            let conn = self.state.conn();
            let mut ext = queries::get_extension_by_id(&conn, extension_id)?
                .ok_or_else(|| AppError::NotFound(format!("extension {extension_id}")))?;
            let booking = queries::get_booking_by_id(&conn, ext.booking_id)?
                .ok_or_else(|| AppError::NotFound(format!("booking {}", ext.booking_id)))?;
            if booking.status != BookingStatus::Active {
                return Err(AppError::InvalidState(format!(
                    "booking {} is {}",
                    booking.id,
                    booking.status.as_str()
                )));
            }

            ext.status = ExtensionStatus::Approved;
            ext.approved_at = Some(Utc::now());
            if !queries::update_extension(&conn, &ext, ExtensionStatus::Pending)? {
                return Err(AppError::InvalidState(format!(
                    "extension {extension_id} is no longer pending"
                )));
            }

            let new_end = booking.end_date + Duration::hours(ext.duration_hours);
            queries::apply_extension(&conn, booking.id, &new_end)?;
            (booking, new_end)
        };

        tracing::info!(booking_id = booking.id, extension_id, %new_end, "extension approved");

        if let Err(e) = self
            .state
            .locks
            .extend_password_for_booking(booking.id, new_end)
            .await
        {
            tracing::warn!(error = %e, booking_id = booking.id, "lock password extension failed");
        }

        self.reschedule_completion_task(booking.id, new_end).await?;

        self.notify(Notification::ExtensionApproved {
            booking_id: booking.id,
            user_id: booking.renter_id,
            new_end_date: new_end,
        });
        Ok(new_end)
    }

    /// Owner rejection: refunds the payment and restores the original end.
    pub async fn reject_extension(&self, extension_id: i64, reason: &str) -> AppResult<()> {
        let (booking, ext) = {
            let conn = self.state.conn();
            let mut ext = queries::get_extension_by_id(&conn, extension_id)?
                .ok_or_else(|| AppError::NotFound(format!("extension {extension_id}")))?;
            let booking = queries::get_booking_by_id(&conn, ext.booking_id)?
                .ok_or_else(|| AppError::NotFound(format!("booking {}", ext.booking_id)))?;

            ext.status = ExtensionStatus::Rejected;
            if !queries::update_extension(&conn, &ext, ExtensionStatus::Pending)? {
                return Err(AppError::InvalidState(format!(
                    "extension {extension_id} is no longer pending"
                )));
            }
            queries::clear_extension_fields(&conn, booking.id)?;
            (booking, ext)
        };

        tracing::info!(booking_id = booking.id, extension_id, reason, "extension rejected");

        self.refund_extension(&booking, &ext).await;
        if booking.status == BookingStatus::Active {
            self.reschedule_completion_task(booking.id, booking.end_date)
                .await?;
        }

        self.notify(Notification::ExtensionRejected {
            booking_id: booking.id,
            user_id: booking.renter_id,
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Resolves the extension flag on a booking whose completion is due.
    ///
    /// Returns the grace deadline while the owner can still decide. Past it,
    /// the request is force-rejected and refunded and `None` is returned so
    /// completion can proceed.
    pub(crate) async fn settle_pending_extension(
        &self,
        booking: &Booking,
        now: DateTime<Utc>,
    ) -> AppResult<Option<DateTime<Utc>>> {
        let pending = {
            let conn = self.state.conn();
            let pending = queries::get_extensions_by_booking(&conn, booking.id)?
                .into_iter()
                .find(|ext| ext.status == ExtensionStatus::Pending);
            if pending.is_none() {
                // Flag left behind by a request that was already decided.
                queries::clear_extension_fields(&conn, booking.id)?;
            }
            pending
        };
        let Some(mut ext) = pending else {
            return Ok(None);
        };

        let deadline = ext.requested_at + self.config.extension_grace;
        if now < deadline {
            return Ok(Some(deadline));
        }

        let rejected = {
            let conn = self.state.conn();
            ext.status = ExtensionStatus::Rejected;
            let rejected = queries::update_extension(&conn, &ext, ExtensionStatus::Pending)?;
            if rejected {
                queries::clear_extension_fields(&conn, booking.id)?;
            }
            rejected
        };
        if !rejected {
            // The owner decided between our read and write.
            return Ok(None);
        }

        tracing::warn!(
            booking_id = booking.id,
            extension_id = ext.id,
            "extension grace period elapsed, rejecting"
        );

        self.refund_extension(booking, &ext).await;
        self.notify(Notification::ExtensionRejected {
            booking_id: booking.id,
            user_id: booking.renter_id,
            reason: GRACE_TIMEOUT_REASON.to_string(),
        });
        Ok(None)
    }

    /// Refund failures are logged and swallowed.
    async fn refund_extension(&self, booking: &Booking, ext: &BookingExtension) {
        let Some(payment_id) = ext.payment_id.as_deref() else {
            return;
        };

        match self.state.payments.refund_payment(payment_id, None).await {
            Ok(()) => {
                tracing::info!(booking_id = booking.id, extension_id = ext.id, "extension refunded");
                self.notify(Notification::ExtensionRefunded {
                    booking_id: booking.id,
                    user_id: booking.renter_id,
                    amount: ext.price,
                });
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    booking_id = booking.id,
                    extension_id = ext.id,
                    payment_id,
                    "extension refund failed"
                );
            }
        }
    }
}
