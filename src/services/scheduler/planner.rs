//! Derives the future tasks a booking needs from its current row.
//!
//! Pure functions of the booking and the clock: planning the same booking twice
//! yields the same tasks, which is what makes lock-free planning on every
//! instance safe.

use chrono::{DateTime, Duration, Timelike, Utc};

use crate::models::{Booking, BookingStatus, Reminder, ScheduledTask, Task};

const STARTING_REMINDER_LEAD_MINUTES: i64 = 60;
const OPEN_CHAT_LEAD_MINUTES: i64 = 15;
const CLOSE_CHAT_DELAY_HOURS: i64 = 24;
const CLEANUP_WINDOW_MINUTES: u32 = 5;

/// Lead time of the ending-soon reminder, scaled to the length of the stay.
pub fn ending_reminder_lead(stay: Duration) -> Duration {
    if stay >= Duration::hours(24) {
        Duration::hours(2)
    } else if stay >= Duration::hours(10) {
        Duration::hours(1)
    } else {
        Duration::minutes(30)
    }
}

/// Every task `booking` needs from now on. Reminders whose moment has already
/// passed are dropped; state transitions are always planned so a late planner
/// still catches up.
pub fn plan_booking(booking: &Booking, now: DateTime<Utc>) -> Vec<ScheduledTask> {
    let booking_id = booking.id;
    let mut tasks = Vec::new();

    match booking.status {
        BookingStatus::Approved => {
            tasks.push(ScheduledTask::new(
                Task::ActivateBooking { booking_id },
                booking.start_date,
            ));
            tasks.push(ScheduledTask::new(
                Task::OpenChat { booking_id },
                booking.start_date - Duration::minutes(OPEN_CHAT_LEAD_MINUTES),
            ));
        }
        BookingStatus::Active => {
            tasks.push(ScheduledTask::new(
                Task::CompleteBooking { booking_id },
                booking.effective_end(),
            ));
        }
        _ => return tasks,
    }

    let starting_at = booking.start_date - Duration::minutes(STARTING_REMINDER_LEAD_MINUTES);
    if starting_at > now {
        tasks.push(ScheduledTask::new(
            Task::SendReminder {
                booking_id,
                reminder: Reminder::StartingSoon,
            },
            starting_at,
        ));
    }

    tasks.extend(plan_end_tasks(booking, now));
    tasks
}

/// The subset of tasks anchored on the end of the stay.
pub fn plan_end_tasks(booking: &Booking, now: DateTime<Utc>) -> Vec<ScheduledTask> {
    let booking_id = booking.id;
    let end = booking.effective_end();
    let mut tasks = Vec::new();

    let ending_at = end - ending_reminder_lead(end - booking.start_date);
    if ending_at > now {
        tasks.push(ScheduledTask::new(
            Task::SendReminder {
                booking_id,
                reminder: Reminder::EndingSoon,
            },
            ending_at,
        ));
    }

    tasks.push(ScheduledTask::new(
        Task::CloseChat { booking_id },
        end + Duration::hours(CLOSE_CHAT_DELAY_HOURS),
    ));
    tasks
}

/// Cleanup tasks for the current even-hour bucket, during its first minutes only.
pub fn plan_cleanup(now: DateTime<Utc>) -> Vec<ScheduledTask> {
    if now.hour() % 2 != 0 || now.minute() >= CLEANUP_WINDOW_MINUTES {
        return Vec::new();
    }

    let hour_bucket = now.format("%Y%m%d%H").to_string();
    vec![
        ScheduledTask::new(
            Task::CleanupBookings {
                hour_bucket: hour_bucket.clone(),
            },
            now,
        ),
        ScheduledTask::new(Task::CleanupExtensions { hour_bucket }, now),
    ]
}
