use chrono::{DateTime, Utc};
use serde::Serialize;

/// Messages handed to the notification collaborator. Delivery is best-effort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    BookingStarted {
        booking_id: i64,
        user_id: i64,
    },
    BookingCompleted {
        booking_id: i64,
        user_id: i64,
    },
    BookingCanceled {
        booking_id: i64,
        user_id: i64,
        reason: Option<String>,
    },
    StartingSoon {
        booking_id: i64,
        user_id: i64,
        start_date: DateTime<Utc>,
    },
    EndingSoon {
        booking_id: i64,
        user_id: i64,
        end_date: DateTime<Utc>,
    },
    ExtensionRequested {
        booking_id: i64,
        user_id: i64,
        duration_hours: i64,
    },
    ExtensionApproved {
        booking_id: i64,
        user_id: i64,
        new_end_date: DateTime<Utc>,
    },
    ExtensionRejected {
        booking_id: i64,
        user_id: i64,
        reason: String,
    },
    ExtensionRefunded {
        booking_id: i64,
        user_id: i64,
        amount: i64,
    },
}

impl Notification {
    pub fn recipient(&self) -> i64 {
        match self {
            Notification::BookingStarted { user_id, .. }
            | Notification::BookingCompleted { user_id, .. }
            | Notification::BookingCanceled { user_id, .. }
            | Notification::StartingSoon { user_id, .. }
            | Notification::EndingSoon { user_id, .. }
            | Notification::ExtensionRequested { user_id, .. }
            | Notification::ExtensionApproved { user_id, .. }
            | Notification::ExtensionRejected { user_id, .. }
            | Notification::ExtensionRefunded { user_id, .. } => *user_id,
        }
    }
}
