use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingExtension {
    pub id: i64,
    pub booking_id: i64,
    pub duration_hours: i64,
    /// Minor currency units.
    pub price: i64,
    pub status: ExtensionStatus,
    pub payment_id: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionStatus {
    AwaitingPayment,
    Pending,
    Approved,
    Rejected,
}

impl ExtensionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionStatus::AwaitingPayment => "awaiting_payment",
            ExtensionStatus::Pending => "pending",
            ExtensionStatus::Approved => "approved",
            ExtensionStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => ExtensionStatus::Pending,
            "approved" => ExtensionStatus::Approved,
            "rejected" => ExtensionStatus::Rejected,
            _ => ExtensionStatus::AwaitingPayment,
        }
    }

    /// Open requests block a second request on the same booking.
    pub fn is_open(&self) -> bool {
        matches!(self, ExtensionStatus::AwaitingPayment | ExtensionStatus::Pending)
    }
}
