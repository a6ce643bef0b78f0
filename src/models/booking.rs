use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub apartment_id: i64,
    pub renter_id: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: BookingStatus,
    pub extension_requested: bool,
    pub extension_end_date: Option<DateTime<Utc>>,
    pub extension_duration_hours: i64,
    /// Minor currency units.
    pub extension_price: i64,
    pub payment_id: Option<String>,
    pub cancellation_reason: Option<String>,
    pub door_status: DoorStatus,
    pub chat_room_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn duration(&self) -> Duration {
        self.end_date - self.start_date
    }

    /// End of the stay including an extension that has been paid but not yet decided.
    pub fn effective_end(&self) -> DateTime<Utc> {
        match (self.extension_requested, self.extension_end_date) {
            (true, Some(pending_end)) => pending_end.max(self.end_date),
            _ => self.end_date,
        }
    }

    pub fn clear_extension(&mut self) {
        self.extension_requested = false;
        self.extension_end_date = None;
        self.extension_duration_hours = 0;
        self.extension_price = 0;
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Created,
    AwaitingPayment,
    Pending,
    Approved,
    Active,
    Completed,
    Canceled,
    Rejected,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Created => "created",
            BookingStatus::AwaitingPayment => "awaiting_payment",
            BookingStatus::Pending => "pending",
            BookingStatus::Approved => "approved",
            BookingStatus::Active => "active",
            BookingStatus::Completed => "completed",
            BookingStatus::Canceled => "canceled",
            BookingStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "awaiting_payment" => BookingStatus::AwaitingPayment,
            "pending" => BookingStatus::Pending,
            "approved" => BookingStatus::Approved,
            "active" => BookingStatus::Active,
            "completed" => BookingStatus::Completed,
            "canceled" => BookingStatus::Canceled,
            "rejected" => BookingStatus::Rejected,
            _ => BookingStatus::Created,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Canceled | BookingStatus::Rejected
        )
    }

    /// `canceled` is reachable from every non-terminal state.
    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DoorStatus {
    Open,
    Closed,
}

impl DoorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoorStatus::Open => "open",
            DoorStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "open" => DoorStatus::Open,
            _ => DoorStatus::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn booking(start_h: u32, end_h: u32) -> Booking {
        let at = |h| Utc.with_ymd_and_hms(2026, 3, 10, h, 0, 0).unwrap();
        Booking {
            id: 1,
            apartment_id: 1,
            renter_id: 1,
            start_date: at(start_h),
            end_date: at(end_h),
            status: BookingStatus::Active,
            extension_requested: false,
            extension_end_date: None,
            extension_duration_hours: 0,
            extension_price: 0,
            payment_id: None,
            cancellation_reason: None,
            door_status: DoorStatus::Closed,
            chat_room_id: None,
            created_at: at(0),
            updated_at: at(0),
        }
    }

    #[test]
    fn test_status_round_trip_through_text() {
        for status in [
            BookingStatus::Created,
            BookingStatus::AwaitingPayment,
            BookingStatus::Pending,
            BookingStatus::Approved,
            BookingStatus::Active,
            BookingStatus::Completed,
            BookingStatus::Canceled,
            BookingStatus::Rejected,
        ] {
            assert_eq!(BookingStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_terminal_states_cannot_cancel() {
        assert!(BookingStatus::Active.can_cancel());
        assert!(BookingStatus::AwaitingPayment.can_cancel());
        assert!(!BookingStatus::Completed.can_cancel());
        assert!(!BookingStatus::Rejected.can_cancel());
    }

    #[test]
    fn test_effective_end_uses_pending_extension() {
        let mut b = booking(10, 12);
        assert_eq!(b.effective_end(), b.end_date);

        let extended = Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap();
        b.extension_requested = true;
        b.extension_end_date = Some(extended);
        assert_eq!(b.effective_end(), extended);

        b.clear_extension();
        assert_eq!(b.effective_end(), b.end_date);
        assert!(b.extension_end_date.is_none());
    }
}
