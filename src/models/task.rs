use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ActivateBooking,
    CompleteBooking,
    SendReminder,
    OpenChat,
    CloseChat,
    CleanupBookings,
    CleanupExtensions,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::ActivateBooking => "activate_booking",
            TaskKind::CompleteBooking => "complete_booking",
            TaskKind::SendReminder => "send_reminder",
            TaskKind::OpenChat => "open_chat",
            TaskKind::CloseChat => "close_chat",
            TaskKind::CleanupBookings => "cleanup_bookings",
            TaskKind::CleanupExtensions => "cleanup_extensions",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reminder {
    StartingSoon,
    EndingSoon,
}

impl Reminder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reminder::StartingSoon => "starting_soon",
            Reminder::EndingSoon => "ending_soon",
        }
    }
}

/// A unit of future work, decoded once from the queue's JSON form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    ActivateBooking { booking_id: i64 },
    CompleteBooking { booking_id: i64 },
    SendReminder { booking_id: i64, reminder: Reminder },
    OpenChat { booking_id: i64 },
    CloseChat { booking_id: i64 },
    CleanupBookings { hour_bucket: String },
    CleanupExtensions { hour_bucket: String },
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Task::ActivateBooking { .. } => TaskKind::ActivateBooking,
            Task::CompleteBooking { .. } => TaskKind::CompleteBooking,
            Task::SendReminder { .. } => TaskKind::SendReminder,
            Task::OpenChat { .. } => TaskKind::OpenChat,
            Task::CloseChat { .. } => TaskKind::CloseChat,
            Task::CleanupBookings { .. } => TaskKind::CleanupBookings,
            Task::CleanupExtensions { .. } => TaskKind::CleanupExtensions,
        }
    }

    /// `None` for the fleet-wide cleanup tasks.
    pub fn booking_id(&self) -> Option<i64> {
        match self {
            Task::ActivateBooking { booking_id }
            | Task::CompleteBooking { booking_id }
            | Task::SendReminder { booking_id, .. }
            | Task::OpenChat { booking_id }
            | Task::CloseChat { booking_id } => Some(*booking_id),
            Task::CleanupBookings { .. } | Task::CleanupExtensions { .. } => None,
        }
    }

    /// Deterministic identity of the logical task. Two derivations of the
    /// same task always produce the same key.
    pub fn dedup_key(&self) -> String {
        let kind = self.kind().as_str();
        match self {
            Task::SendReminder {
                booking_id,
                reminder,
            } => format!("{kind}_{}_{booking_id}", reminder.as_str()),
            Task::CleanupBookings { hour_bucket } | Task::CleanupExtensions { hour_bucket } => {
                format!("{kind}_{hour_bucket}")
            }
            Task::ActivateBooking { booking_id }
            | Task::CompleteBooking { booking_id }
            | Task::OpenChat { booking_id }
            | Task::CloseChat { booking_id } => format!("{kind}_{booking_id}"),
        }
    }
}

/// Every key a booking-scoped task for `booking_id` can carry.
pub fn booking_dedup_keys(booking_id: i64) -> Vec<String> {
    [
        Task::ActivateBooking { booking_id },
        Task::CompleteBooking { booking_id },
        Task::SendReminder {
            booking_id,
            reminder: Reminder::StartingSoon,
        },
        Task::SendReminder {
            booking_id,
            reminder: Reminder::EndingSoon,
        },
        Task::OpenChat { booking_id },
        Task::CloseChat { booking_id },
    ]
    .iter()
    .map(Task::dedup_key)
    .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub task: Task,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum TaskDecodeError {
    #[error("malformed task payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{kind} task is missing `{field}`")]
    MissingField { kind: &'static str, field: &'static str },
}

/// Queue wire format: `{type, booking_id, data, scheduled_at}`.
#[derive(Serialize, Deserialize)]
struct WireTask {
    #[serde(rename = "type")]
    kind: TaskKind,
    booking_id: i64,
    #[serde(default)]
    data: Map<String, Value>,
    scheduled_at: DateTime<Utc>,
}

impl ScheduledTask {
    pub fn new(task: Task, scheduled_at: DateTime<Utc>) -> Self {
        Self { task, scheduled_at }
    }

    pub fn dedup_key(&self) -> String {
        self.task.dedup_key()
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let mut data = Map::new();
        match &self.task {
            Task::SendReminder { reminder, .. } => {
                data.insert("reminder".into(), serde_json::to_value(reminder)?);
            }
            Task::CleanupBookings { hour_bucket } | Task::CleanupExtensions { hour_bucket } => {
                data.insert("hour_bucket".into(), Value::String(hour_bucket.clone()));
            }
            _ => {}
        }

        serde_json::to_string(&WireTask {
            kind: self.task.kind(),
            booking_id: self.task.booking_id().unwrap_or(0),
            data,
            scheduled_at: self.scheduled_at,
        })
    }

    pub fn decode(raw: &str) -> Result<Self, TaskDecodeError> {
        let wire: WireTask = serde_json::from_str(raw)?;
        let booking_id = wire.booking_id;
        let hour_bucket = || {
            wire.data
                .get("hour_bucket")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or(TaskDecodeError::MissingField {
                    kind: wire.kind.as_str(),
                    field: "hour_bucket",
                })
        };

        let task = match wire.kind {
            TaskKind::ActivateBooking => Task::ActivateBooking { booking_id },
            TaskKind::CompleteBooking => Task::CompleteBooking { booking_id },
            TaskKind::OpenChat => Task::OpenChat { booking_id },
            TaskKind::CloseChat => Task::CloseChat { booking_id },
            TaskKind::SendReminder => {
                let reminder = wire
                    .data
                    .get("reminder")
                    .cloned()
                    .ok_or(TaskDecodeError::MissingField {
                        kind: "send_reminder",
                        field: "reminder",
                    })?;
                Task::SendReminder {
                    booking_id,
                    reminder: serde_json::from_value(reminder)?,
                }
            }
            TaskKind::CleanupBookings => Task::CleanupBookings {
                hour_bucket: hour_bucket()?,
            },
            TaskKind::CleanupExtensions => Task::CleanupExtensions {
                hour_bucket: hour_bucket()?,
            },
        };

        Ok(Self {
            task,
            scheduled_at: wire.scheduled_at,
        })
    }
}
