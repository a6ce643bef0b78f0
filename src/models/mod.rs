pub mod apartment;
pub mod booking;
pub mod extension;
pub mod notification;
pub mod task;

pub use apartment::Apartment;
pub use booking::{Booking, BookingStatus, DoorStatus};
pub use extension::{BookingExtension, ExtensionStatus};
pub use notification::Notification;
pub use task::{Reminder, ScheduledTask, Task, TaskDecodeError, TaskKind};
