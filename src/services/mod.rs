pub mod availability;
pub mod bookings;
pub mod collaborators;
pub mod coordination;
pub mod extension;
pub mod scheduler;
pub mod self_check;
