pub mod gateway;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::Notification;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Temporary passcodes on the apartment's smart lock.
#[async_trait]
pub trait LockService: Send + Sync {
    async fn deactivate_password_for_booking(&self, booking_id: i64) -> anyhow::Result<()>;

    async fn extend_password_for_booking(
        &self,
        booking_id: i64,
        new_end: DateTime<Utc>,
    ) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ChatService: Send + Sync {
    async fn open_scheduled_chats(&self) -> anyhow::Result<()>;

    async fn close_expired_chats(&self) -> anyhow::Result<()>;

    async fn activate_chat(&self, room_id: i64, user_id: i64) -> anyhow::Result<()>;
}

#[async_trait]
pub trait PaymentService: Send + Sync {
    /// `amount: None` refunds the full payment.
    async fn refund_payment(&self, payment_id: &str, amount: Option<i64>) -> anyhow::Result<()>;
}

/// Sends `notification` on a background task. Delivery failures are logged and
/// never reach the caller.
pub fn notify_in_background(notifier: &Arc<dyn Notifier>, notification: Notification) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&notification).await {
            tracing::warn!(
                error = %e,
                recipient = notification.recipient(),
                "notification delivery failed"
            );
        }
    });
}
