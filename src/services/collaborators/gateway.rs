use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ChatService, LockService, Notifier, PaymentService};
use crate::models::Notification;

/// HTTP client for the platform services this engine drives: notifications,
/// smart locks, chat rooms and payments all sit behind one internal gateway.
pub struct HttpGateway {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> anyhow::Result<()> {
        let url = format!("{}{path}", self.base_url);

        self.client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("failed to reach gateway at {path}"))?
            .error_for_status()
            .with_context(|| format!("gateway returned error for {path}"))?;

        Ok(())
    }
}

#[async_trait]
impl Notifier for HttpGateway {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.post("/notifications", notification).await
    }
}

#[async_trait]
impl LockService for HttpGateway {
    async fn deactivate_password_for_booking(&self, booking_id: i64) -> anyhow::Result<()> {
        self.post(
            "/locks/passwords/deactivate",
            &serde_json::json!({ "booking_id": booking_id }),
        )
        .await
    }

    async fn extend_password_for_booking(
        &self,
        booking_id: i64,
        new_end: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.post(
            "/locks/passwords/extend",
            &serde_json::json!({ "booking_id": booking_id, "valid_until": new_end }),
        )
        .await
    }
}

#[async_trait]
impl ChatService for HttpGateway {
    async fn open_scheduled_chats(&self) -> anyhow::Result<()> {
        self.post("/chats/open-scheduled", &serde_json::json!({})).await
    }

    async fn close_expired_chats(&self) -> anyhow::Result<()> {
        self.post("/chats/close-expired", &serde_json::json!({})).await
    }

    async fn activate_chat(&self, room_id: i64, user_id: i64) -> anyhow::Result<()> {
        self.post(
            &format!("/chats/{room_id}/activate"),
            &serde_json::json!({ "user_id": user_id }),
        )
        .await
    }
}

#[async_trait]
impl PaymentService for HttpGateway {
    async fn refund_payment(&self, payment_id: &str, amount: Option<i64>) -> anyhow::Result<()> {
        self.post(
            "/payments/refunds",
            &serde_json::json!({ "payment_id": payment_id, "amount": amount }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let gateway = HttpGateway::new("http://gateway.local/".to_string(), String::new());
        assert_eq!(gateway.base_url, "http://gateway.local");
    }

    #[test]
    fn test_notification_body_is_tagged() {
        let body = serde_json::to_value(Notification::BookingCompleted {
            booking_id: 4,
            user_id: 9,
        })
        .unwrap();
        assert_eq!(body["event"], "booking_completed");
        assert_eq!(body["booking_id"], 4);
    }
}
