use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crate::config::AppConfig;
use crate::services::collaborators::{ChatService, LockService, Notifier, PaymentService};

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub notifier: Arc<dyn Notifier>,
    pub locks: Arc<dyn LockService>,
    pub chats: Arc<dyn ChatService>,
    pub payments: Arc<dyn PaymentService>,
}

impl AppState {
    /// Locks the booking store, recovering the guard if a previous holder panicked.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
