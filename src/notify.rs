use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Danger,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub id: Uuid,
    pub level: NotificationLevel,
    pub message: String,
    pub expires_at: Instant,
}

impl Notification {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Short-lived user-facing messages. Each one expires after the TTL unless
/// dismissed earlier.
pub struct Notifier {
    ttl: Duration,
    active: Mutex<Vec<Notification>>,
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(ttl: Duration) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            ttl,
            active: Mutex::new(Vec::new()),
            tx,
        }
    }

    pub fn notify(&self, level: NotificationLevel, message: impl Into<String>) -> Uuid {
        let notification = Notification {
            id: Uuid::new_v4(),
            level,
            message: message.into(),
            expires_at: Instant::now() + self.ttl,
        };
        let id = notification.id;
        {
            let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
            active.retain(|n| !n.is_expired(Instant::now()));
            active.push(notification.clone());
        }
        let _ = self.tx.send(notification);
        id
    }

    pub fn info(&self, message: impl Into<String>) -> Uuid {
        self.notify(NotificationLevel::Info, message)
    }

    pub fn success(&self, message: impl Into<String>) -> Uuid {
        self.notify(NotificationLevel::Success, message)
    }

    pub fn warning(&self, message: impl Into<String>) -> Uuid {
        self.notify(NotificationLevel::Warning, message)
    }

    pub fn danger(&self, message: impl Into<String>) -> Uuid {
        self.notify(NotificationLevel::Danger, message)
    }

    /// Picks a level for `error`; a rejected prompt is not treated as a failure.
    pub fn error(&self, context: &str, error: &SyncError) -> Uuid {
        match error {
            SyncError::UserRejected => self.info(format!("{}: request rejected in wallet", context)),
            SyncError::WaitCancelled(_) => {
                self.info(format!("{}: still pending, the view updates once it confirms", context))
            }
            SyncError::AlreadyInProgress(_)
            | SyncError::NotConnected
            | SyncError::InvalidInput(_)
            | SyncError::InsufficientStake { .. } => {
                self.warning(format!("{}: {}", context, error))
            }
            _ => self.danger(format!("{}: {}", context, error)),
        }
    }

    /// Notifications that have not expired or been dismissed, oldest first.
    pub fn active(&self) -> Vec<Notification> {
        let now = Instant::now();
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        active.retain(|n| !n.is_expired(now));
        active.clone()
    }

    pub fn dismiss(&self, id: Uuid) -> bool {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        let before = active.len();
        active.retain(|n| n.id != id);
        active.len() != before
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}
