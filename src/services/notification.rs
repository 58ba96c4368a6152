//! Notification service.
//!
//! Delivery channels are stubs that log the outgoing message; the queue
//! lets callers defer sending until [`NotificationService::process_queue`].

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::ValidateEmail;

use super::Service;
use crate::error::AppResult;

/// Delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Email,
    Sms,
    Push,
    InApp,
}

/// Severity of an in-app notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InAppLevel {
    #[default]
    Info,
    Warning,
    Error,
    Success,
}

/// A notification waiting to be delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Email {
        to: String,
        subject: String,
        content: String,
        #[serde(default)]
        template: Option<String>,
    },
    Sms {
        to: String,
        message: String,
    },
    Push {
        user_id: i64,
        title: String,
        body: String,
        #[serde(default)]
        data: Map<String, Value>,
    },
    InApp {
        user_id: i64,
        message: String,
        #[serde(default)]
        level: InAppLevel,
    },
}

impl Notification {
    pub const fn kind(&self) -> NotificationType {
        match self {
            Self::Email { .. } => NotificationType::Email,
            Self::Sms { .. } => NotificationType::Sms,
            Self::Push { .. } => NotificationType::Push,
            Self::InApp { .. } => NotificationType::InApp,
        }
    }
}

#[derive(Debug, Default)]
pub struct NotificationService {
    queue: Mutex<VecDeque<Notification>>,
}

impl NotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Notification>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sends an e-mail. Returns `false` if the address is malformed.
    pub fn send_email(&self, to: &str, subject: &str, content: &str, template: Option<&str>) -> bool {
        if !to.validate_email() {
            tracing::warn!(to, "Invalid e-mail address, notification dropped");
            return false;
        }
        tracing::info!(to, template = ?template, "Sending e-mail notification");
        tracing::debug!(subject, content_len = content.len(), "E-mail content");
        true
    }

    /// Sends a text message. Returns `false` if the number or message is empty.
    pub fn send_sms(&self, to: &str, message: &str) -> bool {
        if to.trim().is_empty() || message.is_empty() {
            tracing::warn!(to, "Empty SMS recipient or message, notification dropped");
            return false;
        }
        tracing::info!(to, "Sending SMS notification");
        tracing::debug!(message, "SMS content");
        true
    }

    pub fn send_push(&self, user_id: i64, title: &str, body: &str, data: &Map<String, Value>) -> bool {
        tracing::info!(user_id, "Sending push notification");
        tracing::debug!(title, body, extra_fields = data.len(), "Push content");
        true
    }

    pub fn send_in_app(&self, user_id: i64, message: &str, level: InAppLevel) -> bool {
        tracing::info!(user_id, level = ?level, "Sending in-app notification");
        tracing::debug!(message, "In-app content");
        true
    }

    /// Delivers `notification` through its channel.
    pub fn send(&self, notification: &Notification) -> bool {
        match notification {
            Notification::Email {
                to,
                subject,
                content,
                template,
            } => self.send_email(to, subject, content, template.as_deref()),
            Notification::Sms { to, message } => self.send_sms(to, message),
            Notification::Push {
                user_id,
                title,
                body,
                data,
            } => self.send_push(*user_id, title, body, data),
            Notification::InApp {
                user_id,
                message,
                level,
            } => self.send_in_app(*user_id, message, *level),
        }
    }

    pub fn queue_notification(&self, notification: Notification) {
        tracing::debug!(kind = ?notification.kind(), "Notification queued");
        self.queue().push_back(notification);
    }

    /// Sends every queued notification in FIFO order and returns how many
    /// were taken off the queue. Failed deliveries are logged and dropped.
    pub fn process_queue(&self) -> usize {
        let pending: Vec<Notification> = self.queue().drain(..).collect();
        let mut failed = 0;
        for notification in &pending {
            if !self.send(notification) {
                failed += 1;
                tracing::error!(kind = ?notification.kind(), "Failed to deliver notification");
            }
        }
        tracing::info!(
            processed = pending.len(),
            failed,
            "Notification queue processed"
        );
        pending.len()
    }

    pub fn queue_size(&self) -> usize {
        self.queue().len()
    }
}

#[async_trait]
impl Service for NotificationService {
    fn name(&self) -> &'static str {
        "NotificationService"
    }

    async fn initialize(&mut self) -> AppResult<()> {
        tracing::info!("NotificationService initialized");
        Ok(())
    }

    async fn cleanup(&mut self) -> AppResult<()> {
        let remaining = self.queue_size();
        if remaining > 0 {
            tracing::info!(remaining, "Delivering remaining notifications");
            self.process_queue();
        }
        tracing::info!("NotificationService cleaned up");
        Ok(())
    }
}
