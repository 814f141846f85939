pub mod dispatcher;

pub use dispatcher::{DispatcherHandle, NotificationDispatcher};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationTemplate {
    ApprovalRequested,
    IdeaCompleted,
    IdeaRejected,
    WorkflowChanged,
}

impl NotificationTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationTemplate::ApprovalRequested => "approval_requested",
            NotificationTemplate::IdeaCompleted => "idea_completed",
            NotificationTemplate::IdeaRejected => "idea_rejected",
            NotificationTemplate::WorkflowChanged => "workflow_changed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub template: NotificationTemplate,
    pub idea_id: i64,
    /// Recipient user ids.
    pub recipients: Vec<i64>,
    pub context: Value,
}

/// Delivery transport (email, chat, ...). Called from the dispatcher task only.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), AppError>;
}

/// Writes notifications to the application log. Default for the binary.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), AppError> {
        log::info!(
            "notify {} idea #{} -> users {:?}",
            notification.template.as_str(),
            notification.idea_id,
            notification.recipients
        );
        Ok(())
    }
}

/// Keeps every delivered notification in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), AppError> {
        self.delivered.lock().await.push(notification.clone());
        Ok(())
    }
}
