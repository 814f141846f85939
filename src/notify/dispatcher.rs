use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use super::{Notification, Notifier};

/// Post-commit notification queue.
///
/// `dispatch` never blocks and never fails the caller: a full or closed queue
/// drops the notification with a warning, and delivery errors are only logged.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: Option<mpsc::Sender<Notification>>,
}

/// Join handle for the delivery task. The task ends once every dispatcher clone
/// has been dropped and the queue is drained.
pub struct DispatcherHandle {
    join: JoinHandle<()>,
}

impl DispatcherHandle {
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            log::error!("Notification task ended abnormally: {e}");
        }
    }
}

impl NotificationDispatcher {
    /// Spawn the delivery task on the current tokio runtime.
    pub fn spawn(notifier: Arc<dyn Notifier>, capacity: usize) -> (Self, DispatcherHandle) {
        let (tx, mut rx) = mpsc::channel::<Notification>(capacity.max(1));
        let join = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                if let Err(e) = notifier.notify(&notification).await {
                    log::error!(
                        "Delivering {} for idea #{} failed: {e}",
                        notification.template.as_str(),
                        notification.idea_id
                    );
                }
            }
            log::info!("Notification queue closed");
        });
        (NotificationDispatcher { tx: Some(tx) }, DispatcherHandle { join })
    }

    /// A dispatcher that discards everything.
    pub fn disabled() -> Self {
        NotificationDispatcher { tx: None }
    }

    pub fn dispatch(&self, notification: Notification) {
        let Some(tx) = &self.tx else {
            return;
        };
        if notification.recipients.is_empty() {
            log::debug!(
                "Skipping {} for idea #{}: no recipients",
                notification.template.as_str(),
                notification.idea_id
            );
            return;
        }
        match tx.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) => {
                log::warn!("Notification queue full, dropping {} for idea #{}", n.template.as_str(), n.idea_id);
            }
            Err(TrySendError::Closed(n)) => {
                log::warn!("Notification queue closed, dropping {} for idea #{}", n.template.as_str(), n.idea_id);
            }
        }
    }
}
