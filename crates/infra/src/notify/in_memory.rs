use std::sync::Mutex;

use super::{Notification, Notifier, NotifyError};

/// Records notifications instead of delivering them.
///
/// Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    sent: Mutex<Vec<Notification>>,
    failure: Mutex<Option<NotifyError>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `send` fail with `error`.
    pub fn fail_with(&self, error: NotifyError) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(error);
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Notifier for InMemoryNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let failure = self
            .failure
            .lock()
            .map_err(|_| NotifyError::Transport("lock poisoned".to_string()))?
            .clone();
        if let Some(err) = failure {
            return Err(err);
        }
        self.sent
            .lock()
            .map_err(|_| NotifyError::Transport("lock poisoned".to_string()))?
            .push(notification.clone());
        Ok(())
    }
}
