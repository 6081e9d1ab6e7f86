use super::{Notification, Notifier, NotifyError};

/// Writes reports to the tracing output. Used when no delivery endpoint is
/// configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            from = %notification.from,
            to = %notification.to.join(", "),
            subject = %notification.subject,
            body = %notification.body,
            "inventory report"
        );
        Ok(())
    }
}
