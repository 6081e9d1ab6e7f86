//! Outbound report delivery.

pub mod http;
pub mod in_memory;
pub mod log;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

pub use http::HttpNotifier;
pub use in_memory::InMemoryNotifier;
pub use log::LogNotifier;

/// A composed report ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    /// The channel could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The channel answered but refused the message.
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Delivery channel for reports.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

#[async_trait::async_trait]
impl<N> Notifier for Arc<N>
where
    N: Notifier + ?Sized,
{
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        (**self).send(notification).await
    }
}
