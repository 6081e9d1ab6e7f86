use std::time::Duration;

use super::{Notification, Notifier, NotifyError};

/// Posts reports as JSON to a mail relay or webhook endpoint.
///
/// Server errors and network failures are retried with exponential backoff;
/// client errors are not.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
    bearer_token: Option<String>,
    max_retries: u32,
    initial_backoff: Duration,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            bearer_token: None,
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }
}

#[async_trait::async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut delay = self.initial_backoff;
        let mut attempt = 0;
        loop {
            let mut req = self.client.post(&self.url).json(notification);
            if let Some(token) = &self.bearer_token {
                req = req.bearer_auth(token);
            }

            let retryable = match req.send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(url = %self.url, attempt = attempt + 1, "report delivered");
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let message = resp.text().await.unwrap_or_default();
                    let err = NotifyError::Rejected {
                        status: status.as_u16(),
                        message,
                    };
                    if !status.is_server_error() {
                        return Err(err);
                    }
                    err
                }
                Err(e) => NotifyError::Transport(e.to_string()),
            };

            if attempt >= self.max_retries {
                return Err(retryable);
            }
            attempt += 1;
            tracing::warn!(
                url = %self.url,
                attempt,
                error = %retryable,
                "report delivery failed, retrying"
            );
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }
}
