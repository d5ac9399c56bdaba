pub mod telegram;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

pub use telegram::TelegramNotifier;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telegram returned status {0}")]
    Status(u16),
    #[error("no recipients known")]
    NoRecipients,
    #[error("delivery failed for all {0} recipients")]
    AllFailed(usize),
}

/// Fan-out alert delivery. Callers treat failures as best-effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<(), NotifyError>;
}

/// Writes alerts to the log only. Used when no bot token is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) -> Result<(), NotifyError> {
        info!(alert = text, "notification");
        Ok(())
    }
}
