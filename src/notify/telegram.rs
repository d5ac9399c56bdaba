//! Telegram bot notifier.
//!
//! The bot has no fixed recipient list: anyone who messages it shows up in
//! `getUpdates`, and their chat id is cached for the lifetime of the process.
//! The configured default chat id is always included.

use super::{NotifyError, Notifier};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

pub struct TelegramNotifier {
    client: reqwest::Client,
    base_url: String,
    default_chat_id: Option<i64>,
    chat_ids: Mutex<BTreeSet<i64>>,
}

impl TelegramNotifier {
    pub fn new(
        client: reqwest::Client,
        api_url: &str,
        token: &str,
        default_chat_id: Option<i64>,
    ) -> Self {
        Self {
            client,
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
            default_chat_id,
            chat_ids: Mutex::new(BTreeSet::new()),
        }
    }

    /// Refresh the recipient cache from `getUpdates`. A failed refresh falls
    /// back to whatever is already cached.
    async fn recipients(&self) -> BTreeSet<i64> {
        match self.fetch_updates().await {
            Ok(updates) => {
                let discovered = chat_ids_from_updates(&updates);
                if !discovered.is_empty() {
                    debug!(count = discovered.len(), "telegram chats discovered");
                }
                self.chat_ids.lock().extend(discovered);
            }
            Err(e) => warn!(error = %e, "telegram getUpdates failed, using cached chats"),
        }

        let mut recipients = self.chat_ids.lock().clone();
        recipients.extend(self.default_chat_id);
        recipients
    }

    async fn fetch_updates(&self) -> Result<Value, NotifyError> {
        let resp = self
            .client
            .get(format!("{}/getUpdates", self.base_url))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(NotifyError::Status(resp.status().as_u16()));
        }
        Ok(resp.json().await?)
    }

    async fn send(&self, chat_id: i64, text: &str) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(format!("{}/sendMessage", self.base_url))
            .query(&[("chat_id", chat_id.to_string().as_str()), ("text", text)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(NotifyError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}

/// Chat ids of every message in a `getUpdates` response.
pub fn chat_ids_from_updates(updates: &Value) -> BTreeSet<i64> {
    updates
        .get("result")
        .and_then(|r| r.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|u| u.pointer("/message/chat/id").and_then(|id| id.as_i64()))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) -> Result<(), NotifyError> {
        let recipients = self.recipients().await;
        if recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }

        let results = join_all(recipients.iter().map(|id| self.send(*id, text))).await;
        let mut failed = 0;
        for (chat_id, result) in recipients.iter().zip(&results) {
            if let Err(e) = result {
                failed += 1;
                warn!(chat_id, error = %e, "telegram send failed");
            }
        }

        if failed == recipients.len() {
            return Err(NotifyError::AllFailed(failed));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_ids_from_updates() {
        let updates = json!({
            "ok": true,
            "result": [
                {"update_id": 1, "message": {"chat": {"id": 42}, "text": "hi"}},
                {"update_id": 2, "edited_message": {"chat": {"id": 7}}},
                {"update_id": 3, "message": {"chat": {"id": -1001}}},
                {"update_id": 4, "message": {"chat": {"id": 42}}}
            ]
        });
        let ids: Vec<i64> = chat_ids_from_updates(&updates).into_iter().collect();
        assert_eq!(ids, vec![-1001, 42]);
    }

    #[test]
    fn test_chat_ids_from_empty_updates() {
        assert!(chat_ids_from_updates(&json!({"ok": true, "result": []})).is_empty());
        assert!(chat_ids_from_updates(&json!({"ok": false})).is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_api_falls_back_to_default_chat() {
        let notifier = TelegramNotifier::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            "token",
            Some(99),
        );
        let recipients = notifier.recipients().await;
        assert_eq!(recipients.into_iter().collect::<Vec<_>>(), vec![99]);
    }
}
