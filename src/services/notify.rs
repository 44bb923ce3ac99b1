// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fire-and-forget notifications.
//!
//! Delivery failures are logged and never block the transition that raised
//! the notification.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OfferCreated,
    OfferExpired,
    OfferAccepted,
    OfferRejected,
    NoCandidateAvailable,
    GeofenceEnter,
    GeofenceExit,
    GeofenceDwell,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub recipient: String,
    pub kind: NotificationKind,
    pub payload: Value,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, recipient: &str, kind: NotificationKind, payload: Value);
}

/// Writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, recipient: &str, kind: NotificationKind, payload: Value) {
        tracing::info!(recipient, kind = ?kind, payload = %payload, "Notification");
    }
}

/// POSTs each notification as JSON to a webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, recipient: &str, kind: NotificationKind, payload: Value) {
        let notification = Notification {
            recipient: recipient.to_string(),
            kind,
            payload,
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(recipient, kind = ?kind, "No runtime; notification dropped");
            return;
        };
        let client = self.client.clone();
        let url = self.url.clone();
        handle.spawn(async move {
            let result = client
                .post(&url)
                .json(&notification)
                .send()
                .await
                .and_then(|response| response.error_for_status());
            if let Err(e) = result {
                tracing::warn!(
                    recipient = %notification.recipient,
                    kind = ?notification.kind,
                    error = %e,
                    "Notification delivery failed"
                );
            }
        });
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|n| n.kind == kind)
            .count()
    }

    pub fn clear(&self) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, recipient: &str, kind: NotificationKind, payload: Value) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Notification {
                recipient: recipient.to_string(),
                kind,
                payload,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recording_notifier_counts_by_kind() {
        let notifier = RecordingNotifier::new();
        notifier.notify("c1", NotificationKind::OfferCreated, json!({"order_id": "o1"}));
        notifier.notify("c2", NotificationKind::OfferCreated, json!({"order_id": "o1"}));
        notifier.notify("o1", NotificationKind::NoCandidateAvailable, json!({}));

        assert_eq!(notifier.count(NotificationKind::OfferCreated), 2);
        assert_eq!(notifier.count(NotificationKind::NoCandidateAvailable), 1);
        notifier.clear();
        assert!(notifier.notifications().is_empty());
    }

    #[test]
    fn webhook_without_runtime_does_not_panic() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook");
        notifier.notify("c1", NotificationKind::OfferExpired, json!({}));
    }
}
