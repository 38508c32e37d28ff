//! Fan-out of one message to every chat linked to its source chat.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::common::error::SendError;
use crate::common::message::{Attachment, AttachmentKind, Message};
use crate::routing::RoutingStore;

use super::chunking::{plan, Limits, Outgoing};

/// Platform send primitives used by [`deliver`].
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), SendError>;

    async fn send_batch(
        &self,
        recipient: &str,
        kind: AttachmentKind,
        batch: &[Attachment],
    ) -> Result<(), SendError>;
}

/// Outcome of delivering one message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Recipients that got every part.
    pub delivered: Vec<String>,
    /// Recipients that refused delivery and were unlinked.
    pub disconnected: Vec<String>,
    /// Recipients that failed for any other reason.
    pub failed: Vec<String>,
}

impl DeliveryReport {
    /// True when no recipient failed outright.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn recipients(&self) -> usize {
        self.delivered.len() + self.disconnected.len() + self.failed.len()
    }
}

/// Deliver `message` to the recipients of its source chat.
///
/// Each recipient gets the text slices first, then attachment batches in
/// category order. The first failing send stops that recipient only. A
/// recipient that refuses delivery is disconnected from the source chat.
pub async fn deliver(
    store: &RoutingStore,
    limits: &Limits,
    outbound: &dyn Outbound,
    message: &Message,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();

    let recipients = store.recipients(&message.chat_id);
    if recipients.is_empty() {
        debug!(
            chat_id = %message.chat_id,
            message_id = %message.message_id,
            "No recipients, message dropped"
        );
        return report;
    }

    let nickname = store
        .nickname(&message.chat_id)
        .unwrap_or_else(|| message.username.clone());
    let parts = plan(message, &nickname, limits);

    for recipient in recipients {
        match send_parts(outbound, &recipient, &parts).await {
            Ok(()) => report.delivered.push(recipient),
            Err(SendError::Forbidden { reason, .. }) => {
                info!(
                    recipient = %recipient,
                    source = %message.chat_id,
                    "Recipient refused delivery, disconnecting: {}",
                    reason
                );
                if let Err(e) = store.disconnect(&recipient, &message.chat_id) {
                    error!(recipient = %recipient, "Failed to disconnect recipient: {}", e);
                }
                report.disconnected.push(recipient);
            }
            Err(e) => {
                warn!(
                    recipient = %recipient,
                    message_id = %message.message_id,
                    "Delivery failed: {}",
                    e
                );
                report.failed.push(recipient);
            }
        }
    }

    report
}

async fn send_parts(
    outbound: &dyn Outbound,
    recipient: &str,
    parts: &[Outgoing<'_>],
) -> Result<(), SendError> {
    for part in parts {
        match part {
            Outgoing::Text(text) => outbound.send_text(recipient, text).await?,
            Outgoing::Batch(kind, batch) => outbound.send_batch(recipient, *kind, batch).await?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::message::Messenger;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Sent {
        Text(String, String),
        Batch(String, AttachmentKind, usize),
    }

    #[derive(Default)]
    struct RecordingOutbound {
        sent: Mutex<Vec<Sent>>,
        forbidden: HashSet<String>,
        broken: HashSet<String>,
    }

    impl RecordingOutbound {
        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        fn check(&self, recipient: &str) -> Result<(), SendError> {
            if self.forbidden.contains(recipient) {
                return Err(SendError::Forbidden {
                    recipient: recipient.to_string(),
                    reason: "bot was blocked by the user".to_string(),
                });
            }
            if self.broken.contains(recipient) {
                return Err(SendError::Other(anyhow::anyhow!("connection reset")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Outbound for RecordingOutbound {
        async fn send_text(&self, recipient: &str, text: &str) -> Result<(), SendError> {
            self.check(recipient)?;
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Text(recipient.to_string(), text.to_string()));
            Ok(())
        }

        async fn send_batch(
            &self,
            recipient: &str,
            kind: AttachmentKind,
            batch: &[Attachment],
        ) -> Result<(), SendError> {
            self.check(recipient)?;
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Batch(recipient.to_string(), kind, batch.len()));
            Ok(())
        }
    }

    fn message(chat_id: &str, body: &str) -> Message {
        Message::text(Messenger::Discord, "m1", chat_id, "u1", "alice", body)
    }

    #[tokio::test]
    async fn test_no_recipients_sends_nothing() {
        let store = RoutingStore::in_memory();
        let outbound = RecordingOutbound::default();

        let report = deliver(&store, &Limits::TELEGRAM, &outbound, &message("lonely", "hi")).await;

        assert_eq!(report.recipients(), 0);
        assert!(outbound.sent().is_empty());
    }

    #[tokio::test]
    async fn test_uses_stored_nickname_then_username() {
        let store = RoutingStore::in_memory();
        store.connect("src", "dst").unwrap();
        let outbound = RecordingOutbound::default();

        deliver(&store, &Limits::TELEGRAM, &outbound, &message("src", "hi")).await;
        store.set_nickname("src", "Alice").unwrap();
        deliver(&store, &Limits::TELEGRAM, &outbound, &message("src", "again")).await;

        assert_eq!(
            outbound.sent(),
            vec![
                Sent::Text("dst".into(), "alice [discord]\nhi".into()),
                Sent::Text("dst".into(), "Alice [discord]\nagain".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_text_before_batches_per_recipient() {
        let store = RoutingStore::in_memory();
        store.connect("src", "a").unwrap();
        store.connect("src", "b").unwrap();
        let outbound = RecordingOutbound::default();

        let mut msg = message("src", &"x".repeat(2500));
        msg.images = (0..12).map(|i| Attachment::new(i.to_string(), "u")).collect();
        msg.documents = vec![Attachment::new("d", "u")];

        let report = deliver(&store, &Limits::DISCORD, &outbound, &msg).await;
        assert_eq!(report.delivered, vec!["a", "b"]);

        let for_a: Vec<Sent> = outbound
            .sent()
            .into_iter()
            .filter(|s| matches!(s, Sent::Text(r, _) | Sent::Batch(r, _, _) if r == "a"))
            .collect();
        assert_eq!(for_a.len(), 5);
        assert!(matches!(&for_a[0], Sent::Text(_, t) if t.starts_with("alice [discord]\n")));
        assert!(matches!(&for_a[1], Sent::Text(_, t) if t.len() == 500));
        assert_eq!(for_a[2], Sent::Batch("a".into(), AttachmentKind::Image, 10));
        assert_eq!(for_a[3], Sent::Batch("a".into(), AttachmentKind::Image, 2));
        assert_eq!(for_a[4], Sent::Batch("a".into(), AttachmentKind::Document, 1));
    }

    #[tokio::test]
    async fn test_forbidden_recipient_is_disconnected_others_still_delivered() {
        let store = RoutingStore::in_memory();
        store.connect("src", "blocked").unwrap();
        store.connect("src", "ok").unwrap();
        let outbound = RecordingOutbound {
            forbidden: HashSet::from(["blocked".to_string()]),
            ..Default::default()
        };

        let report = deliver(&store, &Limits::TELEGRAM, &outbound, &message("src", "hi")).await;

        assert_eq!(report.delivered, vec!["ok"]);
        assert_eq!(report.disconnected, vec!["blocked"]);
        assert!(report.is_success());
        assert!(!store.recipients("src").contains("blocked"));
        assert!(store.recipients("blocked").is_empty());
        assert!(store.recipients("src").contains("ok"));
    }

    #[tokio::test]
    async fn test_other_failure_keeps_link() {
        let store = RoutingStore::in_memory();
        store.connect("src", "flaky").unwrap();
        let outbound = RecordingOutbound {
            broken: HashSet::from(["flaky".to_string()]),
            ..Default::default()
        };

        let report = deliver(&store, &Limits::TELEGRAM, &outbound, &message("src", "hi")).await;

        assert_eq!(report.failed, vec!["flaky"]);
        assert!(!report.is_success());
        assert!(store.recipients("src").contains("flaky"));
    }
}
