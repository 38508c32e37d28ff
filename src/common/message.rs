//! Canonical message types relayed between endpoints.
//!
//! This module defines the single wire format used on the transport queues.
//! Field names follow the JSON layout shared by both sides of a bridge.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chat network a message originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Messenger {
    Telegram,
    Discord,
}

impl Messenger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Messenger::Telegram => "telegram",
            Messenger::Discord => "discord",
        }
    }
}

impl fmt::Display for Messenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Messenger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "telegram" => Ok(Messenger::Telegram),
            "discord" => Ok(Messenger::Discord),
            other => Err(format!("unknown messenger '{}'", other)),
        }
    }
}

/// A file attached to a message, referenced by URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Display file name.
    pub name: String,
    /// Locator the destination adapter dereferences.
    pub url: String,
}

impl Attachment {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Attachment category, in delivery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentKind {
    Image,
    Audio,
    Video,
    Animation,
    Document,
    Sticker,
    AnimatedSticker,
}

impl AttachmentKind {
    /// All categories in the order delivery walks them.
    pub const ALL: [AttachmentKind; 7] = [
        AttachmentKind::Image,
        AttachmentKind::Audio,
        AttachmentKind::Video,
        AttachmentKind::Animation,
        AttachmentKind::Document,
        AttachmentKind::Sticker,
        AttachmentKind::AnimatedSticker,
    ];
}

/// A relayed chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique within the source endpoint.
    pub message_id: String,
    /// Body text.
    #[serde(rename = "message", default)]
    pub body: String,
    /// Source chat id.
    pub chat_id: String,
    /// Source user id.
    pub user_id: String,
    /// Display username at the source.
    pub username: String,
    pub timestamp: DateTime<Utc>,
    /// Network the message came from.
    #[serde(rename = "messanger")]
    pub origin: Messenger,
    #[serde(default)]
    pub reply_to_id: Option<String>,
    #[serde(default)]
    pub images: Vec<Attachment>,
    #[serde(default)]
    pub audios: Vec<Attachment>,
    #[serde(default)]
    pub videos: Vec<Attachment>,
    #[serde(default)]
    pub animations: Vec<Attachment>,
    #[serde(default)]
    pub documents: Vec<Attachment>,
    #[serde(default)]
    pub stickers: Vec<Attachment>,
    #[serde(default)]
    pub animated_stickers: Vec<Attachment>,
}

impl Message {
    /// Create a text-only message.
    pub fn text(
        origin: Messenger,
        message_id: impl Into<String>,
        chat_id: impl Into<String>,
        user_id: impl Into<String>,
        username: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            body: body.into(),
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            username: username.into(),
            timestamp: Utc::now(),
            origin,
            reply_to_id: None,
            images: Vec::new(),
            audios: Vec::new(),
            videos: Vec::new(),
            animations: Vec::new(),
            documents: Vec::new(),
            stickers: Vec::new(),
            animated_stickers: Vec::new(),
        }
    }

    /// Attachments of one category.
    pub fn attachments(&self, kind: AttachmentKind) -> &[Attachment] {
        match kind {
            AttachmentKind::Image => &self.images,
            AttachmentKind::Audio => &self.audios,
            AttachmentKind::Video => &self.videos,
            AttachmentKind::Animation => &self.animations,
            AttachmentKind::Document => &self.documents,
            AttachmentKind::Sticker => &self.stickers,
            AttachmentKind::AnimatedSticker => &self.animated_stickers,
        }
    }

    /// Mutable access to one attachment category.
    pub fn attachments_mut(&mut self, kind: AttachmentKind) -> &mut Vec<Attachment> {
        match kind {
            AttachmentKind::Image => &mut self.images,
            AttachmentKind::Audio => &mut self.audios,
            AttachmentKind::Video => &mut self.videos,
            AttachmentKind::Animation => &mut self.animations,
            AttachmentKind::Document => &mut self.documents,
            AttachmentKind::Sticker => &mut self.stickers,
            AttachmentKind::AnimatedSticker => &mut self.animated_stickers,
        }
    }

    /// True when the message carries neither text nor attachments.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
            && AttachmentKind::ALL
                .iter()
                .all(|kind| self.attachments(*kind).is_empty())
    }

    /// Encode for the transport queue.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode from the transport queue.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messenger_from_str() {
        assert_eq!("Telegram".parse::<Messenger>(), Ok(Messenger::Telegram));
        assert_eq!("discord".parse::<Messenger>(), Ok(Messenger::Discord));
        assert!("slack".parse::<Messenger>().is_err());
    }

    #[test]
    fn test_wire_field_names() {
        let mut msg = Message::text(Messenger::Discord, "1", "10", "20", "alice", "hi");
        msg.images.push(Attachment::new("a.png", "https://cdn/a.png"));

        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["message"], "hi");
        assert_eq!(value["messanger"], "discord");
        assert_eq!(value["images"][0]["name"], "a.png");
        assert!(value["reply_to_id"].is_null());
        // ISO 8601 string, not a number
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_missing_optional_fields_decode_to_defaults() {
        let raw = r#"{
            "message_id": "5",
            "message": "hello",
            "chat_id": "-100",
            "user_id": "7",
            "username": "bob",
            "timestamp": "2024-03-01T12:30:00+00:00",
            "messanger": "telegram"
        }"#;

        let msg = Message::from_json(raw).unwrap();
        assert_eq!(msg.origin, Messenger::Telegram);
        assert_eq!(msg.reply_to_id, None);
        assert!(msg.images.is_empty());
        assert!(msg.animated_stickers.is_empty());
        assert_eq!(msg.timestamp.to_rfc3339(), "2024-03-01T12:30:00+00:00");
    }

    #[test]
    fn test_unknown_origin_rejected() {
        let raw = r#"{"message_id":"1","message":"","chat_id":"1","user_id":"1",
            "username":"x","timestamp":"2024-03-01T12:30:00Z","messanger":"irc"}"#;
        assert!(Message::from_json(raw).is_err());
    }

    #[test]
    fn test_is_empty() {
        let mut msg = Message::text(Messenger::Telegram, "1", "1", "1", "x", "");
        assert!(msg.is_empty());
        msg.attachments_mut(AttachmentKind::Sticker)
            .push(Attachment::new("s", "https://s"));
        assert!(!msg.is_empty());
        assert_eq!(msg.attachments(AttachmentKind::Sticker).len(), 1);
    }

    #[test]
    fn test_messenger_display() {
        assert_eq!(Messenger::Telegram.to_string(), "telegram");
        assert_eq!(Messenger::Discord.to_string(), "discord");
    }
}
