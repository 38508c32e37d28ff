//! Minimal Telegram Bot API client.
//!
//! Only the methods the relay needs: long polling, file lookup, and the send
//! methods used for text and media. Every call is a JSON POST to
//! `https://api.telegram.org/bot<token>/<method>`.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::common::error::SendError;
use crate::common::message::{Attachment, AttachmentKind};

const API_BASE: &str = "https://api.telegram.org";

/// Server-side long-poll timeout for `getUpdates`, in seconds.
pub const POLL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram API error {code}: {description}")]
    Api { code: i64, description: String },
}

impl ApiError {
    /// True when the chat can no longer be written to (bot blocked or
    /// kicked, chat deleted).
    pub fn is_forbidden(&self) -> bool {
        match self {
            ApiError::Api { code: 403, .. } => true,
            ApiError::Api {
                code: 400,
                description,
            } => description.to_lowercase().contains("chat not found"),
            _ => false,
        }
    }

    /// True when Telegram refused a media URL (unsupported file type, or it
    /// could not fetch the content) while the chat itself is reachable.
    pub fn is_media_rejected(&self) -> bool {
        matches!(self, ApiError::Api { code: 400, .. }) && !self.is_forbidden()
    }

    pub fn into_send_error(self, recipient: &str) -> SendError {
        if self.is_forbidden() {
            SendError::Forbidden {
                recipient: recipient.to_string(),
                reason: self.to_string(),
            }
        } else {
            SendError::Other(self.into())
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TgMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

/// Audio, voice, video, animation or document.
#[derive(Debug, Clone, Deserialize)]
pub struct FileRef {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sticker {
    pub file_id: String,
    #[serde(default)]
    pub is_animated: bool,
    #[serde(default)]
    pub is_video: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgMessage {
    pub message_id: i64,
    #[serde(default)]
    pub date: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
    #[serde(default)]
    pub audio: Option<FileRef>,
    #[serde(default)]
    pub voice: Option<FileRef>,
    #[serde(default)]
    pub video: Option<FileRef>,
    #[serde(default)]
    pub animation: Option<FileRef>,
    #[serde(default)]
    pub document: Option<FileRef>,
    #[serde(default)]
    pub sticker: Option<Sticker>,
    #[serde(default)]
    pub reply_to_message: Option<Box<TgMessage>>,
}

#[derive(Debug, Deserialize)]
struct File {
    #[serde(default)]
    file_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct InputMedia<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    media: &'a str,
}

/// Send method and its file parameter for one attachment category.
fn single_method(kind: AttachmentKind) -> (&'static str, &'static str) {
    match kind {
        AttachmentKind::Image | AttachmentKind::Sticker => ("sendPhoto", "photo"),
        AttachmentKind::Audio => ("sendAudio", "audio"),
        AttachmentKind::Video => ("sendVideo", "video"),
        AttachmentKind::Animation => ("sendAnimation", "animation"),
        AttachmentKind::Document | AttachmentKind::AnimatedSticker => {
            ("sendDocument", "document")
        }
    }
}

/// Plain-text stand-in for attachments Telegram would not take by URL.
fn link_text(batch: &[Attachment]) -> String {
    batch
        .iter()
        .map(|attachment| {
            if attachment.name.is_empty() {
                attachment.url.clone()
            } else {
                format!("{}: {}", attachment.name, attachment.url)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `InputMedia` type for kinds that can be grouped with `sendMediaGroup`.
fn media_group_type(kind: AttachmentKind) -> Option<&'static str> {
    match kind {
        AttachmentKind::Image => Some("photo"),
        AttachmentKind::Audio => Some("audio"),
        AttachmentKind::Video => Some("video"),
        AttachmentKind::Document => Some("document"),
        _ => None,
    }
}

pub struct TelegramApi {
    client: reqwest::Client,
    token: String,
}

impl TelegramApi {
    pub fn new(token: impl Into<String>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            // Must outlive the long-poll timeout
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 30))
            .build()?;
        Ok(Self {
            client,
            token: token.into(),
        })
    }

    async fn call<P, T>(&self, method: &str, params: &P) -> Result<T, ApiError>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/bot{}/{}", API_BASE, self.token, method);
        let response = self.client.post(&url).json(params).send().await?;
        let status = response.status();
        let body: ApiResponse<T> = response.json().await?;

        match body {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            other => Err(ApiError::Api {
                code: other.error_code.unwrap_or(status.as_u16() as i64),
                description: other
                    .description
                    .unwrap_or_else(|| format!("{} failed", method)),
            }),
        }
    }

    pub async fn get_me(&self) -> Result<User, ApiError> {
        self.call("getMe", &json!({})).await
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, ApiError> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }

    /// Download URL of a file sent to the bot.
    pub async fn file_url(&self, file_id: &str) -> Result<String, ApiError> {
        let file: File = self.call("getFile", &json!({ "file_id": file_id })).await?;
        let path = file.file_path.ok_or_else(|| ApiError::Api {
            code: 400,
            description: format!("file {} has no download path", file_id),
        })?;
        Ok(format!("{}/file/bot{}/{}", API_BASE, self.token, path))
    }

    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ApiError> {
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                &json!({ "chat_id": chat_id, "text": text }),
            )
            .await?;
        Ok(())
    }

    /// Send one batch of attachments of a single kind.
    ///
    /// Batches of two or more groupable items go out as one media group,
    /// anything else one request per item. Media Telegram refuses to fetch
    /// is sent as links instead.
    pub async fn send_attachments(
        &self,
        chat_id: &str,
        kind: AttachmentKind,
        batch: &[Attachment],
    ) -> Result<(), ApiError> {
        if let (Some(media_type), true) = (media_group_type(kind), batch.len() > 1) {
            let media: Vec<InputMedia<'_>> = batch
                .iter()
                .map(|attachment| InputMedia {
                    kind: media_type,
                    media: &attachment.url,
                })
                .collect();
            let sent: Result<serde_json::Value, ApiError> = self
                .call(
                    "sendMediaGroup",
                    &json!({ "chat_id": chat_id, "media": media }),
                )
                .await;
            return match sent {
                Ok(_) => Ok(()),
                Err(e) if e.is_media_rejected() => self.send_links(chat_id, batch, e).await,
                Err(e) => Err(e),
            };
        }

        let (method, field) = single_method(kind);
        for attachment in batch {
            let sent: Result<serde_json::Value, ApiError> = self
                .call(
                    method,
                    &json!({ "chat_id": chat_id, field: attachment.url }),
                )
                .await;
            match sent {
                Ok(_) => {}
                Err(e) if e.is_media_rejected() => {
                    self.send_links(chat_id, std::slice::from_ref(attachment), e)
                        .await?
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn send_links(
        &self,
        chat_id: &str,
        batch: &[Attachment],
        cause: ApiError,
    ) -> Result<(), ApiError> {
        warn!(chat_id, items = batch.len(), "Media refused, sending links: {}", cause);
        self.send_message(chat_id, &link_text(batch)).await
    }
}
