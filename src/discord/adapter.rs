//! Discord side of a bridge.
//!
//! Ingestion runs a serenity gateway client whose event handler turns guild
//! and DM messages into canonical messages (or runs `!` commands). Delivery
//! goes through a standalone `Http` client, so it works while the gateway is
//! reconnecting.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::BackoffBuilder;
use chrono::{DateTime, Utc};
use serenity::builder::{CreateAttachment, CreateMessage};
use serenity::gateway::GatewayError;
use serenity::http::Http;
use serenity::model::channel::Message as DiscordMessage;
use serenity::model::gateway::Ready;
use serenity::model::id::{ChannelId, UserId};
use serenity::model::sticker::StickerFormatType;
use serenity::prelude::*;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::bridge::commands::{self, Command, CommandContext, CommandOutcome};
use crate::bridge::{deliver, DeliveryReport, Endpoint, Limits, Outbound};
use crate::common::error::{DownloadError, SendError};
use crate::common::message::{Attachment, AttachmentKind, Message, Messenger};
use crate::config::EndpointConfig;
use crate::routing::RoutingStore;
use crate::transport::Transport;

const COMMAND_PREFIX: char = '!';

/// Upload limit for one file; larger attachments are skipped.
const MAX_FILE_BYTES: u64 = 8 * 1024 * 1024;

/// Create an exponential backoff iterator for gateway reconnection.
/// 5s initial, 5min max, factor 1.5, with jitter, unlimited retries.
fn gateway_backoff() -> impl Iterator<Item = Duration> {
    backon::ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(5))
        .with_max_delay(Duration::from_secs(300))
        .with_factor(1.5)
        .with_jitter()
        .without_max_times()
        .build()
}

/// State shared between the adapter and its gateway event handler.
struct Shared {
    name: String,
    config: EndpointConfig,
    store: Arc<RoutingStore>,
    outbound: Arc<dyn Transport>,
}

pub struct DiscordAdapter {
    shared: Arc<Shared>,
    http: Arc<Http>,
    /// Fetches attachments before re-upload.
    downloads: reqwest::Client,
}

impl DiscordAdapter {
    pub fn new(
        name: impl Into<String>,
        config: EndpointConfig,
        store: Arc<RoutingStore>,
        outbound: Arc<dyn Transport>,
    ) -> anyhow::Result<Self> {
        let http = Arc::new(Http::new(&config.token));
        let downloads = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            shared: Arc::new(Shared {
                name: name.into(),
                config,
                store,
                outbound,
            }),
            http,
            downloads,
        })
    }
}

/// Gateway event handler.
struct RelayHandler {
    shared: Arc<Shared>,
}

#[async_trait]
impl EventHandler for RelayHandler {
    async fn message(&self, ctx: Context, msg: DiscordMessage) {
        // Ignore bots, including ourselves
        if msg.author.bot || msg.author.id == ctx.cache.current_user().id {
            return;
        }

        let content = msg.content.trim();
        if content.starts_with(COMMAND_PREFIX) {
            if let Some(command) = Command::parse(content, COMMAND_PREFIX) {
                self.run_command(&ctx, &msg, command).await;
                return;
            }
        }

        let message = to_message(&msg);
        if message.is_empty() {
            return;
        }

        debug!(
            adapter = %self.shared.name,
            chat_id = %message.chat_id,
            message_id = %message.message_id,
            "Discord message accepted"
        );
        if let Err(e) = self.shared.outbound.send(&message).await {
            error!(
                adapter = %self.shared.name,
                queue = self.shared.outbound.name(),
                "Failed to publish message: {}",
                e
            );
        }
    }

    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(adapter = %self.shared.name, "Discord bot connected as {}", ready.user.name);
    }
}

impl RelayHandler {
    async fn run_command(&self, ctx: &Context, msg: &DiscordMessage, command: Command) {
        let shared = &self.shared;
        let command_ctx = CommandContext {
            store: &shared.store,
            hub_chat: &shared.config.hub_chat,
            admin_chats: &shared.config.admin_chats,
            moderation: shared.config.moderation,
            prefix: COMMAND_PREFIX,
        };
        let chat_id = msg.channel_id.to_string();
        let sender_id = msg.author.id.to_string();

        info!(adapter = %shared.name, chat_id = %chat_id, sender_id = %sender_id, ?command, "Running command");
        let outcome = commands::execute(&command_ctx, &chat_id, &sender_id, command);
        send_outcome(&ctx.http, &shared.name, &shared.config.admin_chats, msg.channel_id, outcome)
            .await;
    }
}

async fn send_outcome(
    http: &Arc<Http>,
    adapter: &str,
    admin_chats: &[String],
    channel: ChannelId,
    outcome: CommandOutcome,
) {
    for reply in &outcome.replies {
        if let Err(e) = channel.say(http, reply).await {
            warn!(adapter, channel = %channel, "Failed to send command reply: {}", e);
        }
    }

    // Admins are users, notified by DM
    if let Some(text) = &outcome.notify_admins {
        for admin in admin_chats.iter().filter_map(|id| parse_id(id).map(UserId::new)) {
            if let Err(e) = admin
                .direct_message(http, CreateMessage::new().content(text))
                .await
            {
                warn!(adapter, admin = %admin, "Failed to notify admin: {}", e);
            }
        }
    }

    for (chat, text) in &outcome.notify_chats {
        let Some(target) = parse_id(chat).map(ChannelId::new) else {
            warn!(adapter, chat_id = %chat, "Cannot notify chat with invalid id");
            continue;
        };
        if let Err(e) = target.say(http, text).await {
            warn!(adapter, chat_id = %chat, "Failed to notify chat: {}", e);
        }
    }
}

#[async_trait]
impl Endpoint for DiscordAdapter {
    fn name(&self) -> &str {
        &self.shared.name
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let intents = GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;
        let mut backoff = gateway_backoff();

        loop {
            if *shutdown.borrow() {
                break;
            }

            info!(adapter = %self.shared.name, "Connecting to Discord...");
            let handler = RelayHandler {
                shared: Arc::clone(&self.shared),
            };
            let built = Client::builder(&self.shared.config.token, intents)
                .event_handler(handler)
                .await;

            let outcome = match built {
                Ok(mut client) => {
                    let shard_manager = client.shard_manager.clone();
                    tokio::select! {
                        result = client.start() => Some(result),
                        _ = shutdown.changed() => {
                            info!(adapter = %self.shared.name, "Initiating graceful Discord shutdown...");
                            shard_manager.shutdown_all().await;
                            None
                        }
                    }
                }
                Err(e) => Some(Err(e)),
            };

            match outcome {
                None => break,
                Some(Ok(())) => {
                    info!(adapter = %self.shared.name, "Discord client disconnected normally");
                    backoff = gateway_backoff();
                }
                Some(Err(e)) if is_fatal_gateway_error(&e) => {
                    return Err(anyhow::anyhow!("Discord rejected the bot: {}", e));
                }
                Some(Err(e)) => error!(adapter = %self.shared.name, "Discord client error: {}", e),
            }

            let delay = backoff.next().unwrap_or(Duration::from_secs(300));
            warn!(
                adapter = %self.shared.name,
                "Discord disconnected. Reconnecting in {:.1}s...",
                delay.as_secs_f64()
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!(adapter = %self.shared.name, "Discord task ended");
        Ok(())
    }

    async fn deliver(&self, message: Message) -> DeliveryReport {
        deliver(&self.shared.store, &Limits::DISCORD, self, &message).await
    }
}

#[async_trait]
impl Outbound for DiscordAdapter {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), SendError> {
        let channel = recipient_channel(recipient)?;
        channel
            .say(&self.http, text)
            .await
            .map(|_| ())
            .map_err(|e| classify_error(recipient, e))
    }

    async fn send_batch(
        &self,
        recipient: &str,
        _kind: AttachmentKind,
        batch: &[Attachment],
    ) -> Result<(), SendError> {
        let channel = recipient_channel(recipient)?;

        let fetched = fetch_all(&self.shared.name, batch, |url| {
            let client = self.downloads.clone();
            async move { download(&client, &url, MAX_FILE_BYTES).await }
        })
        .await;
        if fetched.is_empty() {
            warn!(
                adapter = %self.shared.name,
                recipient,
                "No attachment of the batch could be fetched, nothing sent"
            );
            return Ok(());
        }

        let files: Vec<CreateAttachment> = fetched
            .into_iter()
            .map(|(name, data)| CreateAttachment::bytes(data, name))
            .collect();
        channel
            .send_files(&self.http, files, CreateMessage::new())
            .await
            .map(|_| ())
            .map_err(|e| classify_error(recipient, e))
    }
}

/// Download `url`, refusing bodies over `limit` bytes.
async fn download(
    client: &reqwest::Client,
    url: &str,
    limit: u64,
) -> Result<Vec<u8>, DownloadError> {
    let mut response = client.get(url).send().await?.error_for_status()?;
    if let Some(size) = response.content_length().filter(|size| *size > limit) {
        return Err(DownloadError::TooLarge { size, limit });
    }

    let mut data = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let size = (data.len() + chunk.len()) as u64;
        if size > limit {
            return Err(DownloadError::TooLarge { size, limit });
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

/// Fetch every attachment of a batch as `(file name, bytes)`.
///
/// A file that fails to download is logged and left out; the rest of the
/// batch still goes out.
async fn fetch_all<F, Fut>(
    adapter: &str,
    batch: &[Attachment],
    fetch: F,
) -> Vec<(String, Vec<u8>)>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Vec<u8>, DownloadError>>,
{
    let mut files = Vec::with_capacity(batch.len());
    for attachment in batch {
        match fetch(attachment.url.clone()).await {
            Ok(data) => {
                let name = if attachment.name.is_empty() {
                    "file".to_string()
                } else {
                    attachment.name.clone()
                };
                files.push((name, data));
            }
            Err(e) => warn!(
                adapter,
                file = %attachment.name,
                url = %attachment.url,
                "Skipping attachment: {}",
                e
            ),
        }
    }
    files
}

/// Check if a serenity error is a gateway condition that retrying cannot fix.
fn is_fatal_gateway_error(err: &serenity::Error) -> bool {
    matches!(
        err,
        serenity::Error::Gateway(
            GatewayError::InvalidAuthentication
                | GatewayError::NoAuthentication
                | GatewayError::InvalidShardData
                | GatewayError::DisallowedGatewayIntents
                | GatewayError::InvalidGatewayIntents
        )
    )
}

/// 403 and 404 mean the bot lost access to the channel or it no longer exists.
fn classify_error(recipient: &str, err: serenity::Error) -> SendError {
    let status = match &err {
        serenity::Error::Http(http) => http.status_code().map(|code| code.as_u16()),
        _ => None,
    };
    if is_forbidden_status(status) {
        SendError::Forbidden {
            recipient: recipient.to_string(),
            reason: err.to_string(),
        }
    } else {
        SendError::Other(err.into())
    }
}

fn is_forbidden_status(status: Option<u16>) -> bool {
    matches!(status, Some(403) | Some(404))
}

fn recipient_channel(recipient: &str) -> Result<ChannelId, SendError> {
    parse_id(recipient)
        .map(ChannelId::new)
        .ok_or_else(|| SendError::Forbidden {
            recipient: recipient.to_string(),
            reason: "not a Discord channel id".to_string(),
        })
}

/// Discord snowflakes are non-zero u64.
fn parse_id(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|id| *id != 0)
}

/// Attachment category from file name and MIME type.
fn classify_attachment(filename: &str, content_type: Option<&str>) -> AttachmentKind {
    if filename.to_lowercase().ends_with(".gif") {
        return AttachmentKind::Animation;
    }
    match content_type.and_then(|mime| mime.split('/').next()) {
        Some("image") => AttachmentKind::Image,
        Some("audio") => AttachmentKind::Audio,
        Some("video") => AttachmentKind::Video,
        _ => AttachmentKind::Document,
    }
}

fn sticker_kind(format: StickerFormatType) -> AttachmentKind {
    match format {
        StickerFormatType::Apng | StickerFormatType::Gif => AttachmentKind::AnimatedSticker,
        _ => AttachmentKind::Sticker,
    }
}

fn to_message(msg: &DiscordMessage) -> Message {
    let username = msg
        .member
        .as_ref()
        .and_then(|m| m.nick.clone())
        .unwrap_or_else(|| msg.author.name.clone());

    let mut message = Message::text(
        Messenger::Discord,
        msg.id.to_string(),
        msg.channel_id.to_string(),
        msg.author.id.to_string(),
        username,
        msg.content.clone(),
    );
    message.timestamp =
        DateTime::from_timestamp(msg.timestamp.unix_timestamp(), 0).unwrap_or_else(Utc::now);
    message.reply_to_id = msg
        .message_reference
        .as_ref()
        .and_then(|reference| reference.message_id)
        .map(|id| id.to_string());

    for attachment in &msg.attachments {
        let kind = classify_attachment(&attachment.filename, attachment.content_type.as_deref());
        message
            .attachments_mut(kind)
            .push(Attachment::new(attachment.filename.clone(), attachment.url.clone()));
    }
    for sticker in &msg.sticker_items {
        match sticker.image_url() {
            Some(url) => message
                .attachments_mut(sticker_kind(sticker.format_type))
                .push(Attachment::new(sticker.name.clone(), url)),
            None => debug!(sticker = %sticker.name, "Sticker has no image form, skipped"),
        }
    }

    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_attachment() {
        assert_eq!(
            classify_attachment("party.GIF", Some("image/gif")),
            AttachmentKind::Animation
        );
        assert_eq!(
            classify_attachment("cat.png", Some("image/png")),
            AttachmentKind::Image
        );
        assert_eq!(
            classify_attachment("note.ogg", Some("audio/ogg")),
            AttachmentKind::Audio
        );
        assert_eq!(
            classify_attachment("clip.mp4", Some("video/mp4")),
            AttachmentKind::Video
        );
        assert_eq!(
            classify_attachment("report.pdf", Some("application/pdf")),
            AttachmentKind::Document
        );
        assert_eq!(classify_attachment("mystery", None), AttachmentKind::Document);
    }

    #[test]
    fn test_sticker_kind() {
        assert_eq!(sticker_kind(StickerFormatType::Png), AttachmentKind::Sticker);
        assert_eq!(
            sticker_kind(StickerFormatType::Apng),
            AttachmentKind::AnimatedSticker
        );
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("123456789012345678"), Some(123456789012345678));
        assert_eq!(parse_id(" 42 "), Some(42));
        assert_eq!(parse_id("0"), None);
        assert_eq!(parse_id("-1001"), None);
        assert_eq!(parse_id("general"), None);
    }

    #[test]
    fn test_invalid_recipient_is_forbidden() {
        assert!(matches!(
            recipient_channel("-1001"),
            Err(SendError::Forbidden { .. })
        ));
        assert_eq!(recipient_channel("55").unwrap(), ChannelId::new(55));
    }

    #[test]
    fn test_forbidden_statuses() {
        assert!(is_forbidden_status(Some(403)));
        assert!(is_forbidden_status(Some(404)));
        assert!(!is_forbidden_status(Some(429)));
        assert!(!is_forbidden_status(Some(500)));
        assert!(!is_forbidden_status(None));
    }

    #[tokio::test]
    async fn test_failed_download_skips_only_that_file() {
        let batch = vec![
            Attachment::new("a.png", "https://cdn/a.png"),
            Attachment::new("huge.mp4", "https://cdn/huge.mp4"),
            Attachment::new("", "https://cdn/c.txt"),
        ];

        let files = fetch_all("test", &batch, |url| async move {
            if url.contains("huge") {
                Err(DownloadError::TooLarge {
                    size: MAX_FILE_BYTES + 1,
                    limit: MAX_FILE_BYTES,
                })
            } else {
                Ok(url.into_bytes())
            }
        })
        .await;

        assert_eq!(
            files,
            vec![
                ("a.png".to_string(), b"https://cdn/a.png".to_vec()),
                ("file".to_string(), b"https://cdn/c.txt".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_all_downloads_failing_yields_nothing() {
        let batch = vec![Attachment::new("x", "https://cdn/x")];
        let files = fetch_all("test", &batch, |_| async {
            Err(DownloadError::TooLarge { size: 9, limit: 1 })
        })
        .await;
        assert!(files.is_empty());
    }

    #[test]
    fn test_non_http_errors_are_not_forbidden() {
        let err = serenity::Error::Other("boom");
        assert!(matches!(classify_error("1", err), SendError::Other(_)));
    }
}
