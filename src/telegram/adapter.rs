//! Telegram side of a bridge.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use backon::BackoffBuilder;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::bridge::commands::{self, Command, CommandContext, CommandOutcome};
use crate::bridge::{deliver, DeliveryReport, Endpoint, Limits, Outbound};
use crate::common::error::SendError;
use crate::common::message::{Attachment, AttachmentKind, Message, Messenger};
use crate::config::EndpointConfig;
use crate::routing::RoutingStore;
use crate::transport::Transport;

use super::api::{TelegramApi, TgMessage, Update};

const COMMAND_PREFIX: char = '/';

/// Backoff between failed `getUpdates` calls.
/// 1s initial, 60s max, factor 2, with jitter, unlimited retries.
fn poll_backoff() -> impl Iterator<Item = Duration> {
    backon::ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(60))
        .with_factor(2.0)
        .with_jitter()
        .without_max_times()
        .build()
}

pub struct TelegramAdapter {
    name: String,
    api: TelegramApi,
    config: EndpointConfig,
    store: Arc<RoutingStore>,
    /// Queue accepted messages are published to.
    outbound: Arc<dyn Transport>,
}

impl TelegramAdapter {
    pub fn new(
        name: impl Into<String>,
        config: EndpointConfig,
        store: Arc<RoutingStore>,
        outbound: Arc<dyn Transport>,
    ) -> anyhow::Result<Self> {
        let api = TelegramApi::new(config.token.clone()).context("Failed to build HTTP client")?;
        Ok(Self {
            name: name.into(),
            api,
            config,
            store,
            outbound,
        })
    }

    async fn handle_update(&self, update: Update) {
        let Some(tg) = update.message else {
            return;
        };
        let Some(from) = tg.from.as_ref() else {
            return;
        };
        if from.is_bot {
            return;
        }

        let text = tg.text.as_deref().or(tg.caption.as_deref()).unwrap_or("");
        if text.trim_start().starts_with(COMMAND_PREFIX) {
            match Command::parse(text, COMMAND_PREFIX) {
                Some(command) => {
                    self.run_command(&tg.chat.id.to_string(), &from.id.to_string(), command)
                        .await
                }
                None => debug!(adapter = %self.name, "Ignoring unknown command: {}", text),
            }
            return;
        }

        let mut message = to_message(&tg);
        for (kind, file_id) in file_refs(&tg) {
            match self.api.file_url(&file_id).await {
                Ok(url) => message
                    .attachments_mut(kind)
                    .push(Attachment::new(file_id, url)),
                Err(e) => warn!(adapter = %self.name, file_id = %file_id, "Failed to resolve file: {}", e),
            }
        }

        if message.is_empty() {
            debug!(adapter = %self.name, message_id = %message.message_id, "Skipping empty message");
            return;
        }

        debug!(
            adapter = %self.name,
            chat_id = %message.chat_id,
            message_id = %message.message_id,
            "Telegram message accepted"
        );
        if let Err(e) = self.outbound.send(&message).await {
            error!(
                adapter = %self.name,
                queue = self.outbound.name(),
                "Failed to publish message: {}",
                e
            );
        }
    }

    async fn run_command(&self, chat_id: &str, sender_id: &str, command: Command) {
        let ctx = CommandContext {
            store: &self.store,
            hub_chat: &self.config.hub_chat,
            admin_chats: &self.config.admin_chats,
            moderation: self.config.moderation,
            prefix: COMMAND_PREFIX,
        };
        info!(adapter = %self.name, chat_id, sender_id, ?command, "Running command");
        let outcome = commands::execute(&ctx, chat_id, sender_id, command);
        self.send_outcome(chat_id, outcome).await;
    }

    async fn send_outcome(&self, chat_id: &str, outcome: CommandOutcome) {
        let mut sends: Vec<(&str, &str)> = outcome
            .replies
            .iter()
            .map(|reply| (chat_id, reply.as_str()))
            .collect();
        if let Some(text) = &outcome.notify_admins {
            sends.extend(self.config.admin_chats.iter().map(|admin| (admin.as_str(), text.as_str())));
        }
        sends.extend(
            outcome
                .notify_chats
                .iter()
                .map(|(chat, text)| (chat.as_str(), text.as_str())),
        );

        for (target, text) in sends {
            if let Err(e) = self.api.send_message(target, text).await {
                warn!(adapter = %self.name, chat_id = target, "Failed to send command reply: {}", e);
            }
        }
    }
}

#[async_trait]
impl Endpoint for TelegramAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let me = self.api.get_me().await.context("Telegram getMe failed")?;
        info!(
            adapter = %self.name,
            bot = me.username.as_deref().unwrap_or(&me.first_name),
            "Telegram bot connected"
        );

        let mut offset = 0;
        let mut backoff = poll_backoff();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let polled = tokio::select! {
                polled = self.api.get_updates(offset) => polled,
                _ = shutdown.changed() => break,
            };

            match polled {
                Ok(updates) => {
                    backoff = poll_backoff();
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        self.handle_update(update).await;
                    }
                }
                Err(e) => {
                    let delay = backoff.next().unwrap_or(Duration::from_secs(60));
                    warn!(
                        adapter = %self.name,
                        "getUpdates failed, retrying in {:.1}s: {}",
                        delay.as_secs_f64(),
                        e
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        info!(adapter = %self.name, "Telegram polling stopped");
        Ok(())
    }

    async fn deliver(&self, message: Message) -> DeliveryReport {
        deliver(&self.store, &Limits::TELEGRAM, self, &message).await
    }
}

#[async_trait]
impl Outbound for TelegramAdapter {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), SendError> {
        self.api
            .send_message(recipient, text)
            .await
            .map_err(|e| e.into_send_error(recipient))
    }

    async fn send_batch(
        &self,
        recipient: &str,
        kind: AttachmentKind,
        batch: &[Attachment],
    ) -> Result<(), SendError> {
        self.api
            .send_attachments(recipient, kind, batch)
            .await
            .map_err(|e| e.into_send_error(recipient))
    }
}

/// Canonical message without attachments.
fn to_message(tg: &TgMessage) -> Message {
    let (user_id, username) = match &tg.from {
        Some(user) => (
            user.id.to_string(),
            user.username.clone().unwrap_or_else(|| user.first_name.clone()),
        ),
        None => (String::new(), String::new()),
    };
    let body = tg.text.clone().or_else(|| tg.caption.clone()).unwrap_or_default();

    let mut message = Message::text(
        Messenger::Telegram,
        tg.message_id.to_string(),
        tg.chat.id.to_string(),
        user_id,
        username,
        body,
    );
    message.timestamp = DateTime::from_timestamp(tg.date, 0).unwrap_or_else(Utc::now);
    message.reply_to_id = tg
        .reply_to_message
        .as_ref()
        .map(|reply| reply.message_id.to_string());
    message
}

/// File ids carried by a message, with the category each belongs to.
///
/// Only the largest photo size is kept. Voice notes count as audio.
fn file_refs(tg: &TgMessage) -> Vec<(AttachmentKind, String)> {
    let mut refs = Vec::new();

    if let Some(photo) = tg
        .photo
        .iter()
        .max_by_key(|size| u64::from(size.width) * u64::from(size.height))
    {
        refs.push((AttachmentKind::Image, photo.file_id.clone()));
    }
    for audio in [&tg.audio, &tg.voice].into_iter().flatten() {
        refs.push((AttachmentKind::Audio, audio.file_id.clone()));
    }
    if let Some(video) = &tg.video {
        refs.push((AttachmentKind::Video, video.file_id.clone()));
    }
    if let Some(animation) = &tg.animation {
        refs.push((AttachmentKind::Animation, animation.file_id.clone()));
    } else if let Some(document) = &tg.document {
        // Animations also arrive with a document copy
        refs.push((AttachmentKind::Document, document.file_id.clone()));
    }
    if let Some(sticker) = &tg.sticker {
        let kind = if sticker.is_animated || sticker.is_video {
            AttachmentKind::AnimatedSticker
        } else {
            AttachmentKind::Sticker
        };
        refs.push((kind, sticker.file_id.clone()));
    }

    refs
}
