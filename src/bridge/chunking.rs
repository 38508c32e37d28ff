//! Splitting outgoing content into destination-sized pieces.
//!
//! Text is cut into slices of at most `text_chars` characters, the first one
//! carrying a `"{nickname} [{origin}]\n"` header. The first slice gives up as
//! many characters as the header takes when the two together would pass the
//! destination's hard cap. Each attachment category is cut into batches no
//! larger than what the destination accepts in one send.

use crate::common::message::{Attachment, AttachmentKind, Message, Messenger};

/// Per-destination size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Max body characters per text message.
    pub text_chars: usize,
    /// Hard cap of the destination API on one text message, header included.
    pub text_cap: usize,
    pub images: usize,
    pub audios: usize,
    pub videos: usize,
    pub animations: usize,
    pub documents: usize,
    pub stickers: usize,
    pub animated_stickers: usize,
}

impl Limits {
    /// Telegram: 4096 char messages (4000 leaves room), media groups of 10,
    /// animations and stickers cannot be grouped.
    pub const TELEGRAM: Limits = Limits {
        text_chars: 4000,
        text_cap: 4096,
        images: 10,
        audios: 10,
        videos: 10,
        animations: 1,
        documents: 10,
        stickers: 1,
        animated_stickers: 1,
    };

    /// Discord: 2000 char messages, 10 files per message.
    pub const DISCORD: Limits = Limits {
        text_chars: 2000,
        text_cap: 2000,
        images: 10,
        audios: 10,
        videos: 10,
        animations: 10,
        documents: 10,
        stickers: 10,
        animated_stickers: 10,
    };

    /// Limits for a destination network.
    pub fn for_messenger(messenger: Messenger) -> Self {
        match messenger {
            Messenger::Telegram => Self::TELEGRAM,
            Messenger::Discord => Self::DISCORD,
        }
    }

    /// Max items of `kind` per batched send.
    pub fn batch_size(&self, kind: AttachmentKind) -> usize {
        match kind {
            AttachmentKind::Image => self.images,
            AttachmentKind::Audio => self.audios,
            AttachmentKind::Video => self.videos,
            AttachmentKind::Animation => self.animations,
            AttachmentKind::Document => self.documents,
            AttachmentKind::Sticker => self.stickers,
            AttachmentKind::AnimatedSticker => self.animated_stickers,
        }
    }
}

/// One unit of outgoing content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing<'a> {
    Text(String),
    Batch(AttachmentKind, &'a [Attachment]),
}

/// Nicknames longer than this are cut in the header.
pub const NICKNAME_CHARS: usize = 64;

/// Split `items` into contiguous batches of at most `limit` items.
///
/// Returns `ceil(len / limit)` batches and nothing for empty input.
pub fn batches<T>(items: &[T], limit: usize) -> Vec<&[T]> {
    items.chunks(limit.max(1)).collect()
}

/// Header placed before the first text slice.
pub fn header(nickname: &str, origin: Messenger) -> String {
    let nickname: String = nickname.chars().take(NICKNAME_CHARS).collect();
    format!("{} [{}]\n", nickname, origin)
}

/// Split `text` into contiguous slices of at most `limit` characters.
///
/// Always returns at least one slice; empty input yields one empty slice.
/// A zero limit is treated as one.
pub fn split_text(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars.chunks(limit).map(|chunk| chunk.iter().collect()).collect()
}

/// Everything to send for `message`, in order: text slices, then attachment
/// batches category by category.
pub fn plan<'a>(message: &'a Message, nickname: &str, limits: &Limits) -> Vec<Outgoing<'a>> {
    let header = header(nickname, message.origin);
    let slice_chars = limits.text_chars.min(limits.text_cap);
    let first_chars = slice_chars.min(limits.text_cap.saturating_sub(header.chars().count()));

    let body: Vec<char> = message.body.chars().collect();
    let cut = first_chars.max(1).min(body.len());
    let first: String = body[..cut].iter().collect();
    let rest: String = body[cut..].iter().collect();

    let mut parts = vec![Outgoing::Text(format!("{}{}", header, first))];
    if !rest.is_empty() {
        parts.extend(split_text(&rest, slice_chars).into_iter().map(Outgoing::Text));
    }

    for kind in AttachmentKind::ALL {
        let limit = limits.batch_size(kind);
        parts.extend(
            batches(message.attachments(kind), limit)
                .into_iter()
                .map(|batch| Outgoing::Batch(kind, batch)),
        );
    }

    parts
}
