//! Telegram adapter.
//!
//! - `api`: Bot API client and wire types (reqwest + serde)
//! - `adapter`: long-polling ingestion, commands and delivery

pub mod adapter;
pub mod api;

pub use adapter::TelegramAdapter;
