//! Discord adapter.
//!
//! Bridges Discord channels through a serenity gateway client (ingestion
//! and `!` commands) and the serenity HTTP client (delivery).

pub mod adapter;

pub use adapter::DiscordAdapter;
