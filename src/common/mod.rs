//! Common types shared across the application.

pub mod error;
pub mod message;
