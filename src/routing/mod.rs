//! Chat routing state.
//!
//! - `store`: persistent graph of linked chats plus ban, moderation and
//!   nickname state shared by every component of one bridge.

pub mod store;

pub use store::{ChatEntry, RoutingStore, NO_NICK};
