//! Relay engine between the two sides of a bridge.
//!
//! ## Module Structure
//!
//! - `chunking`: per-destination text and attachment size limits
//! - `delivery`: fan-out of one message to the recipients of its source chat
//! - `commands`: chat commands shared by both adapters
//! - `endpoint`: the adapter trait the orchestrator drives
//! - `orchestrator`: the `Bridge` that runs adapters and forwarders

pub mod chunking;
pub mod commands;
pub mod delivery;
pub mod endpoint;
pub mod orchestrator;

pub use chunking::Limits;
pub use commands::{Command, CommandContext, CommandOutcome};
pub use delivery::{deliver, DeliveryReport, Outbound};
pub use endpoint::Endpoint;
pub use orchestrator::Bridge;
