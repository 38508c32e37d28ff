//! The two sides of a bridge.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::common::message::Message;

use super::delivery::DeliveryReport;

/// One side of a bridge: a running platform adapter.
///
/// `run` ingests platform events (publishing accepted messages to the
/// outbound queue) until `shutdown` flips to true. `deliver` fans a message
/// from the other side out to this platform.
#[async_trait]
pub trait Endpoint: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()>;

    async fn deliver(&self, message: Message) -> DeliveryReport;
}
