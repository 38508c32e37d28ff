//! Bridge orchestrator: runs both adapters and both forwarding directions.
//!
//! A bridge owns four concurrent units:
//!
//! 1. the left adapter's ingestion loop
//! 2. the right adapter's ingestion loop
//! 3. left -> right forwarding (drains the left queue into the right adapter)
//! 4. right -> left forwarding (drains the right queue into the left adapter)
//!
//! Each forwarder handles one message at a time, so every direction keeps its
//! queue order. The two directions are independent of each other.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::transport::{self, Transport};

use super::endpoint::Endpoint;

pub struct Bridge {
    name: String,
    left: Arc<dyn Endpoint>,
    right: Arc<dyn Endpoint>,
    /// Messages produced by the left adapter, consumed by the right one.
    left_to_right: Arc<dyn Transport>,
    /// Messages produced by the right adapter, consumed by the left one.
    right_to_left: Arc<dyn Transport>,
}

impl Bridge {
    pub fn new(
        name: impl Into<String>,
        left: Arc<dyn Endpoint>,
        right: Arc<dyn Endpoint>,
        left_to_right: Arc<dyn Transport>,
        right_to_left: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name: name.into(),
            left,
            right,
            left_to_right,
            right_to_left,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run until all four units have terminated.
    ///
    /// Units stop when `shutdown` flips to true. An adapter that fails is
    /// logged and does not take the other units down with it.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(
            bridge = %self.name,
            left = self.left.name(),
            right = self.right.name(),
            "Bridge starting"
        );

        let left_task = spawn_adapter(&self.name, Arc::clone(&self.left), shutdown.clone());
        let right_task = spawn_adapter(&self.name, Arc::clone(&self.right), shutdown.clone());
        let forward_right = spawn_forwarder(
            &self.name,
            Arc::clone(&self.left_to_right),
            Arc::clone(&self.right),
            shutdown.clone(),
        );
        let forward_left = spawn_forwarder(
            &self.name,
            Arc::clone(&self.right_to_left),
            Arc::clone(&self.left),
            shutdown,
        );

        let (left, right, to_right, to_left) =
            tokio::join!(left_task, right_task, forward_right, forward_left);

        for (unit, result) in [
            ("left adapter", left),
            ("right adapter", right),
            ("left -> right forwarder", to_right),
            ("right -> left forwarder", to_left),
        ] {
            if let Err(e) = result {
                error!(bridge = %self.name, "{} task panicked: {}", unit, e);
            }
        }

        for queue in [&self.left_to_right, &self.right_to_left] {
            let stats = queue.stats();
            info!(
                bridge = %self.name,
                queue = queue.name(),
                sent = stats.sent(),
                received = stats.received(),
                errors = stats.errors(),
                dropped = stats.dropped(),
                "Queue totals"
            );
        }

        info!(bridge = %self.name, "Bridge stopped");
    }
}

fn spawn_adapter(
    bridge: &str,
    endpoint: Arc<dyn Endpoint>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let bridge = bridge.to_string();
    tokio::spawn(async move {
        match endpoint.run(shutdown).await {
            Ok(()) => info!(bridge = %bridge, adapter = endpoint.name(), "Adapter stopped"),
            Err(e) => error!(bridge = %bridge, adapter = endpoint.name(), "Adapter failed: {:#}", e),
        }
    })
}

fn spawn_forwarder(
    bridge: &str,
    queue: Arc<dyn Transport>,
    target: Arc<dyn Endpoint>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let bridge = bridge.to_string();
    tokio::spawn(async move {
        let queue_name = queue.name().to_string();
        let mut messages = transport::receive(queue, shutdown);

        while let Some(message) = messages.next().await {
            let message_id = message.message_id.clone();
            let report = target.deliver(message).await;

            if report.is_success() {
                debug!(
                    bridge = %bridge,
                    queue = %queue_name,
                    message_id = %message_id,
                    delivered = report.delivered.len(),
                    disconnected = report.disconnected.len(),
                    "Forwarded message"
                );
            } else {
                warn!(
                    bridge = %bridge,
                    queue = %queue_name,
                    message_id = %message_id,
                    failed = report.failed.len(),
                    "Message not delivered to every recipient"
                );
            }
        }

        info!(bridge = %bridge, queue = %queue_name, "Forwarding ended");
    })
}
