//! In-process transport queue.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::common::error::TransportResult;
use crate::common::message::Message;

use super::{QueueStats, Transport};

/// FIFO queue held in memory. Lost on restart.
pub struct MemoryQueue {
    name: String,
    items: Mutex<VecDeque<String>>,
    notify: Notify,
    stats: QueueStats,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            stats: QueueStats::default(),
        }
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Transport for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &Message) -> TransportResult<()> {
        let payload = message.to_json()?;
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(payload);
        self.stats.record_sent();
        // Single consumer; a stored permit covers a send racing the wait.
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self) -> TransportResult<Option<String>> {
        Ok(self
            .items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front())
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }

    fn stats(&self) -> &QueueStats {
        &self.stats
    }
}
