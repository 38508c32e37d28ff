//! Per-direction message queues between the two sides of a bridge.
//!
//! ## Module Structure
//!
//! - `memory`: in-process queue (tests, `transport.kind = "memory"`)
//! - `sqlite`: durable queue stored in a SQLite file
//!
//! Producers call [`Transport::send`]. The single consumer of a queue drains
//! it through [`receive`], which turns the backend's pop/wait primitives into
//! an endless stream that retries backend errors with exponential backoff and
//! only ends on shutdown.

pub mod memory;
pub mod sqlite;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::BackoffBuilder;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::common::error::TransportResult;
use crate::common::message::Message;

pub use memory::MemoryQueue;
pub use sqlite::SqliteQueue;

/// A named FIFO queue of serialized messages.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Queue name, for logging.
    fn name(&self) -> &str;

    /// Append a message to the tail of the queue.
    async fn send(&self, message: &Message) -> TransportResult<()>;

    /// Remove and return the oldest payload, if any.
    async fn pop(&self) -> TransportResult<Option<String>>;

    /// Suspend until new items may be available.
    async fn wait(&self);

    /// Counters for this queue.
    fn stats(&self) -> &QueueStats;
}

/// Observable queue counters.
#[derive(Debug, Default)]
pub struct QueueStats {
    sent: AtomicU64,
    received: AtomicU64,
    errors: AtomicU64,
    dropped: AtomicU64,
}

impl QueueStats {
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a transient backend error. Returns the new total.
    pub fn record_error(&self) -> u64 {
        self.errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Transient backend errors retried so far.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Payloads discarded because they could not be decoded.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Backoff applied between retries of a failing queue backend.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Exponential, jittered, unlimited retries capped at `max_delay`.
    fn backoff(&self) -> impl Iterator<Item = Duration> {
        backon::ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_jitter()
            .without_max_times()
            .build()
    }
}

/// Drain `queue` as a stream of messages until `shutdown` flips to true.
pub fn receive(
    queue: Arc<dyn Transport>,
    shutdown: watch::Receiver<bool>,
) -> BoxStream<'static, Message> {
    receive_with(queue, shutdown, RetryPolicy::default())
}

/// [`receive`] with an explicit retry policy.
pub fn receive_with(
    queue: Arc<dyn Transport>,
    shutdown: watch::Receiver<bool>,
    policy: RetryPolicy,
) -> BoxStream<'static, Message> {
    stream::unfold((queue, shutdown), move |(queue, mut shutdown)| async move {
        let message = next_message(queue.as_ref(), &mut shutdown, policy).await?;
        Some((message, (queue, shutdown)))
    })
    .boxed()
}

async fn next_message(
    queue: &dyn Transport,
    shutdown: &mut watch::Receiver<bool>,
    policy: RetryPolicy,
) -> Option<Message> {
    let mut backoff = policy.backoff();

    loop {
        if *shutdown.borrow() {
            debug!(queue = queue.name(), "Queue consumer stopping");
            return None;
        }

        match queue.pop().await {
            Ok(Some(raw)) => {
                backoff = policy.backoff();
                match Message::from_json(&raw) {
                    Ok(message) => {
                        queue.stats().record_received();
                        return Some(message);
                    }
                    Err(e) => {
                        queue.stats().record_dropped();
                        warn!(queue = queue.name(), "Dropping undecodable queue item: {}", e);
                    }
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = queue.wait() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                    }
                }
            }
            Err(e) => {
                let errors = queue.stats().record_error();
                let delay = backoff.next().unwrap_or(policy.max_delay);
                warn!(
                    queue = queue.name(),
                    errors,
                    "Queue read failed, retrying in {:.1}s: {}",
                    delay.as_secs_f64(),
                    e
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                    }
                }
            }
        }
    }
}
