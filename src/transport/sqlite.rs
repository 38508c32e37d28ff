//! Durable transport queue backed by SQLite.
//!
//! Several named queues can share one database file; each row belongs to one
//! queue and rows are consumed in insertion order. A pop selects and deletes
//! the oldest row in one transaction, so an item is gone from disk before it
//! is handed to the consumer.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::common::error::TransportResult;
use crate::common::message::Message;

use super::{QueueStats, Transport};

/// How often an idle consumer re-checks the table without a local notification.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct SqliteQueue {
    name: String,
    conn: Arc<Mutex<Connection>>,
    notify: Notify,
    stats: QueueStats,
}

impl SqliteQueue {
    /// Open (or create) queue `name` in the database at `path`.
    pub fn open(path: impl AsRef<Path>, name: impl Into<String>) -> TransportResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let queue = Self::with_connection(conn, name)?;
        info!(queue = %queue.name, path = %path.display(), "Opened SQLite queue");
        Ok(queue)
    }

    /// Queue over a private in-memory database.
    pub fn open_in_memory(name: impl Into<String>) -> TransportResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, name)
    }

    fn with_connection(conn: Connection, name: impl Into<String>) -> TransportResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS queue_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                queue TEXT NOT NULL,
                payload TEXT NOT NULL,
                enqueued_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_queue_items_queue ON queue_items(queue, id);",
        )?;

        Ok(Self {
            name: name.into(),
            conn: Arc::new(Mutex::new(conn)),
            notify: Notify::new(),
            stats: QueueStats::default(),
        })
    }

    /// Number of items waiting in this queue.
    pub async fn len(&self) -> TransportResult<usize> {
        let name = self.name.clone();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM queue_items WHERE queue = ?1",
                params![name],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }

    /// Run a blocking database operation off the async executor.
    async fn with_conn<T, F>(&self, operation: F) -> TransportResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> TransportResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            operation(&mut conn)
        })
        .await?
    }
}

#[async_trait]
impl Transport for SqliteQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &Message) -> TransportResult<()> {
        let payload = message.to_json()?;
        let name = self.name.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO queue_items (queue, payload, enqueued_at) VALUES (?1, ?2, ?3)",
                params![name, payload, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await?;

        self.stats.record_sent();
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self) -> TransportResult<Option<String>> {
        let name = self.name.clone();
        let item = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let row: Option<(i64, String)> = tx
                    .query_row(
                        "SELECT id, payload FROM queue_items WHERE queue = ?1 ORDER BY id LIMIT 1",
                        params![name],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;

                let Some((id, payload)) = row else {
                    return Ok(None);
                };
                tx.execute("DELETE FROM queue_items WHERE id = ?1", params![id])?;
                tx.commit()?;
                Ok(Some((id, payload)))
            })
            .await?;

        Ok(item.map(|(id, payload)| {
            debug!(queue = %self.name, id, "Popped queue item");
            payload
        }))
    }

    async fn wait(&self) {
        tokio::select! {
            _ = self.notify.notified() => {}
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }

    fn stats(&self) -> &QueueStats {
        &self.stats
    }
}
