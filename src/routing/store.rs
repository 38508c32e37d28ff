//! File-backed routing store.
//!
//! Holds the symmetric chat connection graph, ban and moderation sets and
//! the nickname map for one bridge. Every mutation rewrites the whole JSON
//! document through a temp file and rename, while still holding the lock,
//! so concurrent callers never interleave read-modify-write cycles.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common::error::{StoreError, StoreResult};

/// Placeholder nickname for chats that never set one.
pub const NO_NICK: &str = "no nick";

/// On-disk layout of the routing file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct RoutingData {
    #[serde(default)]
    recipients_map: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    nickname_map: BTreeMap<String, String>,
    #[serde(default)]
    banned_users: BTreeSet<String>,
    #[serde(default)]
    on_moderation: BTreeSet<String>,
    #[serde(default)]
    moderated_users: BTreeSet<String>,
}

impl RoutingData {
    fn link(&mut self, a: &str, b: &str) {
        self.recipients_map
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string());
        self.recipients_map
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string());
    }

    fn unlink(&mut self, a: &str, b: &str) -> bool {
        let removed = self.remove_edge(a, b);
        // Always clean the reverse side too, the graph may be lopsided after
        // a partial failure.
        self.remove_edge(b, a) || removed
    }

    fn remove_edge(&mut self, from: &str, to: &str) -> bool {
        let Some(targets) = self.recipients_map.get_mut(from) else {
            return false;
        };
        let removed = targets.remove(to);
        if targets.is_empty() {
            self.recipients_map.remove(from);
        }
        removed
    }

    fn nickname_or_default(&self, chat_id: &str) -> String {
        self.nickname_map
            .get(chat_id)
            .cloned()
            .unwrap_or_else(|| NO_NICK.to_string())
    }
}

/// A chat id with its display nickname, as shown by list commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub chat_id: String,
    pub nickname: String,
}

/// Routing store shared by the adapters and forwarding tasks of one bridge.
#[derive(Debug)]
pub struct RoutingStore {
    /// Routing file path (None = in-memory only).
    path: Option<PathBuf>,
    data: Mutex<RoutingData>,
}

impl RoutingStore {
    /// Open the routing file at `path`, starting empty if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let data = load(&path)?;

        info!(
            path = %path.display(),
            chats = data.recipients_map.len(),
            banned = data.banned_users.len(),
            pending = data.on_moderation.len(),
            "Routing state loaded"
        );

        Ok(Self {
            path: Some(path),
            data: Mutex::new(data),
        })
    }

    /// Create a store that never touches the disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(RoutingData::default()),
        }
    }

    /// Path of the routing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // ============================================================
    // Queries
    // ============================================================

    /// Chats that messages from `chat_id` are forwarded to.
    pub fn recipients(&self, chat_id: &str) -> BTreeSet<String> {
        self.lock()
            .recipients_map
            .get(chat_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn nickname(&self, chat_id: &str) -> Option<String> {
        self.lock().nickname_map.get(chat_id).cloned()
    }

    pub fn is_banned(&self, chat_id: &str) -> bool {
        self.lock().banned_users.contains(chat_id)
    }

    /// True once the chat has been approved at least once.
    pub fn is_moderated(&self, chat_id: &str) -> bool {
        self.lock().moderated_users.contains(chat_id)
    }

    /// True while the chat is waiting for approval.
    pub fn is_pending(&self, chat_id: &str) -> bool {
        self.lock().on_moderation.contains(chat_id)
    }

    /// Chats currently linked to `owner_chat_id`.
    pub fn list_connected(&self, owner_chat_id: &str) -> Vec<ChatEntry> {
        let data = self.lock();
        data.recipients_map
            .get(owner_chat_id)
            .into_iter()
            .flatten()
            .map(|chat_id| ChatEntry {
                chat_id: chat_id.clone(),
                nickname: data.nickname_or_default(chat_id),
            })
            .collect()
    }

    /// Chats waiting for moderation.
    pub fn list_pending(&self) -> Vec<ChatEntry> {
        let data = self.lock();
        data.on_moderation
            .iter()
            .map(|chat_id| ChatEntry {
                chat_id: chat_id.clone(),
                nickname: data.nickname_or_default(chat_id),
            })
            .collect()
    }

    /// Every nickname that has been set.
    pub fn list_nicknames(&self) -> Vec<ChatEntry> {
        self.lock()
            .nickname_map
            .iter()
            .map(|(chat_id, nickname)| ChatEntry {
                chat_id: chat_id.clone(),
                nickname: nickname.clone(),
            })
            .collect()
    }

    // ============================================================
    // Mutations
    // ============================================================

    pub fn set_nickname(&self, chat_id: &str, nickname: &str) -> StoreResult<()> {
        self.mutate(|data| {
            data.nickname_map
                .insert(chat_id.to_string(), nickname.to_string());
            Ok(())
        })
    }

    /// Link `chat_id` and `target_chat_id` in both directions.
    ///
    /// Fails with `StoreError::Banned` if either side is banned.
    pub fn connect(&self, chat_id: &str, target_chat_id: &str) -> StoreResult<()> {
        self.mutate(|data| {
            for id in [chat_id, target_chat_id] {
                if data.banned_users.contains(id) {
                    return Err(StoreError::Banned {
                        chat_id: id.to_string(),
                    });
                }
            }
            data.link(chat_id, target_chat_id);
            debug!(chat_id, target_chat_id, "Chats connected");
            Ok(())
        })
    }

    /// Remove the link between `chat_id` and `target_chat_id`, if any.
    pub fn disconnect(&self, chat_id: &str, target_chat_id: &str) -> StoreResult<()> {
        self.mutate(|data| {
            if data.unlink(chat_id, target_chat_id) {
                debug!(chat_id, target_chat_id, "Chats disconnected");
            }
            Ok(())
        })
    }

    /// Ban a chat and drop every link it has.
    pub fn ban(&self, chat_id: &str) -> StoreResult<()> {
        self.mutate(|data| {
            data.banned_users.insert(chat_id.to_string());
            data.on_moderation.remove(chat_id);

            let targets = data.recipients_map.get(chat_id).cloned().unwrap_or_default();
            for target in &targets {
                data.unlink(chat_id, target);
            }
            // Lopsided leftovers pointing at the banned chat
            for linked in data.recipients_map.values_mut() {
                linked.remove(chat_id);
            }
            data.recipients_map.retain(|_, linked| !linked.is_empty());
            info!(chat_id, dropped_links = targets.len(), "Chat banned");
            Ok(())
        })
    }

    /// Lift a ban. Previous links are not restored.
    pub fn unban(&self, chat_id: &str) -> StoreResult<()> {
        self.mutate(|data| {
            data.banned_users.remove(chat_id);
            info!(chat_id, "Chat unbanned");
            Ok(())
        })
    }

    /// Put a chat on the moderation queue.
    pub fn moderate(&self, chat_id: &str) -> StoreResult<()> {
        self.mutate(|data| {
            data.on_moderation.insert(chat_id.to_string());
            Ok(())
        })
    }

    /// Approve a pending chat and connect it to `target_chat_id`.
    pub fn approve(&self, chat_id: &str, target_chat_id: &str) -> StoreResult<()> {
        self.mutate(|data| {
            for id in [chat_id, target_chat_id] {
                if data.banned_users.contains(id) {
                    return Err(StoreError::Banned {
                        chat_id: id.to_string(),
                    });
                }
            }
            data.on_moderation.remove(chat_id);
            data.moderated_users.insert(chat_id.to_string());
            data.link(chat_id, target_chat_id);
            info!(chat_id, target_chat_id, "Chat approved");
            Ok(())
        })
    }

    // ============================================================
    // Internals
    // ============================================================

    fn lock(&self) -> MutexGuard<'_, RoutingData> {
        // A panic mid-mutation leaves valid (if partial) data behind; keep serving it.
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `operation` and rewrite the routing file.
    ///
    /// On a write failure the in-memory change is kept and the error is
    /// returned; the next successful write flushes it.
    fn mutate<T>(
        &self,
        operation: impl FnOnce(&mut RoutingData) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut data = self.lock();
        let result = operation(&mut data)?;
        if let Some(path) = &self.path {
            persist(path, &data)?;
        }
        Ok(result)
    }
}

fn load(path: &Path) -> StoreResult<RoutingData> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No routing file, starting fresh");
            return Ok(RoutingData::default());
        }
        Err(e) => {
            return Err(StoreError::Load {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        }
    };

    serde_json::from_str(&raw).map_err(|e| StoreError::Load {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Atomic write: temp file + rename.
fn persist(path: &Path, data: &RoutingData) -> StoreResult<()> {
    let payload = serde_json::to_vec(data)?;
    let io_err = |source: std::io::Error| StoreError::Persist {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, payload).map_err(io_err)?;
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(io_err(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ids(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_connect_is_symmetric() {
        let store = RoutingStore::in_memory();
        store.connect("tg:1", "dc:9").unwrap();

        assert_eq!(store.recipients("tg:1"), ids(&["dc:9"]));
        assert_eq!(store.recipients("dc:9"), ids(&["tg:1"]));
    }

    #[test]
    fn test_disconnect_removes_both_directions() {
        let store = RoutingStore::in_memory();
        store.connect("a", "b").unwrap();
        store.connect("a", "c").unwrap();
        store.disconnect("a", "b").unwrap();

        assert_eq!(store.recipients("a"), ids(&["c"]));
        assert!(store.recipients("b").is_empty());
    }

    #[test]
    fn test_connect_idempotent_and_disconnect_noop() {
        let once = RoutingStore::in_memory();
        once.connect("x", "y").unwrap();

        let twice = RoutingStore::in_memory();
        twice.connect("x", "y").unwrap();
        twice.connect("x", "y").unwrap();
        assert_eq!(*once.lock(), *twice.lock());

        let before = twice.lock().clone();
        twice.disconnect("x", "missing").unwrap();
        twice.disconnect("nobody", "y").unwrap();
        assert_eq!(*twice.lock(), before);
    }

    #[test]
    fn test_missing_chat_reads_as_empty() {
        let store = RoutingStore::in_memory();
        assert!(store.recipients("ghost").is_empty());
        assert!(store.list_connected("ghost").is_empty());
        assert_eq!(store.nickname("ghost"), None);
    }

    #[test]
    fn test_ban_cascades_and_blocks_reconnect() {
        let store = RoutingStore::in_memory();
        store.connect("x", "hub").unwrap();
        store.connect("x", "other").unwrap();
        store.connect("y", "hub").unwrap();

        store.ban("x").unwrap();

        assert!(store.is_banned("x"));
        assert!(store.recipients("x").is_empty());
        assert_eq!(store.recipients("hub"), ids(&["y"]));
        assert!(store.recipients("other").is_empty());

        let err = store.connect("x", "hub").unwrap_err();
        assert!(matches!(err, StoreError::Banned { ref chat_id } if chat_id == "x"));
        // Banned target is refused as well
        assert!(store.connect("hub", "x").is_err());
    }

    #[test]
    fn test_unban_does_not_restore_links() {
        let store = RoutingStore::in_memory();
        store.connect("x", "hub").unwrap();
        store.ban("x").unwrap();
        store.unban("x").unwrap();

        assert!(!store.is_banned("x"));
        assert!(store.recipients("x").is_empty());
        store.connect("x", "hub").unwrap();
        assert_eq!(store.recipients("hub"), ids(&["x"]));
    }

    #[test]
    fn test_moderation_flow() {
        let store = RoutingStore::in_memory();
        store.moderate("newbie").unwrap();

        assert!(store.is_pending("newbie"));
        assert!(!store.is_moderated("newbie"));
        assert!(store.recipients("newbie").is_empty());
        assert_eq!(
            store.list_pending(),
            vec![ChatEntry {
                chat_id: "newbie".to_string(),
                nickname: NO_NICK.to_string()
            }]
        );

        store.approve("newbie", "hub").unwrap();
        assert!(!store.is_pending("newbie"));
        assert!(store.is_moderated("newbie"));
        assert_eq!(store.recipients("hub"), ids(&["newbie"]));

        // Approval survives a disconnect
        store.disconnect("newbie", "hub").unwrap();
        assert!(store.is_moderated("newbie"));
        assert!(store.list_pending().is_empty());
    }

    #[test]
    fn test_approve_banned_chat_refused() {
        let store = RoutingStore::in_memory();
        store.moderate("spam").unwrap();
        store.ban("spam").unwrap();

        assert!(store.approve("spam", "hub").is_err());
        assert!(!store.is_moderated("spam"));
        assert!(store.recipients("hub").is_empty());
    }

    #[test]
    fn test_lists_use_nicknames() {
        let store = RoutingStore::in_memory();
        store.connect("1", "hub").unwrap();
        store.connect("2", "hub").unwrap();
        store.set_nickname("2", "Bob").unwrap();
        store.set_nickname("3", "Carol").unwrap();

        let connected = store.list_connected("hub");
        assert_eq!(connected.len(), 2);
        assert_eq!(connected[0].nickname, NO_NICK);
        assert_eq!(connected[1].nickname, "Bob");

        let nicks: Vec<_> = store
            .list_nicknames()
            .into_iter()
            .map(|e| (e.chat_id, e.nickname))
            .collect();
        assert_eq!(
            nicks,
            vec![
                ("2".to_string(), "Bob".to_string()),
                ("3".to_string(), "Carol".to_string())
            ]
        );

        store.set_nickname("2", "Robert").unwrap();
        assert_eq!(store.nickname("2").as_deref(), Some("Robert"));
    }

    #[test]
    fn test_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.json");

        {
            let store = RoutingStore::open(&path).unwrap();
            store.connect("a", "hub").unwrap();
            store.set_nickname("a", "Alice").unwrap();
            store.moderate("b").unwrap();
            store.ban("c").unwrap();
        }

        assert!(!path.with_extension("json.tmp").exists());

        let reopened = RoutingStore::open(&path).unwrap();
        assert_eq!(reopened.recipients("hub"), ids(&["a"]));
        assert_eq!(reopened.nickname("a").as_deref(), Some("Alice"));
        assert!(reopened.is_pending("b"));
        assert!(reopened.is_banned("c"));
    }

    #[test]
    fn test_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.json");
        let store = RoutingStore::open(&path).unwrap();
        store.connect("a", "b").unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["recipients_map"]["a"], serde_json::json!(["b"]));
        assert_eq!(raw["recipients_map"]["b"], serde_json::json!(["a"]));
        assert!(raw["nickname_map"].is_object());
        for key in ["banned_users", "on_moderation", "moderated_users"] {
            assert!(raw[key].is_array(), "{} should be an array", key);
        }
    }

    #[test]
    fn test_loads_partial_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.json");
        std::fs::write(&path, r#"{"recipients_map": {"a": ["b"]}}"#).unwrap();

        let store = RoutingStore::open(&path).unwrap();
        // Lopsided entry from a partial failure is tolerated
        assert_eq!(store.recipients("a"), ids(&["b"]));
        assert!(store.recipients("b").is_empty());
        store.disconnect("a", "b").unwrap();
        assert!(store.recipients("a").is_empty());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            RoutingStore::open(&path),
            Err(StoreError::Load { .. })
        ));
    }

    #[test]
    fn test_persist_failure_propagates_and_keeps_memory() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("state");
        let path = parent.join("bridge.json");
        let store = RoutingStore::open(&path).unwrap();

        // A regular file where the parent directory should be
        std::fs::write(&parent, "").unwrap();
        let err = store.connect("a", "b").unwrap_err();

        assert!(matches!(err, StoreError::Persist { .. }));
        assert_eq!(store.recipients("a"), ids(&["b"]));
    }

    #[test]
    fn test_concurrent_mutations_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.json");
        let store = Arc::new(RoutingStore::open(&path).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for j in 0..10 {
                        store
                            .connect(&format!("chat-{}-{}", i, j), "hub")
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.recipients("hub").len(), 80);
        let reopened = RoutingStore::open(&path).unwrap();
        assert_eq!(reopened.recipients("hub").len(), 80);
    }
}
