//! Configuration type definitions.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

use crate::common::message::Messenger;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory for routing files and queue databases.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    pub bridges: Vec<BridgeConfig>,
}

fn default_data_dir() -> String {
    "data".to_string()
}

/// One bridge: two adapters and the queues between them.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub name: String,
    #[serde(default)]
    pub transport: TransportConfig,
    pub left: EndpointConfig,
    pub right: EndpointConfig,
}

/// Queue backend selection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransportConfig {
    #[serde(default, deserialize_with = "from_name")]
    pub kind: TransportKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
    #[default]
    Sqlite,
    Memory,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(TransportKind::Sqlite),
            "memory" => Ok(TransportKind::Memory),
            other => Err(format!("unknown transport kind '{}'", other)),
        }
    }
}

/// Settings for one side of a bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    #[serde(deserialize_with = "from_name")]
    pub kind: Messenger,
    pub token: String,
    /// Chat on the opposite network that this side's users connect to.
    pub hub_chat: String,
    /// User ids allowed to run admin commands.
    #[serde(default)]
    pub admin_chats: Vec<String>,
    /// Require admin approval before the first `connect`.
    #[serde(default = "default_moderation")]
    pub moderation: bool,
}

fn default_moderation() -> bool {
    true
}

/// Deserialize a kind name through its `FromStr` impl.
fn from_name<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let name = String::deserialize(deserializer)?;
    name.parse().map_err(serde::de::Error::custom)
}

impl Config {
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }
}

impl BridgeConfig {
    /// Routing file of this bridge.
    pub fn routing_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(format!("{}.json", self.name))
    }

    /// SQLite file holding both queues of this bridge.
    pub fn queue_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(format!("{}.queue.sqlite3", self.name))
    }

    /// Queue carrying messages produced by the left adapter.
    pub fn left_queue_name(&self) -> String {
        format!("{}_queue_left", self.name)
    }

    /// Queue carrying messages produced by the right adapter.
    pub fn right_queue_name(&self) -> String {
        format!("{}_queue_right", self.name)
    }
}
