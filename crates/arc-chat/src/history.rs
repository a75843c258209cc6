//! Per-chat conversation history storage

use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use arc_ai::Turn;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Identity a history is stored under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChatId {
    /// One-to-one chat with a user
    Private(String),
    /// Group chat, shared by all members
    Group(String),
}

impl ChatId {
    pub fn private(id: impl Into<String>) -> Self {
        Self::Private(id.into())
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self::Group(id.into())
    }

    /// The raw user or group id
    pub fn id(&self) -> &str {
        match self {
            ChatId::Private(id) | ChatId::Group(id) => id,
        }
    }

    /// `"private"` or `"group"`
    pub fn kind(&self) -> &'static str {
        match self {
            ChatId::Private(_) => "private",
            ChatId::Group(_) => "group",
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, ChatId::Private(_))
    }

    /// Relative storage path, e.g. `private/private_123.json`
    pub fn storage_key(&self) -> Result<PathBuf> {
        let id = self.id();
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(Error::InvalidChatId(self.to_string()));
        }
        Ok(Path::new(self.kind()).join(format!("{}_{}.json", self.kind(), id)))
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

impl FromStr for ChatId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some(("private", id)) if !id.is_empty() => Ok(ChatId::private(id)),
            Some(("group", id)) if !id.is_empty() => Ok(ChatId::group(id)),
            _ => Err(Error::InvalidChatId(s.to_string())),
        }
    }
}

/// Storage for chat histories
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Load the stored history, `None` when there is none
    async fn load(&self, chat: &ChatId) -> Result<Option<Vec<Turn>>>;

    /// Replace the stored history
    async fn save(&self, chat: &ChatId, turns: &[Turn]) -> Result<()>;

    /// Delete the stored history, returning whether anything was deleted
    async fn remove(&self, chat: &ChatId) -> Result<bool>;
}

/// One pretty-printed JSON file per chat under `<data_dir>/conversation`
#[derive(Debug, Clone)]
pub struct JsonHistoryStore {
    root: PathBuf,
}

impl JsonHistoryStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            root: data_dir.as_ref().join("conversation"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the history file for a chat
    pub fn path_for(&self, chat: &ChatId) -> Result<PathBuf> {
        Ok(self.root.join(chat.storage_key()?))
    }
}

#[async_trait]
impl HistoryStore for JsonHistoryStore {
    async fn load(&self, chat: &ChatId) -> Result<Option<Vec<Turn>>> {
        let path = self.path_for(chat)?;
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&raw) {
            Ok(turns) => Ok(Some(turns)),
            Err(e) => {
                warn!(
                    chat = %chat,
                    path = %path.display(),
                    error = %e,
                    "Corrupt history file, starting fresh"
                );
                Ok(None)
            }
        }
    }

    async fn save(&self, chat: &ChatId, turns: &[Turn]) -> Result<()> {
        let path = self.path_for(chat)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(turns)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(chat = %chat, turns = turns.len(), "Saved history");
        Ok(())
    }

    async fn remove(&self, chat: &ChatId) -> Result<bool> {
        let path = self.path_for(chat)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store, used by tests and the one-shot CLI mode
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    histories: Mutex<HashMap<ChatId, Vec<Turn>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a history before use
    pub fn with_history(self, chat: ChatId, turns: Vec<Turn>) -> Self {
        self.histories.lock().insert(chat, turns);
        self
    }

    /// Synchronous snapshot of a stored history
    pub fn get(&self, chat: &ChatId) -> Option<Vec<Turn>> {
        self.histories.lock().get(chat).cloned()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn load(&self, chat: &ChatId) -> Result<Option<Vec<Turn>>> {
        Ok(self.get(chat))
    }

    async fn save(&self, chat: &ChatId, turns: &[Turn]) -> Result<()> {
        self.histories.lock().insert(chat.clone(), turns.to_vec());
        Ok(())
    }

    async fn remove(&self, chat: &ChatId) -> Result<bool> {
        Ok(self.histories.lock().remove(chat).is_some())
    }
}
