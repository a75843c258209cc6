//! Per-chat exclusion
//!
//! Two messages for the same chat must not interleave their
//! load/append/save cycles, or one exchange's turns would be lost.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use crate::history::ChatId;

type LockMap = HashMap<ChatId, Arc<tokio::sync::Mutex<()>>>;

/// Lazily created async mutex per chat. An entry lives only while someone
/// holds or waits for it.
#[derive(Debug, Clone, Default)]
pub struct ChatLocks {
    inner: Arc<Mutex<LockMap>>,
}

impl ChatLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other holder for `chat` remains
    pub async fn acquire(&self, chat: &ChatId) -> ChatGuard {
        let lock = {
            let mut map = self.inner.lock();
            map.entry(chat.clone()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        ChatGuard {
            chat: chat.clone(),
            guard: Some(guard),
            locks: self.inner.clone(),
        }
    }

    /// Number of chats currently locked or contended
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one chat; releases and prunes on drop
#[derive(Debug)]
pub struct ChatGuard {
    chat: ChatId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<LockMap>>,
}

impl Drop for ChatGuard {
    fn drop(&mut self) {
        let mut map = self.locks.lock();
        drop(self.guard.take());
        // Only the map still refers to the mutex: nobody is waiting.
        if map
            .get(&self.chat)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.chat);
        }
    }
}
