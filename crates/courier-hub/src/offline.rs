//! Offline spool for direct messages.
//!
//! Direct messages addressed to an id with no live socket are parked
//! here and drained on the recipient's next successful admission. The
//! trait is synchronous and object-safe so alternative backends can be
//! plugged in at startup; the in-memory implementation is the default.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use courier_proto::Envelope;

#[derive(Error, Debug)]
pub enum OfflineError {
    #[error("offline store backend error: {0}")]
    Backend(String),
}

/// A message parked for an absent recipient.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    /// Synthetic id, used to delete the copy after delivery.
    pub id: String,
    pub recipient: String,
    pub message: Envelope,
    pub stored_at: DateTime<Utc>,
}

pub trait OfflineStore: Send + Sync {
    fn store(&self, recipient: &str, message: Envelope) -> Result<(), OfflineError>;

    fn load(&self, recipient: &str) -> Result<Vec<StoredMessage>, OfflineError>;

    /// Remove delivered copies. Ids that no longer exist are ignored.
    fn delete(&self, recipient: &str, ids: &[String]) -> Result<(), OfflineError>;

    /// Drop messages older than the store's max age; returns how many.
    fn evict_expired(&self) -> Result<usize, OfflineError>;
}

/// In-memory spool with TTL-based eviction.
pub struct MemoryOfflineStore {
    messages: Mutex<HashMap<String, Vec<StoredMessage>>>,
    max_age: chrono::Duration,
}

impl MemoryOfflineStore {
    pub fn new(max_age: Duration) -> Self {
        Self {
            messages: Mutex::new(HashMap::new()),
            max_age: chrono::Duration::from_std(max_age)
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
        }
    }
}

impl OfflineStore for MemoryOfflineStore {
    fn store(&self, recipient: &str, message: Envelope) -> Result<(), OfflineError> {
        let stored = StoredMessage {
            id: Uuid::new_v4().to_string(),
            recipient: recipient.to_string(),
            message,
            stored_at: Utc::now(),
        };

        self.messages
            .lock()
            .expect("offline store lock poisoned")
            .entry(recipient.to_string())
            .or_default()
            .push(stored);

        Ok(())
    }

    fn load(&self, recipient: &str) -> Result<Vec<StoredMessage>, OfflineError> {
        Ok(self
            .messages
            .lock()
            .expect("offline store lock poisoned")
            .get(recipient)
            .cloned()
            .unwrap_or_default())
    }

    fn delete(&self, recipient: &str, ids: &[String]) -> Result<(), OfflineError> {
        let mut messages = self.messages.lock().expect("offline store lock poisoned");
        if let Some(queue) = messages.get_mut(recipient) {
            queue.retain(|stored| !ids.contains(&stored.id));
            if queue.is_empty() {
                messages.remove(recipient);
            }
        }
        Ok(())
    }

    fn evict_expired(&self) -> Result<usize, OfflineError> {
        let cutoff = Utc::now() - self.max_age;
        let mut evicted = 0;

        let mut messages = self.messages.lock().expect("offline store lock poisoned");
        messages.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|stored| stored.stored_at > cutoff);
            evicted += before - queue.len();
            !queue.is_empty()
        });

        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_proto::Kind;
    use serde_json::json;

    fn direct(text: &str) -> Envelope {
        Envelope::new(Kind::Direct).with_data(json!({ "m": text }))
    }

    #[test]
    fn store_and_load_per_recipient() {
        let store = MemoryOfflineStore::new(Duration::from_secs(3600));
        store.store("X", direct("one")).unwrap();
        store.store("X", direct("two")).unwrap();
        store.store("Y", direct("other")).unwrap();

        let for_x = store.load("X").unwrap();
        assert_eq!(for_x.len(), 2);
        assert_eq!(for_x[0].message.data.as_ref().unwrap()["m"], "one");
        assert_eq!(store.load("Y").unwrap().len(), 1);
        assert!(store.load("Z").unwrap().is_empty());
    }

    #[test]
    fn delete_removes_only_named_ids() {
        let store = MemoryOfflineStore::new(Duration::from_secs(3600));
        store.store("X", direct("one")).unwrap();
        store.store("X", direct("two")).unwrap();

        let stored = store.load("X").unwrap();
        store.delete("X", &[stored[0].id.clone()]).unwrap();

        let remaining = store.load("X").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, stored[1].id);

        store.delete("X", &[stored[1].id.clone()]).unwrap();
        assert!(store.load("X").unwrap().is_empty());
    }

    #[test]
    fn eviction_honors_max_age() {
        let store = MemoryOfflineStore::new(Duration::ZERO);
        store.store("X", direct("stale")).unwrap();

        // Zero TTL: everything stored in the past is expired.
        std::thread::sleep(Duration::from_millis(5));
        let evicted = store.evict_expired().unwrap();
        assert_eq!(evicted, 1);
        assert!(store.load("X").unwrap().is_empty());
    }

    #[test]
    fn eviction_keeps_fresh_messages() {
        let store = MemoryOfflineStore::new(Duration::from_secs(3600));
        store.store("X", direct("fresh")).unwrap();
        assert_eq!(store.evict_expired().unwrap(), 0);
        assert_eq!(store.load("X").unwrap().len(), 1);
    }
}
