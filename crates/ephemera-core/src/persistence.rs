use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;

use ephemera_db::Database;
use ephemera_types::models::CollectionKind;

use crate::error::StoreError;

/// Durable key-value storage of collections, scoped by identity.
///
/// Bodies are JSON. `load` returning `Ok(None)` is the normal first-run state.
/// `save` must be all-or-nothing: after a failed save the previous body is
/// still what the next `load` returns.
pub trait PersistenceAdapter: Send + Sync {
    fn load(&self, identity: &str, kind: CollectionKind) -> Result<Option<String>>;

    fn save(&self, identity: &str, kind: CollectionKind, body: &str) -> Result<()>;
}

impl PersistenceAdapter for Database {
    fn load(&self, identity: &str, kind: CollectionKind) -> Result<Option<String>> {
        Ok(self.load_collection(identity, kind)?.map(|row| row.body))
    }

    fn save(&self, identity: &str, kind: CollectionKind, body: &str) -> Result<()> {
        self.save_collection(identity, kind, body)?;
        Ok(())
    }
}

/// Process-local adapter. Counts saves and can be told to fail them.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    slots: Mutex<HashMap<String, String>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// The raw stored body, if any.
    pub fn stored(&self, identity: &str, kind: CollectionKind) -> Option<String> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(&kind.storage_key(identity)).cloned()
    }

    /// Seed a body directly, bypassing the save counter.
    pub fn insert_raw(&self, identity: &str, kind: CollectionKind, body: impl Into<String>) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.insert(kind.storage_key(identity), body.into());
    }
}

impl PersistenceAdapter for MemoryPersistence {
    fn load(&self, identity: &str, kind: CollectionKind) -> Result<Option<String>> {
        Ok(self.stored(identity, kind))
    }

    fn save(&self, identity: &str, kind: CollectionKind, body: &str) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(anyhow!("simulated write failure for {}", kind.storage_key(identity)));
        }
        let mut slots = self.slots.lock().map_err(|e| anyhow!("store lock poisoned: {}", e))?;
        slots.insert(kind.storage_key(identity), body.to_string());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) fn decode_collection<T: DeserializeOwned>(
    kind: CollectionKind,
    body: &str,
) -> crate::Result<Vec<T>> {
    serde_json::from_str(body)
        .map_err(|e| StoreError::Persistence(format!("corrupt {} collection: {}", kind, e)))
}

pub(crate) fn encode_collection<T: Serialize>(items: &[T]) -> serde_json::Result<String> {
    serde_json::to_string(items)
}
