//! Scratch store shared by the steps of one request.

use crate::errors::StoreConflictError;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Slot {
    owner: String,
    value: serde_json::Value,
}

/// A string-keyed JSON store with per-key ownership.
///
/// The first step to write a key owns it. The owner may overwrite its own
/// keys; any other writer gets a [`StoreConflictError`]. Reads are open to
/// every step. Keys are never removed.
#[derive(Debug, Default)]
pub struct ScratchStore {
    slots: RwLock<HashMap<String, Slot>>,
}

impl ScratchStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.slots.read().get(key).map(|slot| slot.value.clone())
    }

    /// Checks if a key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.slots.read().contains_key(key)
    }

    /// Returns the step that owns a key.
    #[must_use]
    pub fn owner(&self, key: &str) -> Option<String> {
        self.slots.read().get(key).map(|slot| slot.owner.clone())
    }

    /// Writes a value on behalf of `writer`.
    ///
    /// # Errors
    ///
    /// Returns `StoreConflictError` if the key is owned by another step.
    pub fn set(
        &self,
        writer: &str,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), StoreConflictError> {
        let key = key.into();
        let mut slots = self.slots.write();

        if let Some(slot) = slots.get_mut(&key) {
            if slot.owner != writer {
                return Err(StoreConflictError::new(key, slot.owner.clone(), writer));
            }
            slot.value = value;
            return Ok(());
        }

        slots.insert(
            key,
            Slot {
                owner: writer.to_string(),
                value,
            },
        );
        Ok(())
    }

    /// Returns a copy of all values.
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, serde_json::Value> {
        self.slots
            .read()
            .iter()
            .map(|(key, slot)| (key.clone(), slot.value.clone()))
            .collect()
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Returns true if nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}
