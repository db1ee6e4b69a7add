use std::collections::BTreeMap;

use bytes::Bytes;

use crate::KeyValueStore;

/// A [`KeyValueStore`] over an ordered in-memory map.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    entries: BTreeMap<Vec<u8>, Bytes>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for InMemoryStore {
    fn read(&self, key: &[u8]) -> Bytes {
        self.entries.get(key).cloned().unwrap_or_default()
    }

    fn write(&mut self, key: &[u8], value: Bytes) {
        self.entries.insert(key.to_vec(), value);
    }
}
