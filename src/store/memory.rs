use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::Error;
use crate::store_adapter::StorageAdapter;

/// In-memory reference `StorageAdapter`. Cloning yields a cheap handle to
/// the same underlying map, so several `Trie`s can be reopened against one
/// shared store.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn encode_key(key: &[u8]) -> String {
        hex::encode(key)
    }
}

impl StorageAdapter for MemoryStore {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::Io("memory store lock poisoned".to_string()))?;
        entries.insert(Self::encode_key(key), value.to_vec());
        Ok(())
    }

    fn get(&mut self, key: &[u8]) -> Result<Vec<u8>, Error> {
        let entries = self
            .entries
            .read()
            .map_err(|_| Error::Io("memory store lock poisoned".to_string()))?;
        entries
            .get(&Self::encode_key(key))
            .cloned()
            .ok_or(Error::NotFound)
    }

    fn has(&mut self, key: &[u8]) -> bool {
        match self.entries.read() {
            Ok(entries) => entries.contains_key(&Self::encode_key(key)),
            Err(_) => false,
        }
    }

    fn batch_put(&mut self, pairs: &[(Vec<u8>, Vec<u8>)]) -> Result<(), Error> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::Io("memory store lock poisoned".to_string()))?;
        for (key, value) in pairs {
            entries.insert(Self::encode_key(key), value.clone());
        }
        Ok(())
    }
}
