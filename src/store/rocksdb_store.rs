use std::path::Path;

use rocksdb::{WriteBatch, DB};

use crate::error::Error;
use crate::store_adapter::StorageAdapter;

/// Persistent `StorageAdapter` backed by an LSM-tree engine.
pub struct RocksDbStore {
    db: DB,
}

impl RocksDbStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let db = DB::open_default(path).map_err(|err| Error::Io(err.to_string()))?;
        Ok(Self { db })
    }
}

impl StorageAdapter for RocksDbStore {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.db
            .put(key, value)
            .map_err(|err| Error::Io(err.to_string()))
    }

    fn get(&mut self, key: &[u8]) -> Result<Vec<u8>, Error> {
        self.db
            .get(key)
            .map_err(|err| Error::Io(err.to_string()))?
            .ok_or(Error::NotFound)
    }

    fn has(&mut self, key: &[u8]) -> bool {
        matches!(self.db.get(key), Ok(Some(_)))
    }

    fn batch_put(&mut self, pairs: &[(Vec<u8>, Vec<u8>)]) -> Result<(), Error> {
        let mut batch = WriteBatch::default();
        for (key, value) in pairs {
            batch.put(key, value);
        }
        self.db
            .write(batch)
            .map_err(|err| Error::Io(err.to_string()))
    }

    fn close(&mut self) -> Result<(), Error> {
        self.db.flush().map_err(|err| Error::Io(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir();
        let mut store = RocksDbStore::open(&dir).unwrap();
        store.put(&[1, 2, 3], b"payload").unwrap();
        assert_eq!(store.get(&[1, 2, 3]).unwrap(), b"payload");
    }

    fn tempdir() -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("mpt-rs-rocksdb-test-{}", std::process::id()));
        path
    }
}
