pub mod memory;

#[cfg(feature = "rocksdb-store")]
pub mod rocksdb_store;
