//! Authenticated key-value store implemented as a byte-keyed,
//! 257-ary Merkle-Patricia Trie over a pluggable content-addressed
//! [`StorageAdapter`]. Mutations land in an in-process overlay; `commit`
//! flushes the overlay to storage and `abort` discards it.

mod codec;
mod error;
mod hash;
mod node;
mod store;
mod store_adapter;
mod trie;
mod varint;

pub use error::{Error, Result};
pub use hash::{hash, Digest, HASH_SIZE};
pub use node::{FullNode, Node, ShortNode, ValueNode, FULL_SLOTS, TERMINATOR_SLOT};
pub use store::memory::MemoryStore;
#[cfg(feature = "rocksdb-store")]
pub use store::rocksdb_store::RocksDbStore;
pub use store_adapter::StorageAdapter;
pub use trie::{empty_root_digest, Trie};
