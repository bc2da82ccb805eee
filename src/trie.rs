//! The trie engine: insert/lookup algorithms, structural invariants, and
//! the single-writer transactional overlay (`put`/`commit`/`abort`).

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::RwLock;

use crate::codec;
use crate::error::Error;
use crate::hash::{hash, Digest, HASH_SIZE};
use crate::node::{FullNode, Node, ShortNode, TERMINATOR_SLOT};
use crate::store::memory::MemoryStore;
use crate::store_adapter::StorageAdapter;
use crate::varint;

/// Digest of the canonical empty trie. A root equal to this value never
/// needs to be resolved against storage.
pub fn empty_root_digest() -> Digest {
    hash(&[])
}

pub struct Trie<S: StorageAdapter> {
    root: Option<Node>,
    committed_root: Option<Digest>,
    pending_writes: Vec<(Vec<u8>, Vec<u8>)>,
    has_pending_mutations: bool,
    snapshot_guard: RwLock<()>,
    store: S,
}

impl<S: StorageAdapter> Trie<S> {
    /// If `root_digest` is given the root starts as an unresolved
    /// `HashNode`, resolved lazily on first access, unless it names the
    /// canonical empty-trie digest.
    pub fn new(root_digest: Option<Digest>, store: S) -> Self {
        let empty = empty_root_digest();
        let resident_digest = root_digest.filter(|digest| *digest != empty);

        Self {
            root: resident_digest.map(Node::Hash),
            committed_root: root_digest,
            pending_writes: Vec::new(),
            has_pending_mutations: false,
            snapshot_guard: RwLock::new(()),
            store,
        }
    }

    pub fn get(&mut self, key: &[u8]) -> Result<Vec<u8>, Error> {
        match &mut self.root {
            None => Err(Error::NotFound),
            Some(root) => get_in(root, key, &mut self.store),
        }
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), Error> {
        if key.is_empty() {
            return Err(Error::Invalid("key must not be empty".to_string()));
        }

        let current = self.root.take();
        let updated = insert(current, &key, value, &mut self.store)?;
        self.root = Some(updated);
        self.has_pending_mutations = true;
        Ok(())
    }

    /// Safe to retry on failure: already-serialized bytes are held in a
    /// pending buffer until the write actually succeeds.
    pub fn commit(&mut self) -> Result<Digest, Error> {
        if let Some(root) = &mut self.root {
            collect_dirty(root, &mut self.pending_writes);
        }

        if !self.pending_writes.is_empty() {
            tracing::debug!(nodes = self.pending_writes.len(), "commit: writing dirty nodes");
            self.store.batch_put(&self.pending_writes)?;
            self.pending_writes.clear();
        }

        let digest = match &mut self.root {
            Some(root) => root.hash(),
            None => empty_root_digest(),
        };
        self.committed_root = Some(digest);
        self.has_pending_mutations = false;
        tracing::debug!(root = %hex::encode(digest), "commit: complete");
        Ok(digest)
    }

    /// Discards the in-memory resident tree and reloads the last committed
    /// root as an unresolved `HashNode`. A no-op when clean.
    pub fn abort(&mut self) {
        if !self.has_pending_mutations {
            return;
        }

        self.pending_writes.clear();
        let empty = empty_root_digest();
        self.root = self
            .committed_root
            .filter(|digest| *digest != empty)
            .map(Node::Hash);
        self.has_pending_mutations = false;
    }

    pub fn create_snapshot(&mut self) -> Result<HashMap<Digest, Vec<u8>>, Error> {
        let _guard = self
            .snapshot_guard
            .read()
            .map_err(|_| Error::Io("snapshot lock poisoned".to_string()))?;

        let mut out = HashMap::new();
        if let Some(root) = &mut self.root {
            collect_all(root, &mut self.store, &mut out)?;
        }
        Ok(out)
    }

    /// Checks that every entry's map key is the hash of its own bytes.
    pub fn validate_snapshot(snapshot: &HashMap<Digest, Vec<u8>>) -> bool {
        snapshot
            .iter()
            .all(|(digest, bytes)| hash(bytes) == *digest)
    }

    /// Keys and values are base64-encoded so arbitrary byte strings
    /// round-trip even when they are not valid UTF-8.
    pub fn export_snapshot<P: AsRef<Path>>(&mut self, path: P) -> Result<(), Error> {
        let mut entries = BTreeMap::new();
        self.iterate(|key, value| {
            entries.insert(base64::encode(key), base64::encode(value));
        })?;

        let json = serde_json::to_string_pretty(&entries)
            .map_err(|err| Error::Io(err.to_string()))?;
        std::fs::write(path, json).map_err(|err| Error::Io(err.to_string()))
    }

    /// Replays each entry via `put`. Does not commit; the caller decides.
    pub fn import_snapshot<P: AsRef<Path>>(&mut self, path: P) -> Result<(), Error> {
        let data = std::fs::read_to_string(path).map_err(|err| Error::Io(err.to_string()))?;
        let entries: BTreeMap<String, String> =
            serde_json::from_str(&data).map_err(|err| Error::Decode(err.to_string()))?;

        tracing::debug!(entries = entries.len(), "import_snapshot: start");
        for (key_b64, value_b64) in entries {
            let key = base64::decode(key_b64).map_err(|err| Error::Decode(err.to_string()))?;
            let value = base64::decode(value_b64).map_err(|err| Error::Decode(err.to_string()))?;
            self.put(key, value)?;
        }
        tracing::debug!("import_snapshot: complete");
        Ok(())
    }

    pub fn iterate<F: FnMut(&[u8], &[u8])>(&mut self, mut visitor: F) -> Result<(), Error> {
        if let Some(root) = &mut self.root {
            iterate_node(root, &mut Vec::new(), &mut self.store, &mut visitor)?;
        }
        Ok(())
    }

    /// Dump of every reachable node plus a root-digest header, for
    /// round-tripping independent of the backing storage adapter.
    pub fn serialize(&mut self) -> Result<Vec<u8>, Error> {
        let mut records: HashMap<Digest, Vec<u8>> = HashMap::new();
        let root_digest = match &mut self.root {
            Some(root) => {
                collect_all(root, &mut self.store, &mut records)?;
                Some(root.hash())
            }
            None => None,
        };

        let mut out = Vec::new();
        match root_digest {
            Some(digest) => {
                out.push(1u8);
                out.extend_from_slice(&digest);
            }
            None => out.push(0u8),
        }

        varint::encode_into(records.len() as u64, &mut out);
        for (digest, bytes) in &records {
            out.extend_from_slice(digest);
            varint::encode_into(bytes.len() as u64, &mut out);
            out.extend_from_slice(bytes);
        }
        Ok(out)
    }
}

impl Trie<MemoryStore> {
    /// Restores a dump produced by [`Trie::serialize`] into a fresh trie
    /// backed by an in-memory adapter preloaded with the dumped bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.is_empty() {
            return Err(Error::Decode("whole-root dump is empty".to_string()));
        }

        let mut offset = 0usize;
        let root_present = bytes[offset];
        offset += 1;

        let root_digest = match root_present {
            0 => None,
            1 => {
                let end = offset + HASH_SIZE;
                if end > bytes.len() {
                    return Err(Error::Decode("dump root digest is truncated".to_string()));
                }
                let mut digest = [0u8; HASH_SIZE];
                digest.copy_from_slice(&bytes[offset..end]);
                offset = end;
                Some(digest)
            }
            other => {
                return Err(Error::Decode(format!(
                    "invalid root-present flag 0x{other:02x}"
                )))
            }
        };

        let record_count = varint::decode_from_slice(bytes, &mut offset)?;
        let mut pairs = Vec::with_capacity(record_count as usize);
        for _ in 0..record_count {
            let digest_end = offset + HASH_SIZE;
            if digest_end > bytes.len() {
                return Err(Error::Decode("dump record digest is truncated".to_string()));
            }
            let digest = bytes[offset..digest_end].to_vec();
            offset = digest_end;

            let data_len = varint::decode_from_slice(bytes, &mut offset)? as usize;
            let data_end = offset + data_len;
            if data_end > bytes.len() {
                return Err(Error::Decode("dump record data is truncated".to_string()));
            }
            let data = bytes[offset..data_end].to_vec();
            offset = data_end;

            pairs.push((digest, data));
        }

        if offset != bytes.len() {
            return Err(Error::Decode(
                "whole-root dump has trailing data".to_string(),
            ));
        }

        let mut store = MemoryStore::new();
        store.batch_put(&pairs)?;
        Ok(Trie::new(root_digest, store))
    }
}

fn resolve<S: StorageAdapter>(digest: Digest, store: &mut S) -> Result<Node, Error> {
    tracing::trace!(digest = %hex::encode(digest), "resolving hash reference");
    let bytes = store.get(&digest).map_err(|err| match err {
        Error::NotFound => {
            Error::CorruptStorage(format!("missing node for digest {}", hex::encode(digest)))
        }
        other => other,
    })?;
    codec::decode_node(&bytes).map_err(|err| Error::CorruptStorage(err.to_string()))
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn get_in<S: StorageAdapter>(node: &mut Node, suffix: &[u8], store: &mut S) -> Result<Vec<u8>, Error> {
    loop {
        match node {
            Node::Hash(digest) => {
                let resolved = resolve(*digest, store)?;
                *node = resolved;
            }
            Node::Value(value_node) => {
                return if suffix.is_empty() {
                    Ok(value_node.value.clone())
                } else {
                    Err(Error::NotFound)
                };
            }
            Node::Short(short) => {
                if suffix.len() >= short.key.len() && suffix[..short.key.len()] == short.key[..] {
                    let rest = &suffix[short.key.len()..];
                    return get_in(&mut short.value, rest, store);
                }
                return Err(Error::NotFound);
            }
            Node::Full(full) => {
                let (index, rest): (usize, &[u8]) = if suffix.is_empty() {
                    (TERMINATOR_SLOT, &[])
                } else {
                    (suffix[0] as usize, &suffix[1..])
                };
                return match &mut full.children[index] {
                    Some(child) => get_in(child, rest, store),
                    None => Err(Error::NotFound),
                };
            }
        }
    }
}

/// Recursive rewrite returning the (possibly new) node to install in the
/// caller's slot: an absent slot becomes a leaf, a leaf splits or absorbs
/// the write, a short node either recurses past its shared prefix or
/// forks into a branch, and a branch recurses into the matching child.
fn insert<S: StorageAdapter>(
    node: Option<Node>,
    suffix: &[u8],
    value: Vec<u8>,
    store: &mut S,
) -> Result<Node, Error> {
    match node {
        None => {
            if suffix.is_empty() {
                Ok(Node::value(value))
            } else {
                Ok(Node::short(suffix.to_vec(), Node::value(value)))
            }
        }
        Some(Node::Hash(digest)) => {
            let resolved = resolve(digest, store)?;
            insert(Some(resolved), suffix, value, store)
        }
        Some(Node::Value(mut value_node)) => {
            if suffix.is_empty() {
                value_node.value = value;
                value_node.mark_dirty();
                Ok(Node::Value(value_node))
            } else {
                let mut branch = FullNode::empty();
                branch.children[TERMINATOR_SLOT] = Some(Box::new(Node::Value(value_node)));
                let index = suffix[0] as usize;
                let child = insert(None, &suffix[1..], value, store)?;
                branch.children[index] = Some(Box::new(child));
                Ok(Node::Full(branch))
            }
        }
        Some(Node::Short(mut short)) => {
            let common = common_prefix_len(&short.key, suffix);

            if common == short.key.len() {
                let inner = *short.value;
                let new_inner = insert(Some(inner), &suffix[common..], value, store)?;
                short.value = Box::new(new_inner);
                short.mark_dirty();
                Ok(fuse_short_over_short(Node::Short(short)))
            } else {
                let prefix = short.key[..common].to_vec();
                let key_tail = short.key[common..].to_vec();
                let old_inner = *short.value;

                let mut branch = FullNode::empty();

                let key_branch_index = key_tail[0] as usize;
                let key_tail_rest = key_tail[1..].to_vec();
                let key_branch_child = if key_tail_rest.is_empty() {
                    old_inner
                } else {
                    Node::Short(ShortNode::new(key_tail_rest, old_inner))
                };
                branch.children[key_branch_index] = Some(Box::new(key_branch_child));

                let value_tail = &suffix[common..];
                if value_tail.is_empty() {
                    branch.children[TERMINATOR_SLOT] = Some(Box::new(Node::value(value)));
                } else {
                    let value_branch_index = value_tail[0] as usize;
                    let new_child = insert(None, &value_tail[1..], value, store)?;
                    branch.children[value_branch_index] = Some(Box::new(new_child));
                }

                if prefix.is_empty() {
                    Ok(Node::Full(branch))
                } else {
                    Ok(fuse_short_over_short(Node::Short(ShortNode::new(
                        prefix,
                        Node::Full(branch),
                    ))))
                }
            }
        }
        Some(Node::Full(mut full)) => {
            if suffix.is_empty() {
                let existing = full.children[TERMINATOR_SLOT].take();
                let new_value = insert(existing.map(|child| *child), &[], value, store)?;
                full.children[TERMINATOR_SLOT] = Some(Box::new(new_value));
            } else {
                let index = suffix[0] as usize;
                let existing = full.children[index].take();
                let new_child = insert(existing.map(|child| *child), &suffix[1..], value, store)?;
                full.children[index] = Some(Box::new(new_child));
            }
            full.mark_dirty();
            Ok(Node::Full(full))
        }
    }
}

/// A `ShortNode`'s child is never another `ShortNode`; fuses the two into
/// one if insert ever produces that shape.
fn fuse_short_over_short(mut node: Node) -> Node {
    if let Node::Short(outer) = &mut node {
        if matches!(outer.value.as_ref(), Node::Short(_)) {
            let placeholder = Box::new(Node::value(Vec::new()));
            let inner_boxed = std::mem::replace(&mut outer.value, placeholder);
            if let Node::Short(inner) = *inner_boxed {
                outer.key.extend_from_slice(&inner.key);
                outer.value = inner.value;
                outer.cache = None;
                outer.dirty = true;
            }
        }
    }
    node
}

fn collect_dirty(node: &mut Node, out: &mut Vec<(Vec<u8>, Vec<u8>)>) {
    match node {
        Node::Hash(_) => {}
        Node::Value(value_node) => {
            if value_node.dirty {
                let bytes = value_node.serialize();
                let digest = value_node.cache.expect("serialize sets cache");
                out.push((digest.to_vec(), bytes));
            }
        }
        Node::Short(short) => {
            collect_dirty(&mut short.value, out);
            if short.dirty {
                let bytes = short.serialize();
                let digest = short.cache.expect("serialize sets cache");
                out.push((digest.to_vec(), bytes));
            }
        }
        Node::Full(full) => {
            for slot in full.children.iter_mut().flatten() {
                collect_dirty(slot, out);
            }
            if full.dirty {
                let bytes = full.serialize();
                let digest = full.cache.expect("serialize sets cache");
                out.push((digest.to_vec(), bytes));
            }
        }
    }
}

fn collect_all<S: StorageAdapter>(
    node: &mut Node,
    store: &mut S,
    out: &mut HashMap<Digest, Vec<u8>>,
) -> Result<(), Error> {
    if let Node::Hash(digest) = node {
        *node = resolve(*digest, store)?;
    }

    match node {
        Node::Value(value_node) => {
            let bytes = value_node.serialize();
            out.insert(value_node.cache.expect("serialize sets cache"), bytes);
        }
        Node::Short(short) => {
            collect_all(&mut short.value, store, out)?;
            let bytes = short.serialize();
            out.insert(short.cache.expect("serialize sets cache"), bytes);
        }
        Node::Full(full) => {
            for slot in full.children.iter_mut().flatten() {
                collect_all(slot, store, out)?;
            }
            let bytes = full.serialize();
            out.insert(full.cache.expect("serialize sets cache"), bytes);
        }
        Node::Hash(_) => unreachable!("resolved above"),
    }
    Ok(())
}

fn iterate_node<S: StorageAdapter, F: FnMut(&[u8], &[u8])>(
    node: &mut Node,
    path: &mut Vec<u8>,
    store: &mut S,
    visitor: &mut F,
) -> Result<(), Error> {
    if let Node::Hash(digest) = node {
        *node = resolve(*digest, store)?;
    }

    match node {
        Node::Value(value_node) => visitor(path, &value_node.value),
        Node::Short(short) => {
            let extend_len = short.key.len();
            path.extend_from_slice(&short.key);
            let result = iterate_node(&mut short.value, path, store, visitor);
            path.truncate(path.len() - extend_len);
            result?;
        }
        Node::Full(full) => {
            if let Some(child) = full.children[TERMINATOR_SLOT].as_mut() {
                iterate_node(child, path, store, visitor)?;
            }
            for index in 0..TERMINATOR_SLOT {
                if let Some(child) = full.children[index].as_mut() {
                    path.push(index as u8);
                    let result = iterate_node(child, path, store, visitor);
                    path.pop();
                    result?;
                }
            }
        }
        Node::Hash(_) => unreachable!("resolved above"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn trie() -> Trie<MemoryStore> {
        Trie::new(None, MemoryStore::new())
    }

    #[test]
    fn put_rejects_empty_key() {
        let mut t = trie();
        assert!(matches!(t.put(vec![], vec![1]), Err(Error::Invalid(_))));
    }

    #[test]
    fn put_then_get_round_trips() {
        let mut t = trie();
        t.put(b"hello".to_vec(), b"world".to_vec()).unwrap();
        assert_eq!(t.get(b"hello").unwrap(), b"world");
    }

    #[test]
    fn overwrite_replaces_value() {
        let mut t = trie();
        t.put(b"k".to_vec(), b"v1".to_vec()).unwrap();
        t.put(b"k".to_vec(), b"v2".to_vec()).unwrap();
        assert_eq!(t.get(b"k").unwrap(), b"v2");
    }

    #[test]
    fn get_missing_key_not_found() {
        let mut t = trie();
        assert!(matches!(t.get(b"nope"), Err(Error::NotFound)));
    }

    #[test]
    fn branching_prefixes_resolve_independently() {
        let mut t = trie();
        t.put(b"123456".to_vec(), b"A".to_vec()).unwrap();
        t.put(b"134567".to_vec(), b"B".to_vec()).unwrap();
        t.put(b"123467".to_vec(), b"C".to_vec()).unwrap();
        t.put(b"234567".to_vec(), b"D".to_vec()).unwrap();
        t.put(b"1234567890".to_vec(), b"E".to_vec()).unwrap();
        t.put(b"12345678".to_vec(), b"F".to_vec()).unwrap();

        assert_eq!(t.get(b"123456").unwrap(), b"A");
        assert_eq!(t.get(b"134567").unwrap(), b"B");
        assert_eq!(t.get(b"123467").unwrap(), b"C");
        assert_eq!(t.get(b"234567").unwrap(), b"D");
        assert_eq!(t.get(b"1234567890").unwrap(), b"E");

        t.put(b"123456".to_vec(), b"F".to_vec()).unwrap();
        assert_eq!(t.get(b"123456").unwrap(), b"F");
        assert_eq!(t.get(b"134567").unwrap(), b"B");
    }

    #[test]
    fn commit_then_abort_preserves_reads() {
        let mut t = trie();
        t.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        t.commit().unwrap();
        t.abort();
        assert_eq!(t.get(b"k").unwrap(), b"v");
    }

    #[test]
    fn abort_from_dirty_discards_uncommitted_puts() {
        let mut t = trie();
        t.put(b"k".to_vec(), b"v1".to_vec()).unwrap();
        t.abort();
        assert!(matches!(t.get(b"k"), Err(Error::NotFound)));
    }

    #[test]
    fn abort_from_clean_is_a_no_op() {
        let mut t = trie();
        t.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        t.commit().unwrap();
        t.abort();
        assert_eq!(t.get(b"k").unwrap(), b"v");
    }

    #[test]
    fn root_hash_is_permutation_independent() {
        let mut a = trie();
        a.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        a.put(b"a".to_vec(), b"2".to_vec()).unwrap();
        let root_a = a.commit().unwrap();

        let mut b = trie();
        b.put(b"a".to_vec(), b"2".to_vec()).unwrap();
        let root_b = b.commit().unwrap();

        assert_eq!(root_a, root_b);
    }

    #[test]
    fn empty_trie_commits_to_empty_root_digest() {
        let mut t = trie();
        assert_eq!(t.commit().unwrap(), empty_root_digest());
    }

    #[test]
    fn iterate_visits_every_entry() {
        let mut t = trie();
        t.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        t.put(b"ab".to_vec(), b"2".to_vec()).unwrap();
        let mut seen = Vec::new();
        t.iterate(|k, v| seen.push((k.to_vec(), v.to_vec()))).unwrap();
        seen.sort();
        assert_eq!(
            seen,
            vec![(b"a".to_vec(), b"1".to_vec()), (b"ab".to_vec(), b"2".to_vec())]
        );
    }

    #[test]
    fn export_then_import_snapshot_round_trips() {
        let mut t = trie();
        t.put(b"123456".to_vec(), b"A".to_vec()).unwrap();
        t.put(b"134567".to_vec(), b"B".to_vec()).unwrap();

        let mut path = std::env::temp_dir();
        path.push(format!("mpt-rs-export-test-{}.json", std::process::id()));
        t.export_snapshot(&path).unwrap();

        let mut restored = trie();
        restored.import_snapshot(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(restored.get(b"123456").unwrap(), b"A");
        assert_eq!(restored.get(b"134567").unwrap(), b"B");
    }

    #[test]
    fn whole_root_serialize_deserialize_round_trips() {
        let mut t = trie();
        t.put(b"123456".to_vec(), b"A".to_vec()).unwrap();
        t.put(b"134567".to_vec(), b"B".to_vec()).unwrap();
        t.commit().unwrap();

        let dump = t.serialize().unwrap();
        let mut restored = Trie::<MemoryStore>::deserialize(&dump).unwrap();
        assert_eq!(restored.get(b"123456").unwrap(), b"A");
        assert_eq!(restored.get(b"134567").unwrap(), b"B");
    }

    #[test]
    fn create_snapshot_entries_hash_to_their_own_key() {
        let mut t = trie();
        t.put(b"123456".to_vec(), b"A".to_vec()).unwrap();
        t.put(b"134567".to_vec(), b"B".to_vec()).unwrap();

        let snapshot = t.create_snapshot().unwrap();
        assert!(!snapshot.is_empty());
        for (digest, bytes) in &snapshot {
            assert_eq!(hash(bytes), *digest);
        }
    }

    #[test]
    fn validate_snapshot_accepts_an_honest_snapshot() {
        let mut t = trie();
        t.put(b"123456".to_vec(), b"A".to_vec()).unwrap();
        t.put(b"134567".to_vec(), b"B".to_vec()).unwrap();

        let snapshot = t.create_snapshot().unwrap();
        assert!(Trie::<MemoryStore>::validate_snapshot(&snapshot));
    }

    #[test]
    fn validate_snapshot_rejects_a_tampered_entry() {
        let mut t = trie();
        t.put(b"123456".to_vec(), b"A".to_vec()).unwrap();
        let mut snapshot = t.create_snapshot().unwrap();
        for bytes in snapshot.values_mut() {
            bytes.push(0xff);
        }
        assert!(!Trie::<MemoryStore>::validate_snapshot(&snapshot));
    }
}
