//! Canonical wire encoding for trie nodes. A `FullNode`'s or `ShortNode`'s
//! serialized form contains only the digests of its children, never their
//! bytes, so persistence is strictly bottom-up.

use crate::error::Error;
use crate::hash::{Digest, HASH_SIZE};
use crate::node::{FullNode, Node, ShortNode, ValueNode, FULL_SLOTS};
use crate::varint;

const TAG_FULL: u8 = 0x00;
const TAG_SHORT: u8 = 0x01;
const TAG_VALUE: u8 = 0x02;

const FULL_BITMAP_BYTES: usize = (FULL_SLOTS + 7) / 8;

pub fn encode_full(node: &mut FullNode) -> Vec<u8> {
    let mut bitmap = vec![0u8; FULL_BITMAP_BYTES];
    let mut digests: Vec<Digest> = Vec::new();

    for (index, slot) in node.children.iter_mut().enumerate() {
        if let Some(child) = slot {
            bitmap[index / 8] |= 0x80 >> (index % 8);
            digests.push(child.hash());
        }
    }

    let mut out = Vec::with_capacity(1 + bitmap.len() + digests.len() * HASH_SIZE);
    out.push(TAG_FULL);
    out.extend_from_slice(&bitmap);
    for digest in digests {
        out.extend_from_slice(&digest);
    }
    out
}

pub fn encode_short(node: &mut ShortNode) -> Vec<u8> {
    let value_digest = node.value.hash();

    let mut out = Vec::with_capacity(1 + varint::size_of(node.key.len() as u64) + node.key.len() + HASH_SIZE);
    out.push(TAG_SHORT);
    varint::encode_into(node.key.len() as u64, &mut out);
    out.extend_from_slice(&node.key);
    out.extend_from_slice(&value_digest);
    out
}

pub fn encode_value(node: &ValueNode) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + varint::size_of(node.value.len() as u64) + node.value.len());
    out.push(TAG_VALUE);
    varint::encode_into(node.value.len() as u64, &mut out);
    out.extend_from_slice(&node.value);
    out
}

/// Child/value fields decode to `HashNode` references; the referenced bytes
/// are not fetched, decoding never recurses into the storage adapter.
pub fn decode_node(bytes: &[u8]) -> Result<Node, Error> {
    if bytes.is_empty() {
        return Err(Error::Decode("node payload is empty".to_string()));
    }

    match bytes[0] {
        TAG_FULL => decode_full(bytes),
        TAG_SHORT => decode_short(bytes),
        TAG_VALUE => decode_value(bytes),
        other => Err(Error::Decode(format!("unknown node tag 0x{other:02x}"))),
    }
}

fn decode_full(bytes: &[u8]) -> Result<Node, Error> {
    let mut offset = 1usize;
    let bitmap_end = offset + FULL_BITMAP_BYTES;
    if bitmap_end > bytes.len() {
        return Err(Error::Decode("full node bitmap is truncated".to_string()));
    }
    let bitmap = &bytes[offset..bitmap_end];
    offset = bitmap_end;

    let mut full = FullNode::empty();
    full.dirty = false;

    for index in 0..FULL_SLOTS {
        let present = (bitmap[index / 8] & (0x80 >> (index % 8))) != 0;
        if !present {
            continue;
        }

        let digest = read_digest(bytes, &mut offset)?;
        full.children[index] = Some(Box::new(Node::Hash(digest)));
    }

    if offset != bytes.len() {
        return Err(Error::Decode(
            "full node payload has trailing data".to_string(),
        ));
    }

    full.cache = Some(crate::hash::hash(bytes));
    Ok(Node::Full(full))
}

fn decode_short(bytes: &[u8]) -> Result<Node, Error> {
    let mut offset = 1usize;
    let key_len = varint::decode_from_slice(bytes, &mut offset)? as usize;
    if key_len == 0 {
        return Err(Error::Decode("short node key is empty".to_string()));
    }

    let key_end = offset + key_len;
    if key_end > bytes.len() {
        return Err(Error::Decode("short node key is truncated".to_string()));
    }
    let key = bytes[offset..key_end].to_vec();
    offset = key_end;

    let digest = read_digest(bytes, &mut offset)?;

    if offset != bytes.len() {
        return Err(Error::Decode(
            "short node payload has trailing data".to_string(),
        ));
    }

    let mut short = ShortNode::new(key, Node::Hash(digest));
    short.dirty = false;
    short.cache = Some(crate::hash::hash(bytes));
    Ok(Node::Short(short))
}

fn decode_value(bytes: &[u8]) -> Result<Node, Error> {
    let mut offset = 1usize;
    let value_len = varint::decode_from_slice(bytes, &mut offset)? as usize;

    let value_end = offset + value_len;
    if value_end > bytes.len() {
        return Err(Error::Decode("value node payload is truncated".to_string()));
    }
    let value = bytes[offset..value_end].to_vec();
    offset = value_end;

    if offset != bytes.len() {
        return Err(Error::Decode(
            "value node payload has trailing data".to_string(),
        ));
    }

    let mut node = ValueNode::new(value);
    node.dirty = false;
    node.cache = Some(crate::hash::hash(bytes));
    Ok(Node::Value(node))
}

fn read_digest(bytes: &[u8], offset: &mut usize) -> Result<Digest, Error> {
    let end = *offset + HASH_SIZE;
    if end > bytes.len() {
        return Err(Error::Decode("digest is truncated".to_string()));
    }
    let mut digest = [0u8; HASH_SIZE];
    digest.copy_from_slice(&bytes[*offset..end]);
    *offset = end;
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, TERMINATOR_SLOT};

    #[test]
    fn decode_rejects_empty_payload() {
        assert!(decode_node(&[]).is_err());
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        assert!(decode_node(&[0xff]).is_err());
    }

    #[test]
    fn value_node_round_trip() {
        let mut node = Node::value(b"hello".to_vec());
        let bytes = node.serialize();
        let mut decoded = decode_node(&bytes).unwrap();
        assert_eq!(decoded.serialize(), bytes);
    }

    #[test]
    fn short_node_round_trip() {
        let mut node = Node::short(b"key".to_vec(), Node::value(b"v".to_vec()));
        let bytes = node.serialize();
        let mut decoded = decode_node(&bytes).unwrap();
        assert_eq!(decoded.serialize(), bytes);
    }

    #[test]
    fn short_node_rejects_empty_key_on_decode() {
        // tag=Short, keylen varint=0, then a 32-byte digest.
        let mut bytes = vec![TAG_SHORT, 0x00];
        bytes.extend_from_slice(&[7u8; HASH_SIZE]);
        assert!(decode_node(&bytes).is_err());
    }

    #[test]
    fn full_node_round_trip_with_hash_children() {
        let mut full = Node::full();
        if let Node::Full(f) = &mut full {
            f.children[3] = Some(Box::new(Node::Hash([9u8; HASH_SIZE])));
            f.children[TERMINATOR_SLOT] = Some(Box::new(Node::Hash([4u8; HASH_SIZE])));
        }
        let bytes = full.serialize();
        let mut decoded = decode_node(&bytes).unwrap();
        assert_eq!(decoded.serialize(), bytes);
    }
}
