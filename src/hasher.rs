//! Canonical RLP encoding and hashing of trie nodes.

use crate::{
    nodes::{compact_encode, Node, RlpNode},
    TrieError, TrieMask, EMPTY_ROOT_HASH,
};
use alloy_rlp::{Encodable, Header, EMPTY_STRING_CODE};
use core::mem;

/// Hashes trie nodes into [`RlpNode`] references.
///
/// Owns a reusable RLP scratch buffer. The buffer is taken at the start of
/// each encoding and restored on every exit path; it is a resource of the
/// trie owner, never process-wide state.
#[derive(Debug, Default)]
pub struct Hasher {
    buf: Vec<u8>,
}

impl Hasher {
    /// Creates a hasher with an empty scratch buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hashes a node subtree.
    ///
    /// Returns the node's hash reference or, when its RLP is shorter than
    /// 32 bytes, the raw RLP. With `force` set the result is always a
    /// 32-byte hash: the root of a trie is hashed, never inlined.
    pub fn hash_node(&mut self, node: &Node, force: bool) -> Result<RlpNode, TrieError> {
        let rlp = self.node_rlp(node)?;
        Ok(if force { RlpNode::word_rlp(&rlp.forced_hash()) } else { rlp })
    }

    fn node_rlp(&mut self, node: &Node) -> Result<RlpNode, TrieError> {
        match node {
            Node::Empty => Ok(RlpNode::word_rlp(&EMPTY_ROOT_HASH)),
            Node::Hash(rlp) => Ok(*rlp),
            Node::Short { key, val } => match val.as_ref() {
                Node::Value(value) => Ok(self.leaf_rlp(key, value)),
                Node::Account { account, storage } => {
                    let mut account = *account;
                    if let Some(storage) = storage {
                        account.storage_root = self.hash_node(storage, true)?
                            .as_hash()
                            .ok_or_else(|| TrieError::invariant("forced hash not 32 bytes"))?;
                    }
                    Ok(self.leaf_rlp(key, &account.rlp()))
                }
                child => {
                    let child = self.node_rlp(child)?;
                    Ok(self.extension_rlp(key, &child))
                }
            },
            Node::Duo { mask, children } => {
                let c1 = self.node_rlp(&children[0])?;
                let c2 = self.node_rlp(&children[1])?;
                Ok(self.branch_rlp(*mask, &[c1, c2]))
            }
            Node::Full { children } => {
                let mut mask = TrieMask::default();
                let mut encoded = Vec::new();
                for (index, child) in children.iter().enumerate() {
                    if let Some(child) = child {
                        mask.set_bit(index as u8);
                        encoded.push(self.node_rlp(child)?);
                    }
                }
                if mask.count_ones() < 2 {
                    return Err(TrieError::invariant("branch node with fewer than two children"));
                }
                Ok(self.branch_rlp(mask, &encoded))
            }
            Node::Value(_) => Err(TrieError::invariant("bare value node outside a leaf")),
            Node::Account { .. } => Err(TrieError::invariant("bare account node outside a leaf")),
        }
    }

    /// RLP of a leaf node: `[compact(key, leaf), value]`.
    ///
    /// The key must not contain the terminator nibble.
    pub(crate) fn leaf_rlp(&mut self, key: &[u8], value: &[u8]) -> RlpNode {
        let compact = compact_encode(key, true);
        self.with_buf(|buf| {
            let payload_length = compact.as_slice().length() + value.length();
            Header { list: true, payload_length }.encode(buf);
            compact.as_slice().encode(buf);
            value.encode(buf);
            RlpNode::from_rlp(buf)
        })
    }

    /// RLP of an extension node: `[compact(key, !leaf), child]`, where the
    /// child is an already-encoded reference.
    pub(crate) fn extension_rlp(&mut self, key: &[u8], child: &RlpNode) -> RlpNode {
        let compact = compact_encode(key, false);
        self.with_buf(|buf| {
            let payload_length = compact.as_slice().length() + child.len();
            Header { list: true, payload_length }.encode(buf);
            compact.as_slice().encode(buf);
            buf.extend_from_slice(child);
            RlpNode::from_rlp(buf)
        })
    }

    /// RLP of a branch node: a 17-item list with the occupied slots given in
    /// ascending order and empty slots encoded as empty strings.
    pub(crate) fn branch_rlp(&mut self, mask: TrieMask, children: &[RlpNode]) -> RlpNode {
        debug_assert_eq!(mask.count_ones() as usize, children.len());
        self.with_buf(|buf| {
            let mut payload_length = 0;
            let mut child_iter = children.iter();
            for index in 0..17u8 {
                payload_length += if mask.is_bit_set(index) {
                    child_iter.next().map_or(1, |c| c.len())
                } else {
                    1
                };
            }
            Header { list: true, payload_length }.encode(buf);
            let mut child_iter = children.iter();
            for index in 0..17u8 {
                if mask.is_bit_set(index) {
                    if let Some(child) = child_iter.next() {
                        buf.extend_from_slice(child);
                    }
                } else {
                    buf.push(EMPTY_STRING_CODE);
                }
            }
            RlpNode::from_rlp(buf)
        })
    }

    fn with_buf<R>(&mut self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        let mut buf = mem::take(&mut self.buf);
        buf.clear();
        let out = f(&mut buf);
        self.buf = buf;
        out
    }
}
