//! The incremental hash builder.
//!
//! A stack machine that consumes a lexicographically sorted stream of hex
//! keys with values and produces the trie root hash in O(depth) working
//! memory. Between consecutive keys it runs one step over the window of
//! preceding, current and succeeding keys, folding every prefix group that
//! the current key closes: leaves first, then the extension wrapping a
//! freshly closed branch, then the branch itself.
//!
//! The builder maintains two stacks in lock-step: the RLP reference stack
//! carrying hashes (or sub-32-byte inlined encodings), and the node stack
//! carrying the partial trie. A subtree whose prefix the `hash_only`
//! predicate declares uninteresting occupies its node slot as a bare
//! [`Node::Hash`] reference.

use crate::{
    account::Account,
    hasher::Hasher,
    nodes::{Node, RlpNode, TERMINATOR},
    resolve_set::ResolveSet,
    TrieError, TrieMask, EMPTY_ROOT_HASH,
};
use alloy_primitives::B256;
use core::cmp;
use nybbles::Nibbles;
use tracing::trace;

/// The payload attached to the key currently held in the builder.
#[derive(Clone, Debug, PartialEq)]
pub enum HashBuilderValue {
    /// An opaque leaf value.
    Bytes(Vec<u8>),
    /// An account leaf, hashed as its canonical RLP.
    Account(Account),
}

impl Default for HashBuilderValue {
    fn default() -> Self {
        Self::Bytes(Vec::new())
    }
}

/// A component used to construct the root hash of the trie from a sorted
/// stream of leaves.
///
/// With a [`ResolveSet`] attached, the builder additionally materializes a
/// partial trie containing exactly the subtrees the set marks, leaving hash
/// references everywhere else.
#[derive(Debug, Default)]
pub struct HashBuilder {
    key: Nibbles,
    value: HashBuilderValue,
    /// Pending sibling masks, one per open depth.
    groups: Vec<TrieMask>,
    node_stack: Vec<Node>,
    rlp_stack: Vec<RlpNode>,
    hasher: Hasher,
    resolve_set: Option<ResolveSet>,
}

impl HashBuilder {
    /// Creates a builder that computes the root hash only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a resolve set; subtrees it marks are kept structurally in
    /// the node stack.
    pub fn with_resolve_set(mut self, resolve_set: ResolveSet) -> Self {
        self.resolve_set = Some(resolve_set);
        self
    }

    /// Removes and returns the attached resolve set.
    pub fn take_resolve_set(&mut self) -> Option<ResolveSet> {
        self.resolve_set.take()
    }

    /// Adds a leaf to the builder.
    ///
    /// The key is in hex form including the terminator nibble.
    ///
    /// # Panics
    ///
    /// Panics if the new key does not come after the current key.
    pub fn add_leaf(&mut self, key: Nibbles, value: Vec<u8>) {
        self.with_attached_set(|hb, hash_only| {
            hb.add_with(key, HashBuilderValue::Bytes(value), hash_only)
        });
    }

    /// Adds an account leaf to the builder. The account is committed as its
    /// canonical four-field RLP.
    ///
    /// # Panics
    ///
    /// Panics if the new key does not come after the current key.
    pub fn add_account(&mut self, key: Nibbles, account: Account) {
        self.with_attached_set(|hb, hash_only| {
            hb.add_with(key, HashBuilderValue::Account(account), hash_only)
        });
    }

    /// Returns the root hash of the trie built so far, flushing all pending
    /// levels. The root is always hashed, never inlined.
    pub fn root(&mut self) -> B256 {
        self.with_attached_set(|hb, hash_only| hb.root_with(hash_only))
    }

    /// [`Self::add_leaf`] with an explicit hash-only predicate.
    pub fn add_leaf_with(
        &mut self,
        key: Nibbles,
        value: Vec<u8>,
        hash_only: &mut dyn FnMut(&[u8]) -> bool,
    ) {
        self.add_with(key, HashBuilderValue::Bytes(value), hash_only);
    }

    /// [`Self::add_account`] with an explicit hash-only predicate.
    pub fn add_account_with(
        &mut self,
        key: Nibbles,
        account: Account,
        hash_only: &mut dyn FnMut(&[u8]) -> bool,
    ) {
        self.add_with(key, HashBuilderValue::Account(account), hash_only);
    }

    /// [`Self::root`] with an explicit hash-only predicate.
    pub fn root_with(&mut self, hash_only: &mut dyn FnMut(&[u8]) -> bool) -> B256 {
        if !self.key.is_empty() {
            self.step(&Nibbles::default(), hash_only);
            self.key.clear();
            self.value = HashBuilderValue::default();
        }
        self.rlp_stack.last().map_or(EMPTY_ROOT_HASH, RlpNode::forced_hash)
    }

    /// Flushes all pending levels and takes the built root off the stacks,
    /// leaving the builder empty and reusable.
    ///
    /// Returns `None` when no key was ever added. The reference is the
    /// subtree's plain encoding: callers hashing a whole trie force it.
    pub fn finish_with(
        &mut self,
        hash_only: &mut dyn FnMut(&[u8]) -> bool,
    ) -> Result<Option<(Node, RlpNode)>, TrieError> {
        if !self.key.is_empty() {
            self.step(&Nibbles::default(), hash_only);
            self.key.clear();
            self.value = HashBuilderValue::default();
        }
        self.groups.clear();
        let (node, rlp) = match (self.node_stack.pop(), self.rlp_stack.pop()) {
            (Some(node), Some(rlp)) => (node, rlp),
            (None, None) => return Ok(None),
            _ => return Err(TrieError::invariant("hash builder stacks out of step")),
        };
        if !self.node_stack.is_empty() || !self.rlp_stack.is_empty() {
            return Err(TrieError::invariant("hash builder stack not fully folded"));
        }
        Ok(Some((node, rlp)))
    }

    fn with_attached_set<R>(
        &mut self,
        f: impl FnOnce(&mut Self, &mut dyn FnMut(&[u8]) -> bool) -> R,
    ) -> R {
        let mut set = self.resolve_set.take();
        let mut hash_only =
            |prefix: &[u8]| set.as_mut().map_or(true, |set| set.hash_only(prefix));
        let out = f(self, &mut hash_only);
        self.resolve_set = set;
        out
    }

    fn add_with(
        &mut self,
        key: Nibbles,
        value: HashBuilderValue,
        hash_only: &mut dyn FnMut(&[u8]) -> bool,
    ) {
        assert!(key > self.key, "add key {:?} not after {:?}", key, self.key);
        if !self.key.is_empty() {
            self.step(&key, hash_only);
        }
        trace!(target: "trie::hash_builder", ?key, ?value, "setting current key");
        self.key = key;
        self.value = value;
    }

    /// One step of the stack machine: folds every level above the deepest
    /// point where the current key still shares a prefix with its window.
    fn step(&mut self, succeeding: &Nibbles, hash_only: &mut dyn FnMut(&[u8]) -> bool) {
        let mut first = true;
        let mut current = self.key.clone();
        debug_assert!(!current.is_empty());

        trace!(target: "trie::hash_builder", ?current, ?succeeding, "running step");

        loop {
            let preceding_exists = !self.groups.is_empty();
            let preceding_len = self.groups.len().saturating_sub(1);

            let common_prefix_len = succeeding.common_prefix_length(&current);
            let len = cmp::max(preceding_len, common_prefix_len);
            assert!(len < current.len(), "len {} current.len {}", len, current.len());

            // Record the current key's residue at this depth.
            let extra_digit = current[len];
            if self.groups.len() <= len {
                self.groups.resize(len + 1, TrieMask::default());
            }
            self.groups[len] |= TrieMask::from_nibble(extra_digit);
            trace!(
                target: "trie::hash_builder",
                len,
                common_prefix_len,
                preceding_len,
                extra_digit,
                groups = ?self.groups,
                "prefix lengths after comparing keys"
            );

            let mut len_from = len;
            if !succeeding.is_empty() || preceding_exists {
                len_from += 1;
            }

            let short_node_key = current.slice(len_from..);

            if first {
                self.push_leaf(&current, len_from, hash_only);
            } else if !short_node_key.is_empty() {
                self.push_extension(&current, len_from, &short_node_key, hash_only);
            }

            if preceding_len <= common_prefix_len && !succeeding.is_empty() {
                trace!(target: "trie::hash_builder", "group stays open, returning");
                return;
            }

            // Close the branch at this depth.
            if !succeeding.is_empty() || preceding_exists {
                self.push_branch(&current, len, hash_only);
            }

            self.groups.truncate(len);
            if preceding_len == 0 {
                return;
            }
            current.truncate(preceding_len);
            while self.groups.last() == Some(&TrieMask::default()) {
                self.groups.pop();
            }
            first = false;
        }
    }

    /// Pushes the current value as a leaf whose key is the remainder of
    /// `current` below `len_from`. An empty remainder is the
    /// terminator-sibling case: the leaf occupies branch slot 16.
    fn push_leaf(&mut self, current: &Nibbles, len_from: usize, hash_only: &mut dyn FnMut(&[u8]) -> bool) {
        let mut remainder = &current[len_from..];
        if remainder.last() == Some(&TERMINATOR) {
            remainder = &remainder[..remainder.len() - 1];
        }
        let rlp = match &self.value {
            HashBuilderValue::Bytes(value) => self.hasher.leaf_rlp(remainder, value),
            HashBuilderValue::Account(account) => {
                let encoded = account.rlp();
                self.hasher.leaf_rlp(remainder, &encoded)
            }
        };
        // A sub-32-byte subtree is embedded in its parent rather than
        // referenced, so it stays structural even when hash-only.
        let prefix = &current[..len_from];
        if hash_only(prefix) && rlp.is_hash() {
            self.node_stack.push(Node::Hash(rlp));
        } else {
            let child = match &self.value {
                HashBuilderValue::Bytes(value) => Node::Value(value.clone()),
                HashBuilderValue::Account(account) => {
                    Node::Account { account: *account, storage: None }
                }
            };
            self.node_stack.push(Node::Short {
                key: Nibbles::from_nibbles_unchecked(remainder),
                val: Box::new(child),
            });
        }
        trace!(target: "trie::hash_builder", ?prefix, ?rlp, "pushed leaf");
        self.rlp_stack.push(rlp);
    }

    /// Wraps the subtree on top of the stacks into an extension node.
    fn push_extension(
        &mut self,
        current: &Nibbles,
        len_from: usize,
        short_node_key: &Nibbles,
        hash_only: &mut dyn FnMut(&[u8]) -> bool,
    ) {
        let child_rlp = self.rlp_stack.pop().expect("extension child on rlp stack");
        let child_node = self.node_stack.pop().expect("extension child on node stack");
        let rlp = self.hasher.extension_rlp(short_node_key, &child_rlp);
        let prefix = &current[..len_from];
        if hash_only(prefix) && rlp.is_hash() {
            self.node_stack.push(Node::Hash(rlp));
        } else {
            self.node_stack.push(Node::Short {
                key: short_node_key.clone(),
                val: Box::new(child_node),
            });
        }
        trace!(target: "trie::hash_builder", ?prefix, key = ?short_node_key, ?rlp, "pushed extension");
        self.rlp_stack.push(rlp);
    }

    /// Closes the branch at depth `len`, replacing its children on the
    /// stacks with the single branch entry.
    fn push_branch(&mut self, current: &Nibbles, len: usize, hash_only: &mut dyn FnMut(&[u8]) -> bool) {
        let mask = self.groups[len];
        let child_count = mask.count_ones() as usize;
        let first_child = self.rlp_stack.len() - child_count;
        let rlp = self.hasher.branch_rlp(mask, &self.rlp_stack[first_child..]);
        let children = self.node_stack.split_off(first_child);
        self.rlp_stack.truncate(first_child);
        let prefix = &current[..len];
        if hash_only(prefix) && rlp.is_hash() {
            self.node_stack.push(Node::Hash(rlp));
        } else {
            self.node_stack.push(Node::branch(mask, children));
        }
        trace!(target: "trie::hash_builder", ?prefix, ?mask, ?rlp, "pushed branch");
        self.rlp_stack.push(rlp);
    }
}
