//! An in-memory partial trie.

use crate::{
    account::Account,
    hasher::Hasher,
    nodes::{Node, RlpNode},
    HashMap, TrieError, TrieMask, EMPTY_ROOT_HASH,
};
use alloy_primitives::B256;
use nybbles::Nibbles;

/// A partial Merkle-Patricia trie.
///
/// Holds materialized nodes for the resolved subtrees and [`Node::Hash`]
/// references everywhere else. Resolved subtrees are stamped with the block
/// number they were resolved at, in a side table keyed by prefix, so that
/// pruners can age them.
#[derive(Debug, Default)]
pub struct Trie {
    root: Node,
    hasher: Hasher,
    timestamps: HashMap<Nibbles, u64>,
}

impl Trie {
    /// Creates an empty trie.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a trie whose root is an unresolved reference to the given
    /// hash. The empty-root hash and the zero hash produce an empty trie.
    pub fn from_hash(root: B256) -> Self {
        let root = if root == EMPTY_ROOT_HASH || root == B256::ZERO {
            Node::Empty
        } else {
            Node::Hash(RlpNode::word_rlp(&root))
        };
        Self::from_node(root)
    }

    /// Creates a trie around an existing root node.
    pub fn from_node(root: Node) -> Self {
        Self { root, ..Default::default() }
    }

    /// The root node.
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Consumes the trie, returning its root node.
    pub fn into_root(self) -> Node {
        self.root
    }

    /// The forced root hash; the empty trie hashes to the well-known
    /// empty-root constant.
    pub fn hash(&mut self) -> Result<B256, TrieError> {
        self.hasher
            .hash_node(&self.root, true)?
            .as_hash()
            .ok_or_else(|| TrieError::invariant("forced root hash not 32 bytes"))
    }

    /// Inserts or replaces a plain value.
    ///
    /// Fails with [`TrieError::InternalInvariant`] when the path descends
    /// through an unresolved [`Node::Hash`] reference.
    pub fn update(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), TrieError> {
        let nibbles = key_nibbles(key);
        let root = core::mem::take(&mut self.root);
        self.root = insert(root, &nibbles, Node::Value(value))?;
        Ok(())
    }

    /// Inserts or replaces an account leaf, optionally attaching its loaded
    /// storage subtree.
    pub fn update_account(
        &mut self,
        key: &[u8],
        account: Account,
        storage: Option<Node>,
    ) -> Result<(), TrieError> {
        let nibbles = key_nibbles(key);
        let root = core::mem::take(&mut self.root);
        self.root = insert(root, &nibbles, Node::Account { account, storage: storage.map(Box::new) })?;
        Ok(())
    }

    /// Looks up the value stored under a key. Returns `None` for absent
    /// keys and for keys blocked by an unresolved reference.
    ///
    /// A composite key (account key followed by a storage key) descends
    /// through the account leaf into its loaded storage subtree.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        match lookup(&self.root, &key_nibbles(key)) {
            Some(Node::Value(value)) => Some(value),
            _ => None,
        }
    }

    /// Looks up the account stored under a key.
    pub fn get_account(&self, key: &[u8]) -> Option<&Account> {
        match lookup(&self.root, &key_nibbles(key)) {
            Some(Node::Account { account, .. }) => Some(account),
            _ => None,
        }
    }

    /// Splices a freshly resolved subtree into the slot reached by the
    /// given hex prefix.
    ///
    /// The slot must hold a hash reference (or be the root of an empty
    /// trie); a slot that is already materialized is left untouched, so a
    /// repeated resolution is a no-op. A prefix that leads to an account
    /// leaf addresses the account's storage slot: the nibbles after the
    /// account key continue inside its storage subtree, and a prefix ending
    /// exactly at the account attaches the subtree as its storage.
    pub fn splice_subtree(&mut self, prefix: &[u8], node: Node) -> Result<(), TrieError> {
        splice(&mut self.root, prefix, node)
    }

    /// Stamps the subtree at the given prefix with the block number it was
    /// resolved at.
    pub fn timestamp_subtree(&mut self, prefix: &[u8], block_number: u64) {
        self.timestamps.insert(Nibbles::from_nibbles_unchecked(prefix), block_number);
    }

    /// The block number the subtree at the given prefix was last resolved
    /// at, if it ever was.
    pub fn subtree_timestamp(&self, prefix: &[u8]) -> Option<u64> {
        self.timestamps.get(&Nibbles::from_nibbles_unchecked(prefix)).copied()
    }
}

/// Key nibbles without the terminator.
fn key_nibbles(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() * 2);
    for byte in key {
        out.push(byte >> 4);
        out.push(byte & 0x0f);
    }
    out
}

fn leaf(key: &[u8], payload: Node) -> Node {
    Node::Short { key: Nibbles::from_nibbles_unchecked(key), val: Box::new(payload) }
}

fn insert(node: Node, key: &[u8], payload: Node) -> Result<Node, TrieError> {
    match node {
        Node::Empty => Ok(leaf(key, payload)),
        Node::Hash(_) => Err(TrieError::invariant("insert into unresolved subtree")),
        Node::Value(_) | Node::Account { .. } => {
            if key.is_empty() {
                return Ok(payload);
            }
            // The existing key is a proper prefix of the new one: the old
            // payload moves to the terminator slot of a new branch.
            let mask = TrieMask::from_nibble(key[0]) | TrieMask::from_nibble(16);
            Ok(Node::branch(mask, vec![leaf(&key[1..], payload), leaf(&[], node)]))
        }
        Node::Short { key: node_key, val } => {
            let common = common_prefix(&node_key, key);
            if common == node_key.len() {
                let val = insert(*val, &key[common..], payload)?;
                // A leaf whose payload grew into a branch must not become an
                // empty-key extension; the branch takes the slot directly.
                if node_key.is_empty() && !matches!(val, Node::Value(_) | Node::Account { .. }) {
                    return Ok(val);
                }
                return Ok(Node::Short { key: node_key, val: Box::new(val) });
            }
            // Split the short node at the divergence point.
            let old_index = node_key[common];
            let old_rest = &node_key[common + 1..];
            let old_child = if old_rest.is_empty() {
                match *val {
                    child @ (Node::Value(_) | Node::Account { .. }) => leaf(&[], child),
                    child => child,
                }
            } else {
                Node::Short {
                    key: Nibbles::from_nibbles_unchecked(old_rest),
                    val,
                }
            };
            let (new_index, new_child) = if common == key.len() {
                // The new key ends at the branch: terminator slot.
                (16u8, leaf(&[], payload))
            } else {
                (key[common], leaf(&key[common + 1..], payload))
            };
            if new_index == old_index {
                return Err(TrieError::invariant("short node split on equal nibble"));
            }
            let mask = TrieMask::from_nibble(old_index) | TrieMask::from_nibble(new_index);
            let children = if old_index < new_index {
                vec![old_child, new_child]
            } else {
                vec![new_child, old_child]
            };
            let branch = Node::branch(mask, children);
            Ok(if common > 0 {
                Node::Short {
                    key: Nibbles::from_nibbles_unchecked(&key[..common]),
                    val: Box::new(branch),
                }
            } else {
                branch
            })
        }
        duo @ Node::Duo { .. } => insert(duo.into_full(), key, payload),
        Node::Full { mut children } => {
            let index = if key.is_empty() { 16 } else { key[0] as usize };
            let rest = if key.is_empty() { &[][..] } else { &key[1..] };
            let slot = children[index].take().map_or(Node::Empty, |child| *child);
            let child =
                if index == 16 { leaf(&[], payload) } else { insert(slot, rest, payload)? };
            children[index] = Some(Box::new(child));
            // Branches with exactly two children canonicalize to `Duo`, so
            // every construction path produces the same shape.
            let occupied = children.iter().filter(|c| c.is_some()).count();
            if occupied == 2 {
                let mut mask = TrieMask::default();
                let mut pair = Vec::with_capacity(2);
                for (i, slot) in children.iter_mut().enumerate() {
                    if let Some(child) = slot.take() {
                        mask.set_bit(i as u8);
                        pair.push(*child);
                    }
                }
                return Ok(Node::branch(mask, pair));
            }
            Ok(Node::Full { children })
        }
    }
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn lookup<'a>(node: &'a Node, key: &[u8]) -> Option<&'a Node> {
    match node {
        Node::Empty | Node::Hash(_) => None,
        Node::Value(_) => key.is_empty().then_some(node),
        Node::Account { storage, .. } => {
            if key.is_empty() {
                Some(node)
            } else {
                // A composite key continues inside the contract's storage.
                storage.as_deref().and_then(|storage| lookup(storage, key))
            }
        }
        Node::Short { key: node_key, val } => key
            .strip_prefix(&node_key[..])
            .and_then(|rest| lookup(val, rest)),
        Node::Duo { .. } | Node::Full { .. } => {
            let (index, rest) =
                if key.is_empty() { (16, &[][..]) } else { (key[0], &key[1..]) };
            node.child(index).and_then(|child| lookup(child, rest))
        }
    }
}

fn splice(node: &mut Node, prefix: &[u8], subtree: Node) -> Result<(), TrieError> {
    if prefix.is_empty() {
        match node {
            Node::Hash(_) | Node::Empty => *node = subtree,
            // The prefix ends at an account leaf: the subtree is its
            // resolved storage. An already materialized subtree is left
            // untouched.
            Node::Account { storage, .. } => {
                let unresolved = match storage {
                    None => true,
                    Some(slot) => matches!(slot.as_ref(), Node::Hash(_) | Node::Empty),
                };
                if unresolved {
                    *storage = Some(Box::new(subtree));
                }
            }
            _ => {}
        }
        return Ok(());
    }
    match node {
        Node::Short { key, val } if prefix.starts_with(&key[..]) => {
            let at = key.len();
            splice(val, &prefix[at..], subtree)
        }
        Node::Duo { .. } | Node::Full { .. } => {
            let child = node
                .child_mut(prefix[0])
                .ok_or_else(|| TrieError::invariant("splice path leaves the trie"))?;
            splice(child, &prefix[1..], subtree)
        }
        // The remaining nibbles continue inside the contract's storage.
        Node::Account { storage, .. } => {
            let storage = storage
                .as_deref_mut()
                .ok_or_else(|| TrieError::invariant("splice into unloaded storage"))?;
            splice(storage, prefix, subtree)
        }
        _ => Err(TrieError::invariant("splice path leaves the trie")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{key_bytes_to_hex, triehash_trie_root, HashBuilder};
    use alloy_primitives::{keccak256, U256};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    #[test]
    fn empty_root_hash() {
        assert_eq!(Trie::new().hash().unwrap(), EMPTY_ROOT_HASH);
        assert_eq!(Trie::from_hash(B256::ZERO).hash().unwrap(), EMPTY_ROOT_HASH);
    }

    #[test]
    fn insert_get_overwrite() {
        let mut trie = Trie::new();
        trie.update(b"doe", b"reindeer".to_vec()).unwrap();
        trie.update(b"dog", b"puppy".to_vec()).unwrap();
        trie.update(b"dogglesworth", b"cat".to_vec()).unwrap();
        assert_eq!(trie.get(b"dog"), Some(&b"puppy"[..]));
        assert_eq!(trie.get(b"doe"), Some(&b"reindeer"[..]));
        assert_eq!(trie.get(b"dogglesworth"), Some(&b"cat"[..]));
        assert_eq!(trie.get(b"do"), None);
        trie.update(b"dog", b"hound".to_vec()).unwrap();
        assert_eq!(trie.get(b"dog"), Some(&b"hound"[..]));
    }

    #[test]
    fn accounts_round_trip() {
        let mut trie = Trie::new();
        let account = Account { nonce: 7, balance: U256::from(100u64), ..Default::default() };
        let key = keccak256(b"addr");
        trie.update_account(key.as_slice(), account, None).unwrap();
        assert_eq!(trie.get_account(key.as_slice()), Some(&account));
        assert_eq!(trie.get(key.as_slice()), None);
    }

    #[test]
    fn reference_root_matches_triehash() {
        let pairs = BTreeMap::from([
            (b"doe".to_vec(), b"reindeer".to_vec()),
            (b"dog".to_vec(), b"puppy".to_vec()),
            (b"dig".to_vec(), b"coin".to_vec()),
            (b"hos".to_vec(), b"stallion".to_vec()),
        ]);
        let mut trie = Trie::new();
        for (key, value) in &pairs {
            trie.update(key, value.clone()).unwrap();
        }
        assert_eq!(trie.hash().unwrap(), triehash_trie_root(&pairs));
    }

    // Prefix keys are outside what the external reference supports; the
    // builder and the trie must still agree with each other on them. Hex
    // order puts a key after its extensions, so the shorter key is fed
    // last.
    #[test]
    fn prefix_keys_builder_agreement() {
        let mut trie = Trie::new();
        trie.update(b"ab", b"extension-first".to_vec()).unwrap();
        trie.update(b"a", b"prefix-second".to_vec()).unwrap();

        let mut hb = HashBuilder::new();
        hb.add_leaf(key_bytes_to_hex(b"ab"), b"extension-first".to_vec());
        hb.add_leaf(key_bytes_to_hex(b"a"), b"prefix-second".to_vec());

        assert_eq!(trie.hash().unwrap(), hb.root());
        assert_eq!(trie.get(b"a"), Some(&b"prefix-second"[..]));
        assert_eq!(trie.get(b"ab"), Some(&b"extension-first"[..]));
    }

    #[test]
    fn splice_replaces_hash_reference() {
        // Build a real trie, then recreate it from its root hash and splice
        // the materialized root back in.
        let mut trie = Trie::new();
        trie.update(&[0x12, 0x34], vec![1, 2, 3]).unwrap();
        trie.update(&[0x12, 0x44], vec![4, 5, 6]).unwrap();
        let root_hash = trie.hash().unwrap();

        let mut unresolved = Trie::from_hash(root_hash);
        assert_eq!(unresolved.get(&[0x12, 0x34]), None);
        unresolved.splice_subtree(&[], trie.root().clone()).unwrap();
        unresolved.timestamp_subtree(&[], 42);
        assert_eq!(unresolved.hash().unwrap(), root_hash);
        assert_eq!(unresolved.get(&[0x12, 0x34]), Some(&[1u8, 2, 3][..]));
        assert_eq!(unresolved.subtree_timestamp(&[]), Some(42));
    }

    #[test]
    fn splice_attaches_account_storage() {
        let mut storage = Trie::new();
        storage.update(&[0x55, 0x66], vec![9, 9]).unwrap();
        let storage_root = storage.hash().unwrap();

        let account = Account { storage_root, ..Default::default() };
        let key = [0x21u8; 4];
        let mut trie = Trie::new();
        trie.update_account(&key, account, None).unwrap();
        let root = trie.hash().unwrap();

        // The account's prefix addresses its storage slot.
        let prefix: Vec<u8> = key.iter().flat_map(|b| [b >> 4, b & 0x0f]).collect();
        trie.splice_subtree(&prefix, storage.into_root()).unwrap();
        assert_eq!(trie.hash().unwrap(), root);

        let mut composite = key.to_vec();
        composite.extend_from_slice(&[0x55, 0x66]);
        assert_eq!(trie.get(&composite), Some(&[9u8, 9][..]));

        // A repeated resolution leaves the materialized storage untouched.
        trie.splice_subtree(&prefix, Node::Empty).unwrap();
        assert_eq!(trie.get(&composite), Some(&[9u8, 9][..]));
    }

    proptest! {
        #[test]
        fn arbitrary_roots_match_triehash(entries in proptest::collection::btree_map(
            proptest::collection::vec(any::<u8>(), 8..=8),
            proptest::collection::vec(any::<u8>(), 0..=80),
            1..80,
        )) {
            let mut trie = Trie::new();
            for (key, value) in &entries {
                trie.update(key, value.clone()).unwrap();
            }
            prop_assert_eq!(trie.hash().unwrap(), triehash_trie_root(&entries));
        }

        #[test]
        fn arbitrary_get_returns_inserted(entries in proptest::collection::btree_map(
            proptest::collection::vec(any::<u8>(), 4..=4),
            proptest::collection::vec(any::<u8>(), 1..=16),
            1..40,
        )) {
            let mut trie = Trie::new();
            for (key, value) in &entries {
                trie.update(key, value.clone()).unwrap();
            }
            for (key, value) in &entries {
                prop_assert_eq!(trie.get(key), Some(&value[..]));
            }
        }
    }
}
