//! The set of hex prefixes that must stay structurally visible.

use crate::nodes::key_bytes_to_hex;
use nybbles::Nibbles;

/// An ordered set of hex-prefix keys flagging which subtrees must be kept
/// structurally instead of being replaced by hash references.
///
/// The single query [`hash_only`](Self::hash_only) answers whether a given
/// prefix is disjoint from every stored key: no stored key extends it and it
/// extends no stored key. The set keeps a cursor into its sorted keys that
/// follows the builder's left-to-right traversal.
#[derive(Debug, Default)]
pub struct ResolveSet {
    hexes: Vec<Nibbles>,
    sorted: bool,
    lte_index: usize,
}

impl ResolveSet {
    /// Creates an empty resolve set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key in byte form; it is stored in hex form with the
    /// terminator appended.
    pub fn add_key(&mut self, key: &[u8]) {
        self.add_hex(key_bytes_to_hex(key));
    }

    /// Adds a prefix already in hex form.
    pub fn add_hex(&mut self, hex: Nibbles) {
        self.sorted = false;
        self.hexes.push(hex);
    }

    /// Returns `true` if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.hexes.is_empty()
    }

    /// The stored hex keys, sorted.
    pub fn hexes(&mut self) -> &[Nibbles] {
        self.ensure_sorted();
        &self.hexes
    }

    /// Sorts the keys and drops every key that extends another: the shorter
    /// key already claims the whole subtree, and a prefix-free list is what
    /// makes the cursor's neighbor check complete.
    fn ensure_sorted(&mut self) {
        if self.sorted {
            return;
        }
        self.hexes.sort_unstable();
        let mut pruned: Vec<Nibbles> = Vec::with_capacity(self.hexes.len());
        for hex in self.hexes.drain(..) {
            if let Some(kept) = pruned.last() {
                if hex[..].starts_with(&kept[..]) {
                    continue;
                }
            }
            pruned.push(hex);
        }
        self.hexes = pruned;
        self.lte_index = 0;
        self.sorted = true;
    }

    /// Returns `true` iff no resolve interest intersects the subtree at
    /// `hex`: no stored key has `hex` as a prefix, and `hex` is not a
    /// prefix of any stored key.
    pub fn hash_only(&mut self, hex: &[u8]) -> bool {
        self.ensure_sorted();
        if self.hexes.is_empty() {
            return true;
        }
        while self.lte_index + 1 < self.hexes.len() && &self.hexes[self.lte_index + 1][..] <= hex {
            self.lte_index += 1;
        }
        while self.lte_index > 0 && &self.hexes[self.lte_index][..] > hex {
            self.lte_index -= 1;
        }
        let candidate = &self.hexes[self.lte_index];
        let gt_index = if &candidate[..] <= hex {
            if hex.starts_with(&candidate[..]) {
                return false;
            }
            self.lte_index + 1
        } else {
            self.lte_index
        };
        if let Some(above) = self.hexes.get(gt_index) {
            if above[..].starts_with(hex) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hex(nibbles: &[u8]) -> Nibbles {
        Nibbles::from_nibbles_unchecked(nibbles.to_vec())
    }

    #[test]
    fn intersections() {
        let mut rs = ResolveSet::new();
        rs.add_hex(hex(&[1, 2, 3]));
        rs.add_hex(hex(&[7]));

        // Enclosing prefixes of a stored key must resolve.
        assert!(!rs.hash_only(&[]));
        assert!(!rs.hash_only(&[1]));
        assert!(!rs.hash_only(&[1, 2]));
        // The key itself and its extensions must resolve.
        assert!(!rs.hash_only(&[1, 2, 3]));
        assert!(!rs.hash_only(&[1, 2, 3, 9]));
        // Disjoint subtrees do not.
        assert!(rs.hash_only(&[1, 2, 4]));
        assert!(rs.hash_only(&[2]));
        assert!(!rs.hash_only(&[7]));
        assert!(rs.hash_only(&[8, 0]));
    }

    #[test]
    fn contained_keys_are_pruned() {
        let mut rs = ResolveSet::new();
        rs.add_hex(hex(&[4, 2]));
        rs.add_hex(hex(&[4]));
        rs.add_hex(hex(&[4, 2, 1]));
        assert_eq!(rs.hexes(), &[hex(&[4])]);
        assert!(!rs.hash_only(&[4, 2, 1]));
        assert!(!rs.hash_only(&[4, 7]));
    }

    #[test]
    fn empty_set_is_all_hash() {
        let mut rs = ResolveSet::new();
        assert!(rs.hash_only(&[]));
        assert!(rs.hash_only(&[0, 1]));
    }

    proptest! {
        // The cursor answer must agree with the naive intersection scan for
        // any query sequence, sorted or not.
        #[test]
        fn matches_naive_predicate(
            keys in proptest::collection::vec(proptest::collection::vec(0u8..16, 1..8), 1..20),
            queries in proptest::collection::vec(proptest::collection::vec(0u8..16, 0..8), 1..40),
        ) {
            let mut rs = ResolveSet::new();
            for key in &keys {
                rs.add_hex(hex(key));
            }
            for query in &queries {
                let expected = !keys.iter().any(|k| {
                    k.starts_with(query) || query.starts_with(&k[..])
                });
                prop_assert_eq!(rs.hash_only(query), expected, "query {:?} of {:?}", query, keys);
            }
        }
    }
}
