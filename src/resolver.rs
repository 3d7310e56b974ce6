//! The streaming resolver: drives the key-value store to materialize
//! requested subtrees.

use crate::{
    account::Account,
    hash_builder::HashBuilder,
    nodes::{key_bytes_to_hex, pack_nibbles, Node},
    resolve_set::ResolveSet,
    trie::Trie,
    TrieError, EMPTY_ROOT_HASH,
};
use alloy_primitives::B256;
use nybbles::Nibbles;
use tracing::trace;

/// Bucket holding the current account state.
pub const ACCOUNTS_BUCKET: &[u8] = b"AT";
/// Bucket holding historical account state.
pub const ACCOUNTS_HISTORY_BUCKET: &[u8] = b"hAT";
/// Bucket holding the current contract storage.
pub const STORAGE_BUCKET: &[u8] = b"ST";
/// Bucket holding historical contract storage.
pub const STORAGE_HISTORY_BUCKET: &[u8] = b"hST";

/// The callback driven by [`Database`] walks: `(request_idx, key, value)`.
/// Returning `Ok(false)` stops the walk early.
pub type Walker<'a> = dyn FnMut(usize, &[u8], &[u8]) -> Result<bool, TrieError> + 'a;

/// The ordered key-value iteration contract the host provides.
///
/// Both walks yield, in ascending key order within each request,
/// `(request_idx, key, value)` triples where the key shares the given
/// fixed-bit prefix with `start_keys[request_idx]`. Errors from the walker
/// are propagated verbatim; host-side failures surface as
/// [`TrieError::IterationAborted`].
pub trait Database {
    /// Walks the current state of a bucket.
    fn multi_walk(
        &self,
        bucket: &[u8],
        start_keys: &[Vec<u8>],
        fixed_bits: &[usize],
        walker: &mut Walker<'_>,
    ) -> Result<(), TrieError>;

    /// Walks the historical snapshot visible at `block_number`.
    fn multi_walk_as_of(
        &self,
        bucket: &[u8],
        history_bucket: &[u8],
        start_keys: &[Vec<u8>],
        fixed_bits: &[usize],
        block_number: u64,
        walker: &mut Walker<'_>,
    ) -> Result<(), TrieError>;
}

/// A single resolution request: materialize the subtree rooted at
/// `resolve_hex[..resolve_pos]` and verify it hashes to `resolve_hash`.
#[derive(Debug)]
pub struct ResolveRequest {
    /// The contract address prefix for storage requests.
    pub contract: Option<Vec<u8>>,
    /// The hex key the request was created for.
    pub resolve_hex: Nibbles,
    /// The nibble depth the subtree is rooted at.
    pub resolve_pos: usize,
    /// The hash the resolved subtree must produce. `None` accepts an
    /// embedded (sub-32-byte) subtree.
    pub resolve_hash: Option<B256>,
    resolved: Option<Node>,
    ext_resolve_pos: usize,
}

impl ResolveRequest {
    /// Creates a request.
    pub fn new(
        contract: Option<Vec<u8>>,
        resolve_hex: Nibbles,
        resolve_pos: usize,
        resolve_hash: Option<B256>,
    ) -> Self {
        debug_assert!(resolve_pos <= resolve_hex.len());
        Self { contract, resolve_hex, resolve_pos, resolve_hash, resolved: None, ext_resolve_pos: 0 }
    }

    /// The materialized subtree, once the resolver has run.
    pub fn resolved(&self) -> Option<&Node> {
        self.resolved.as_ref()
    }

    /// Takes the materialized subtree for splicing into its parent trie.
    pub fn take_resolved(&mut self) -> Option<Node> {
        self.resolved.take()
    }

    /// The request key in the composite key space: the contract address in
    /// hex form (no terminator) followed by the request hex.
    fn composite_hex(&self) -> Nibbles {
        match &self.contract {
            None => self.resolve_hex.clone(),
            Some(contract) => {
                let mut hex = Vec::with_capacity(contract.len() * 2 + self.resolve_hex.len());
                for byte in contract {
                    hex.push(byte >> 4);
                    hex.push(byte & 0x0f);
                }
                hex.extend_from_slice(&self.resolve_hex[..]);
                Nibbles::from_vec_unchecked(hex)
            }
        }
    }
}

/// Subtrees rooted this many nibbles deep are kept structural when the
/// resolver retains intermediates. A cache-retention heuristic, not a
/// correctness requirement.
const RETENTION_DEPTH: usize = 5;

/// One resolver per trie.
///
/// Collects [`ResolveRequest`]s, drives the [`Database`] multi-walk over
/// them in lexicographic order, folds each request's key stream through the
/// [`HashBuilder`] and verifies the resulting root bit-exactly against the
/// request's expected hash.
pub struct TrieResolver {
    accounts: bool,
    retain_intermediates: bool,
    historical: bool,
    block_number: u64,
    requests: Vec<ResolveRequest>,
    resolve_set: ResolveSet,
    request_indices: Vec<usize>,
    key_index: usize,
    current_base: Nibbles,
    current_trim: usize,
    hb: HashBuilder,
}

impl core::fmt::Debug for TrieResolver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TrieResolver")
            .field("accounts", &self.accounts)
            .field("block_number", &self.block_number)
            .field("requests", &self.requests.len())
            .finish()
    }
}

impl TrieResolver {
    /// Creates a resolver for the account trie (`accounts = true`) or a
    /// storage trie. With `retain_intermediates` set, subtrees rooted at a
    /// shallow fixed depth are kept structural for reuse as a lookup cache.
    pub fn new(accounts: bool, retain_intermediates: bool, block_number: u64) -> Self {
        Self {
            accounts,
            retain_intermediates,
            historical: false,
            block_number,
            requests: Vec::new(),
            resolve_set: ResolveSet::new(),
            request_indices: Vec::new(),
            key_index: 0,
            current_base: Nibbles::default(),
            current_trim: 0,
            hb: HashBuilder::new(),
        }
    }

    /// Switches the resolver to the historical snapshot at its block
    /// number.
    pub fn set_historical(&mut self, historical: bool) {
        self.historical = historical;
    }

    /// Adds a request. Requests strictly contained in another one are
    /// dropped during preparation; their subtree arrives with the outer
    /// request.
    pub fn add_request(&mut self, request: ResolveRequest) {
        self.resolve_set.add_hex(request.composite_hex());
        self.requests.push(request);
    }

    /// The collected requests, with their resolved subtrees filled in after
    /// [`Self::resolve`].
    pub fn take_requests(&mut self) -> Vec<ResolveRequest> {
        core::mem::take(&mut self.requests)
    }

    /// Sorts the requests (more general first), drops contained ones and
    /// produces the multi-walk start keys and fixed-bit prefix lengths.
    fn prepare(&mut self) -> (Vec<Vec<u8>>, Vec<usize>) {
        self.requests.sort_by(|a, b| {
            let m = a.resolve_pos.min(b.resolve_pos);
            a.contract
                .cmp(&b.contract)
                .then_with(|| a.resolve_hex[..m].cmp(&b.resolve_hex[..m]))
                .then_with(|| a.resolve_pos.cmp(&b.resolve_pos))
        });
        let mut start_keys = Vec::new();
        let mut fixed_bits = Vec::new();
        self.request_indices.clear();
        let mut last_kept: Option<usize> = None;
        for i in 0..self.requests.len() {
            if let Some(j) = last_kept {
                let prev = &self.requests[j];
                let req = &self.requests[i];
                let contained = req.resolve_pos >= prev.resolve_pos
                    && req.contract == prev.contract
                    && req.resolve_hex[..req.resolve_pos]
                        .starts_with(&prev.resolve_hex[..prev.resolve_pos]);
                if contained {
                    continue;
                }
            }
            last_kept = Some(i);
            self.request_indices.push(i);
            let req = &mut self.requests[i];
            let contract_len = req.contract.as_deref().map_or(0, <[u8]>::len);
            req.ext_resolve_pos = req.resolve_pos + 2 * contract_len;
            let mut key = vec![0u8; contract_len + 32];
            if let Some(contract) = &req.contract {
                key[..contract_len].copy_from_slice(contract);
            }
            let packed = pack_nibbles(&req.resolve_hex[..req.resolve_pos]);
            key[contract_len..contract_len + packed.len()].copy_from_slice(&packed);
            start_keys.push(key);
            fixed_bits.push(4 * req.ext_resolve_pos);
        }
        (start_keys, fixed_bits)
    }

    /// Resolves all requests against the database.
    ///
    /// On success every non-contained request carries its materialized
    /// subtree; on [`TrieError::HashMismatch`] the cycle is aborted and no
    /// trie has been touched.
    pub fn resolve(&mut self, db: &dyn Database) -> Result<(), TrieError> {
        let (start_keys, fixed_bits) = self.prepare();
        if start_keys.is_empty() {
            return Ok(());
        }
        self.begin_request(0);
        let (bucket, history_bucket) = if self.accounts {
            (ACCOUNTS_BUCKET, ACCOUNTS_HISTORY_BUCKET)
        } else {
            (STORAGE_BUCKET, STORAGE_HISTORY_BUCKET)
        };
        trace!(
            target: "trie::resolver",
            requests = self.request_indices.len(),
            accounts = self.accounts,
            historical = self.historical,
            "starting resolve cycle"
        );
        let historical = self.historical;
        let block_number = self.block_number;
        let mut walker =
            |idx: usize, key: &[u8], value: &[u8]| -> Result<bool, TrieError> {
                self.walk(idx, key, value)
            };
        if historical {
            db.multi_walk_as_of(
                bucket,
                history_bucket,
                &start_keys,
                &fixed_bits,
                block_number + 1,
                &mut walker,
            )?;
        } else {
            db.multi_walk(bucket, &start_keys, &fixed_bits, &mut walker)?;
        }
        self.finish_request()
    }

    fn begin_request(&mut self, walk_index: usize) {
        self.key_index = walk_index;
        let req = &self.requests[self.request_indices[walk_index]];
        self.current_trim = req.ext_resolve_pos;
        self.current_base = Nibbles::from_nibbles_unchecked(
            &req.composite_hex()[..req.ext_resolve_pos],
        );
    }

    fn walk(&mut self, walk_index: usize, key: &[u8], value: &[u8]) -> Result<bool, TrieError> {
        if walk_index != self.key_index {
            self.finish_request()?;
            self.begin_request(walk_index);
        }
        if value.is_empty() {
            return Ok(true);
        }
        let hex = key_bytes_to_hex(key);
        let sub_key = hex.slice(self.current_trim..);
        self.feed(sub_key, value)?;
        Ok(true)
    }

    fn feed(&mut self, sub_key: Nibbles, value: &[u8]) -> Result<(), TrieError> {
        let Self { hb, resolve_set, current_base, retain_intermediates, accounts, .. } = self;
        let mut hash_only = |relative: &[u8]| {
            let mut absolute = Vec::with_capacity(current_base.len() + relative.len());
            absolute.extend_from_slice(current_base);
            absolute.extend_from_slice(relative);
            let kept = *retain_intermediates && absolute.len() == RETENTION_DEPTH;
            resolve_set.hash_only(&absolute) && !kept
        };
        if *accounts {
            let account = Account::decode_flexible(value)?;
            hb.add_account_with(sub_key, account, &mut hash_only);
        } else {
            hb.add_leaf_with(sub_key, value.to_vec(), &mut hash_only);
        }
        Ok(())
    }

    /// Folds the remaining levels of the current request, verifies the root
    /// against the expected hash and stores the materialized subtree.
    fn finish_request(&mut self) -> Result<(), TrieError> {
        let folded = {
            let Self { hb, resolve_set, current_base, retain_intermediates, .. } = self;
            let mut hash_only = |relative: &[u8]| {
                let mut absolute = Vec::with_capacity(current_base.len() + relative.len());
                absolute.extend_from_slice(current_base);
                absolute.extend_from_slice(relative);
                let kept = *retain_intermediates && absolute.len() == RETENTION_DEPTH;
                resolve_set.hash_only(&absolute) && !kept
            };
            hb.finish_with(&mut hash_only)?
        };
        let request = &mut self.requests[self.request_indices[self.key_index]];
        let Some((node, rlp)) = folded else {
            if let Some(expected) = request.resolve_hash {
                return Err(TrieError::HashMismatch {
                    expected,
                    got: EMPTY_ROOT_HASH,
                    key: request.resolve_hex.clone(),
                    pos: request.resolve_pos,
                });
            }
            return Ok(());
        };
        let got = rlp.forced_hash();
        let embedded = request.resolve_pos > 0 && !rlp.is_hash();
        if let Some(expected) = request.resolve_hash {
            if embedded || got != expected {
                return Err(TrieError::HashMismatch {
                    expected,
                    got,
                    key: request.resolve_hex.clone(),
                    pos: request.resolve_pos,
                });
            }
        }
        trace!(
            target: "trie::resolver",
            key = ?request.resolve_hex,
            pos = request.resolve_pos,
            block_number = self.block_number,
            "resolved subtree"
        );
        request.resolved = Some(node);
        Ok(())
    }

    /// Splices every resolved subtree into the trie and stamps it with the
    /// resolver's block number.
    ///
    /// Account-trie subtrees land at `resolve_hex[..resolve_pos]`. A
    /// contract request's subtree lands inside the storage slot of the
    /// account its contract key leads to: the splice prefix is the contract
    /// key in hex form followed by the request's resolve prefix.
    pub fn apply(&mut self, trie: &mut Trie) -> Result<(), TrieError> {
        let block_number = self.block_number;
        for request in &mut self.requests {
            let Some(node) = request.resolved.take() else {
                continue;
            };
            let mut prefix = Vec::new();
            if let Some(contract) = &request.contract {
                for byte in contract {
                    prefix.push(byte >> 4);
                    prefix.push(byte & 0x0f);
                }
            }
            prefix.extend_from_slice(&request.resolve_hex[..request.resolve_pos]);
            trie.splice_subtree(&prefix, node)?;
            trie.timestamp_subtree(&prefix, block_number);
        }
        Ok(())
    }
}

impl Trie {
    /// Resolves the whole trie from the database, verifying against the
    /// current root hash reference.
    ///
    /// The root must be an unresolved hash reference; an empty trie is a
    /// no-op.
    pub fn rebuild(&mut self, db: &dyn Database, block_number: u64) -> Result<B256, TrieError> {
        let expected = match self.root() {
            Node::Empty => return Ok(EMPTY_ROOT_HASH),
            Node::Hash(rlp) => rlp
                .as_hash()
                .ok_or_else(|| TrieError::invariant("embedded root reference"))?,
            _ => return Err(TrieError::invariant("rebuild of an already materialized trie")),
        };
        let mut resolver = TrieResolver::new(true, true, block_number);
        resolver.add_request(ResolveRequest::new(None, Nibbles::default(), 0, Some(expected)));
        resolver.resolve(db)?;
        resolver.apply(self)?;
        trace!(target: "trie::resolver", root = %expected, "rebuilt trie and verified root");
        Ok(expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{load_witness, ExtAccount, Hasher, WitnessBuilder, KECCAK_EMPTY};
    use alloy_primitives::{keccak256, U256};
    use std::collections::{BTreeMap, HashMap};

    #[derive(Default)]
    struct MemDb {
        buckets: HashMap<Vec<u8>, BTreeMap<Vec<u8>, Vec<u8>>>,
    }

    impl MemDb {
        fn put(&mut self, bucket: &[u8], key: Vec<u8>, value: Vec<u8>) {
            self.buckets.entry(bucket.to_vec()).or_default().insert(key, value);
        }
    }

    fn nibble_at(bytes: &[u8], index: usize) -> u8 {
        let byte = bytes[index / 2];
        if index % 2 == 0 {
            byte >> 4
        } else {
            byte & 0x0f
        }
    }

    fn shares_prefix(key: &[u8], start: &[u8], bits: usize) -> bool {
        let nibbles = bits / 4;
        if key.len() * 2 < nibbles {
            return false;
        }
        (0..nibbles).all(|i| nibble_at(key, i) == nibble_at(start, i))
    }

    impl Database for MemDb {
        fn multi_walk(
            &self,
            bucket: &[u8],
            start_keys: &[Vec<u8>],
            fixed_bits: &[usize],
            walker: &mut Walker<'_>,
        ) -> Result<(), TrieError> {
            let Some(map) = self.buckets.get(bucket) else { return Ok(()) };
            for (idx, (start, bits)) in start_keys.iter().zip(fixed_bits).enumerate() {
                for (key, value) in map {
                    if shares_prefix(key, start, *bits) && !walker(idx, key, value)? {
                        return Ok(());
                    }
                }
            }
            Ok(())
        }

        fn multi_walk_as_of(
            &self,
            bucket: &[u8],
            _history_bucket: &[u8],
            start_keys: &[Vec<u8>],
            fixed_bits: &[usize],
            _block_number: u64,
            walker: &mut Walker<'_>,
        ) -> Result<(), TrieError> {
            // The in-memory store has no history; the snapshot equals the
            // current state.
            self.multi_walk(bucket, start_keys, fixed_bits, walker)
        }
    }

    fn account_fixture(count: u8) -> (MemDb, Trie, Vec<(B256, Account)>) {
        let mut db = MemDb::default();
        let mut trie = Trie::new();
        let mut accounts = Vec::new();
        for i in 0..count {
            let key = keccak256([i]);
            let account = Account {
                nonce: i as u64,
                balance: U256::from(i as u64 * 1000),
                ..Default::default()
            };
            // Alternate the stored shapes the walker must normalize.
            let stored = match i % 3 {
                0 => account.rlp(),
                1 => alloy_rlp::encode(ExtAccount { nonce: account.nonce, balance: account.balance }),
                _ => vec![0xc0],
            };
            let account = if i % 3 == 2 { Account::default() } else { account };
            db.put(ACCOUNTS_BUCKET, key.to_vec(), stored);
            trie.update_account(key.as_slice(), account, None).unwrap();
            accounts.push((key, account));
        }
        (db, trie, accounts)
    }

    #[test]
    fn rebuild_whole_trie() {
        let (db, mut reference, accounts) = account_fixture(50);
        let root = reference.hash().unwrap();

        let mut trie = Trie::from_hash(root);
        assert_eq!(trie.rebuild(&db, 7).unwrap(), root);
        assert_eq!(trie.hash().unwrap(), root);
        assert_eq!(trie.subtree_timestamp(&[]), Some(7));
        for (key, account) in &accounts {
            assert_eq!(trie.get_account(key.as_slice()), Some(account));
        }
    }

    #[test]
    fn resolve_subtree_and_splice() {
        let (db, mut reference, _) = account_fixture(64);
        let root_hash = reference.hash().unwrap();

        // Pick a populated child of the root branch and compute its hash.
        let mut hasher = Hasher::new();
        let (nibble, child_hash) = (0u8..16)
            .find_map(|n| {
                let child = reference.root().child(n)?;
                let rlp = hasher.hash_node(child, false).ok()?;
                rlp.as_hash().map(|h| (n, h))
            })
            .expect("root branch has a hashable child");

        let mut resolver = TrieResolver::new(true, false, 3);
        resolver.add_request(ResolveRequest::new(
            None,
            Nibbles::from_nibbles_unchecked([nibble]),
            1,
            Some(child_hash),
        ));
        resolver.resolve(&db).unwrap();

        // Replace that child with a hash reference and splice the resolved
        // subtree back in.
        let mut root = reference.root().clone();
        *root.child_mut(nibble).unwrap() =
            Node::Hash(crate::RlpNode::word_rlp(&child_hash));
        let mut partial = Trie::from_node(root);
        resolver.apply(&mut partial).unwrap();
        assert_eq!(partial.hash().unwrap(), root_hash);
        assert_eq!(partial.subtree_timestamp(&[nibble]), Some(3));
    }

    #[test]
    fn hash_mismatch_aborts() {
        let (db, _, _) = account_fixture(8);
        let bogus = keccak256(b"not the root");
        let mut resolver = TrieResolver::new(true, false, 0);
        resolver.add_request(ResolveRequest::new(None, Nibbles::default(), 0, Some(bogus)));
        let err = resolver.resolve(&db).unwrap_err();
        match err {
            TrieError::HashMismatch { expected, got, pos, .. } => {
                assert_eq!(expected, bogus);
                assert_ne!(got, bogus);
                assert_eq!(pos, 0);
            }
            other => panic!("expected HashMismatch, got {other:?}"),
        }
    }

    #[test]
    fn contained_requests_are_dropped() {
        let (db, mut reference, accounts) = account_fixture(16);
        let root = reference.hash().unwrap();
        let mut resolver = TrieResolver::new(true, false, 0);
        resolver.add_request(ResolveRequest::new(None, Nibbles::default(), 0, Some(root)));
        // Strictly contained in the root request.
        let hex = key_bytes_to_hex(accounts[0].0.as_slice());
        resolver.add_request(ResolveRequest::new(None, hex, 4, None));
        resolver.resolve(&db).unwrap();
        let requests = resolver.take_requests();
        assert_eq!(requests.iter().filter(|r| r.resolved().is_some()).count(), 1);
    }

    // The full contract pipeline: storage resolved from the database over
    // composite keys, spliced into the owning account's storage slot and
    // then witnessed.
    #[test]
    fn resolved_storage_attaches_to_account() {
        let contract = [0xab; 20];
        let mut db = MemDb::default();
        let mut storage_reference = Trie::new();
        let mut slots = Vec::new();
        for i in 0u8..32 {
            let key = keccak256([i, 0xee]);
            let value = alloy_rlp::encode(U256::from(i as u64 + 1));
            let mut composite = contract.to_vec();
            composite.extend_from_slice(key.as_slice());
            db.put(STORAGE_BUCKET, composite.clone(), value.clone());
            storage_reference.update(key.as_slice(), value.clone()).unwrap();
            slots.push((composite, value));
        }
        let storage_root = storage_reference.hash().unwrap();

        // The account trie is keyed by the same contract key that prefixes
        // the storage bucket; the storage starts out unloaded.
        let account =
            Account { nonce: 4, balance: U256::from(777u64), storage_root, ..Default::default() };
        let mut trie = Trie::new();
        trie.update_account(&contract, account, None).unwrap();
        let root = trie.hash().unwrap();
        assert_eq!(trie.get(&slots[0].0), None);

        let mut resolver = TrieResolver::new(false, false, 11);
        resolver.add_request(ResolveRequest::new(
            Some(contract.to_vec()),
            Nibbles::default(),
            0,
            Some(storage_root),
        ));
        resolver.resolve(&db).unwrap();
        resolver.apply(&mut trie).unwrap();

        // The subtree sits in the account's storage slot: the root is
        // unchanged, the composite prefix is stamped and composite lookups
        // reach the storage values.
        assert_eq!(trie.hash().unwrap(), root);
        let contract_hex: Vec<u8> = contract.iter().flat_map(|b| [b >> 4, b & 0x0f]).collect();
        assert_eq!(trie.subtree_timestamp(&contract_hex), Some(11));
        for (composite, value) in &slots {
            assert_eq!(trie.get(composite), Some(&value[..]));
        }

        // The attached storage is witnessable end to end.
        let mut resolve_set = ResolveSet::new();
        resolve_set.add_key(&slots[0].0);
        let mut builder = WitnessBuilder::new();
        builder.make_block_witness(&trie, &mut resolve_set, &|_| None).unwrap();
        let witness = builder.serialize().unwrap();
        let (mut loaded, _) = load_witness(&witness).unwrap();
        assert_eq!(loaded.hash().unwrap(), root);
        assert_eq!(loaded.get_account(&contract), Some(&account));
        assert_eq!(loaded.get(&slots[0].0), Some(&slots[0].1[..]));
    }

    #[test]
    fn historical_walk_resolves() {
        let (db, mut reference, _) = account_fixture(12);
        let root = reference.hash().unwrap();
        let mut resolver = TrieResolver::new(true, false, 100);
        resolver.set_historical(true);
        resolver.add_request(ResolveRequest::new(None, Nibbles::default(), 0, Some(root)));
        resolver.resolve(&db).unwrap();
        assert!(resolver.take_requests()[0].resolved().is_some());
    }

    #[test]
    fn invalid_account_value_propagates() {
        let mut db = MemDb::default();
        db.put(ACCOUNTS_BUCKET, keccak256([1u8]).to_vec(), vec![0x01, 0x02, 0x03]);
        let mut resolver = TrieResolver::new(true, false, 0);
        resolver.add_request(ResolveRequest::new(None, Nibbles::default(), 0, None));
        assert!(matches!(resolver.resolve(&db), Err(TrieError::InvalidAccount { .. })));
    }

    #[test]
    fn iteration_abort_propagates() {
        struct FailingDb;
        impl Database for FailingDb {
            fn multi_walk(
                &self,
                _: &[u8],
                _: &[Vec<u8>],
                _: &[usize],
                _: &mut Walker<'_>,
            ) -> Result<(), TrieError> {
                Err(TrieError::IterationAborted { cause: "disk on fire".into() })
            }
            fn multi_walk_as_of(
                &self,
                _: &[u8],
                _: &[u8],
                _: &[Vec<u8>],
                _: &[usize],
                _: u64,
                _: &mut Walker<'_>,
            ) -> Result<(), TrieError> {
                Err(TrieError::IterationAborted { cause: "disk on fire".into() })
            }
        }
        let mut resolver = TrieResolver::new(true, false, 0);
        resolver.add_request(ResolveRequest::new(None, Nibbles::default(), 0, None));
        assert!(matches!(
            resolver.resolve(&FailingDb),
            Err(TrieError::IterationAborted { .. })
        ));
    }

    #[test]
    fn empty_accounts_resolve_to_defaults() {
        let (db, _, accounts) = account_fixture(9);
        let defaults: Vec<_> =
            accounts.iter().filter(|(_, a)| *a == Account::default()).collect();
        assert!(!defaults.is_empty());
        let mut resolver = TrieResolver::new(true, false, 0);
        resolver.add_request(ResolveRequest::new(None, Nibbles::default(), 0, None));
        resolver.resolve(&db).unwrap();
        let mut requests = resolver.take_requests();
        let trie = Trie::from_node(requests[0].take_resolved().unwrap());
        for (key, _) in defaults {
            let account = trie.get_account(key.as_slice()).unwrap();
            assert_eq!(account.nonce, 0);
            assert_eq!(account.code_hash, KECCAK_EMPTY);
        }
    }
}
