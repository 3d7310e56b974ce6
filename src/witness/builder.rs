//! Serialization of a (partial) trie into the witness tapes.

use super::{Instruction, CODES_TAPE, HASHES_TAPE, KEYS_TAPE, STRUCTURE_TAPE, VALUES_TAPE};
use crate::{
    hasher::Hasher,
    nodes::{pack_nibbles, Node},
    resolve_set::ResolveSet,
    trie::Trie,
    TrieError,
};
use alloy_primitives::{B256, U256};
use ciborium::Value;

/// Resolves contract bytecode from its hash while building a witness.
pub type CodeFromHash<'a> = dyn Fn(B256) -> Option<Vec<u8>> + 'a;

/// One tape: a byte buffer of back-to-back CBOR items.
#[derive(Debug, Default)]
struct TapeWriter {
    buf: Vec<u8>,
}

impl TapeWriter {
    fn write(&mut self, value: &Value) -> Result<(), TrieError> {
        ciborium::ser::into_writer(value, &mut self.buf)
            .map_err(|e| TrieError::invariant(format!("tape encoding failed: {e}")))
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), TrieError> {
        self.write(&Value::Bytes(bytes.to_vec()))
    }

    fn write_uint(&mut self, value: u64) -> Result<(), TrieError> {
        self.write(&Value::Integer(value.into()))
    }
}

/// Accumulates the five witness tapes while walking a trie.
///
/// For every node the resolve set declares uninteresting, only its hash is
/// shipped; resolved subtrees are shipped structurally so that the loader
/// can answer lookups on them.
#[derive(Debug, Default)]
pub struct WitnessBuilder {
    keys: TapeWriter,
    values: TapeWriter,
    hashes: TapeWriter,
    codes: TapeWriter,
    structure: TapeWriter,
    hasher: Hasher,
}

impl WitnessBuilder {
    /// Creates an empty witness builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the witness of the given trie, keeping the subtrees the
    /// resolve set marks. Contract code is pulled through `code_from_hash`.
    pub fn make_block_witness(
        &mut self,
        trie: &Trie,
        resolve_set: &mut ResolveSet,
        code_from_hash: &CodeFromHash<'_>,
    ) -> Result<(), TrieError> {
        let mut hex = Vec::new();
        self.walk(trie.root(), &mut hex, resolve_set, true, code_from_hash)
    }

    /// Serializes the header and the five tape bodies.
    ///
    /// The header is a canonical CBOR map of tape names to byte lengths,
    /// with keys in bytewise order; the bodies follow back-to-back in the
    /// fixed order keys, values, hashes, codes, structure.
    pub fn serialize(&self) -> Result<Vec<u8>, TrieError> {
        let entry = |name: &str, tape: &TapeWriter| {
            (Value::Text(name.to_string()), Value::Integer((tape.buf.len() as u64).into()))
        };
        let header = Value::Map(vec![
            entry(CODES_TAPE, &self.codes),
            entry(HASHES_TAPE, &self.hashes),
            entry(KEYS_TAPE, &self.keys),
            entry(STRUCTURE_TAPE, &self.structure),
            entry(VALUES_TAPE, &self.values),
        ]);
        let mut out = Vec::new();
        ciborium::ser::into_writer(&header, &mut out)
            .map_err(|e| TrieError::invariant(format!("header encoding failed: {e}")))?;
        out.extend_from_slice(&self.keys.buf);
        out.extend_from_slice(&self.values.buf);
        out.extend_from_slice(&self.hashes.buf);
        out.extend_from_slice(&self.codes.buf);
        out.extend_from_slice(&self.structure.buf);
        Ok(out)
    }

    fn walk(
        &mut self,
        node: &Node,
        hex: &mut Vec<u8>,
        resolve_set: &mut ResolveSet,
        force: bool,
        code_from_hash: &CodeFromHash<'_>,
    ) -> Result<(), TrieError> {
        match node {
            Node::Empty => self.op(Instruction::EmptyRoot),
            Node::Hash(rlp) => {
                let hash = rlp
                    .as_hash()
                    .ok_or_else(|| TrieError::invariant("embedded reference in witness walk"))?;
                self.supply_hash(hash)?;
                self.op_hash(1)
            }
            Node::Value(value) => self.values.write_bytes(value),
            Node::Short { key, val } => {
                // Save the decision: the set's cursor moves on during the
                // recursive invocation.
                let hash_only = resolve_set.hash_only(hex);
                let saved = hex.len();
                hex.extend_from_slice(key);
                self.walk(val, hex, resolve_set, false, code_from_hash)?;
                hex.truncate(saved);
                match val.as_ref() {
                    Node::Value(_) => {
                        // The recursion supplied the value.
                        self.supply_key(key)?;
                        let op =
                            if hash_only { Instruction::LeafHash } else { Instruction::Leaf };
                        self.op_with_len(op, key.len())
                    }
                    Node::Account { account, .. } => {
                        // The recursion supplied storage, code, nonce and
                        // balance.
                        self.supply_key(key)?;
                        let plain = account.is_empty_root() && account.is_empty_code_hash();
                        let op = match (hash_only, plain) {
                            (false, true) => Instruction::AccountLeaf,
                            (true, true) => Instruction::AccountLeafHash,
                            (false, false) => Instruction::ContractLeaf,
                            (true, false) => Instruction::ContractLeafHash,
                        };
                        self.op_with_len(op, key.len())
                    }
                    _ => {
                        let op = if hash_only {
                            Instruction::ExtensionHash
                        } else {
                            Instruction::Extension
                        };
                        self.op(op)?;
                        self.structure.write_bytes(key)
                    }
                }
            }
            Node::Duo { .. } | Node::Full { .. } => {
                let hash_only = resolve_set.hash_only(hex);
                if hash_only {
                    let rlp = self.hasher.hash_node(node, force)?;
                    // A sub-32-byte branch is embedded in its parent; it
                    // travels structurally.
                    if let Some(hash) = rlp.as_hash() {
                        self.supply_hash(hash)?;
                        return self.op_hash(1);
                    }
                }
                let mut mask = 0u32;
                for index in 0..17u8 {
                    if let Some(child) = node.child(index) {
                        mask |= 1 << index;
                        hex.push(index);
                        self.walk(child, hex, resolve_set, false, code_from_hash)?;
                        hex.pop();
                    }
                }
                self.op(Instruction::Branch)?;
                self.structure.write_uint(mask as u64)
            }
            Node::Account { account, storage } => {
                let hash_only = resolve_set.hash_only(hex);
                if !account.is_empty_root() || !account.is_empty_code_hash() {
                    if hash_only {
                        let storage_root = match storage {
                            Some(node) => self
                                .hasher
                                .hash_node(node, true)?
                                .as_hash()
                                .ok_or_else(|| TrieError::invariant("forced hash not 32 bytes"))?,
                            None => account.storage_root,
                        };
                        self.supply_hash(storage_root)?;
                        self.supply_hash(account.code_hash)?;
                        self.op_hash(2)?;
                    } else {
                        match storage {
                            Some(node) => {
                                self.walk(node, hex, resolve_set, true, code_from_hash)?
                            }
                            None if account.is_empty_root() => self.op(Instruction::EmptyRoot)?,
                            // Storage that was never materialized travels
                            // as its root hash.
                            None => {
                                self.supply_hash(account.storage_root)?;
                                self.op_hash(1)?;
                            }
                        }
                        let code = if account.is_empty_code_hash() {
                            Vec::new()
                        } else {
                            code_from_hash(account.code_hash).ok_or_else(|| {
                                TrieError::InvalidAccount {
                                    reason: format!("no code for hash {}", account.code_hash),
                                }
                            })?
                        };
                        self.codes.write_bytes(&code)?;
                        self.op(Instruction::Code)?;
                    }
                }
                self.values.write_uint(account.nonce)?;
                self.supply_balance(&account.balance)
            }
        }
    }

    /// Keys travel packed, two nibbles per byte; the opcode's length
    /// operand disambiguates odd lengths.
    fn supply_key(&mut self, key: &[u8]) -> Result<(), TrieError> {
        self.keys.write_bytes(&pack_nibbles(key))
    }

    fn supply_hash(&mut self, hash: B256) -> Result<(), TrieError> {
        self.hashes.write_bytes(hash.as_slice())
    }

    /// Balance travels as its minimal big-endian bytes; zero is a single
    /// zero byte, never the empty string.
    fn supply_balance(&mut self, balance: &U256) -> Result<(), TrieError> {
        let mut bytes = balance.to_be_bytes_trimmed_vec();
        if bytes.is_empty() {
            bytes.push(0);
        }
        self.values.write_bytes(&bytes)
    }

    fn op(&mut self, instruction: Instruction) -> Result<(), TrieError> {
        self.structure.write_uint(instruction as u64)
    }

    fn op_with_len(&mut self, instruction: Instruction, len: usize) -> Result<(), TrieError> {
        self.op(instruction)?;
        self.structure.write_uint(len as u64)
    }

    fn op_hash(&mut self, count: u64) -> Result<(), TrieError> {
        self.op(Instruction::Hash)?;
        self.structure.write_uint(count)
    }
}
