//! Reconstruction of a trie from its serialized witness.

use super::{Instruction, CODES_TAPE, HASHES_TAPE, KEYS_TAPE, STRUCTURE_TAPE, VALUES_TAPE};
use crate::{
    account::Account,
    hasher::Hasher,
    nodes::{unpack_nibbles, Node, RlpNode},
    trie::Trie,
    HashMap, TrieError, EMPTY_ROOT_HASH,
};
use alloy_primitives::{keccak256, B256, U256};
use ciborium::Value;
use nybbles::Nibbles;

/// One tape body: back-to-back CBOR items.
#[derive(Debug)]
pub(super) struct Tape<'a> {
    name: &'static str,
    data: &'a [u8],
}

impl<'a> Tape<'a> {
    fn new(name: &'static str, data: &'a [u8]) -> Self {
        Self { name, data }
    }

    pub(super) fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(super) fn next(&mut self) -> Result<Value, TrieError> {
        if self.data.is_empty() {
            return Err(TrieError::corrupt(format!("{} tape overrun", self.name)));
        }
        ciborium::de::from_reader(&mut self.data)
            .map_err(|e| TrieError::corrupt(format!("{} tape: {e}", self.name)))
    }

    pub(super) fn next_bytes(&mut self) -> Result<Vec<u8>, TrieError> {
        match self.next()? {
            Value::Bytes(bytes) => Ok(bytes),
            other => {
                Err(TrieError::corrupt(format!("{} tape: expected bytes, got {other:?}", self.name)))
            }
        }
    }

    pub(super) fn next_uint(&mut self) -> Result<u64, TrieError> {
        match self.next()? {
            Value::Integer(int) => u64::try_from(i128::from(int))
                .map_err(|_| TrieError::corrupt(format!("{} tape: negative integer", self.name))),
            other => Err(TrieError::corrupt(format!(
                "{} tape: expected integer, got {other:?}",
                self.name
            ))),
        }
    }
}

/// The five tape bodies, sliced out of a serialized witness by the header
/// lengths.
#[derive(Debug)]
pub(super) struct Tapes<'a> {
    pub(super) keys: Tape<'a>,
    pub(super) values: Tape<'a>,
    pub(super) hashes: Tape<'a>,
    pub(super) codes: Tape<'a>,
    pub(super) structure: Tape<'a>,
}

impl<'a> Tapes<'a> {
    /// Parses the header and slices the bodies. The header lengths must
    /// account for every remaining byte.
    pub(super) fn split(witness: &'a [u8]) -> Result<Self, TrieError> {
        let mut rest = witness;
        let header: Value = ciborium::de::from_reader(&mut rest)
            .map_err(|e| TrieError::corrupt(format!("header: {e}")))?;
        let Value::Map(entries) = header else {
            return Err(TrieError::corrupt("header is not a map"));
        };
        let mut lengths: HashMap<String, usize> = HashMap::default();
        for (key, value) in entries {
            let (Value::Text(name), Value::Integer(len)) = (key, value) else {
                return Err(TrieError::corrupt("malformed header entry"));
            };
            let len = usize::try_from(i128::from(len))
                .map_err(|_| TrieError::corrupt("negative tape length"))?;
            lengths.insert(name, len);
        }
        let mut take = |name: &'static str| -> Result<Tape<'a>, TrieError> {
            let len = *lengths
                .get(name)
                .ok_or_else(|| TrieError::corrupt(format!("header missing {name} tape")))?;
            if rest.len() < len {
                return Err(TrieError::corrupt(format!("{name} tape length exceeds witness")));
            }
            let (body, remainder) = rest.split_at(len);
            rest = remainder;
            Ok(Tape::new(name, body))
        };
        let tapes = Self {
            keys: take(KEYS_TAPE)?,
            values: take(VALUES_TAPE)?,
            hashes: take(HASHES_TAPE)?,
            codes: take(CODES_TAPE)?,
            structure: take(STRUCTURE_TAPE)?,
        };
        if !rest.is_empty() {
            return Err(TrieError::corrupt("trailing bytes after tape bodies"));
        }
        Ok(tapes)
    }
}

/// Replays a serialized witness, returning the reconstructed trie and the
/// map of contract code by hash.
pub fn load_witness(witness: &[u8]) -> Result<(Trie, HashMap<B256, Vec<u8>>), TrieError> {
    let mut tapes = Tapes::split(witness)?;
    let mut machine = Machine::default();
    while !tapes.structure.is_empty() {
        let opcode = tapes.structure.next_uint()?;
        let instruction = u8::try_from(opcode)
            .ok()
            .and_then(Instruction::from_wire)
            .ok_or_else(|| TrieError::corrupt(format!("unknown opcode {opcode}")))?;
        machine.execute(instruction, &mut tapes)?;
    }
    for tape in [&tapes.keys, &tapes.values, &tapes.hashes, &tapes.codes] {
        if !tape.is_empty() {
            return Err(TrieError::corrupt(format!("{} tape not fully consumed", tape.name)));
        }
    }
    let Machine { mut node_stack, rlp_stack, codes, .. } = machine;
    if node_stack.len() != 1 || rlp_stack.len() != 1 {
        return Err(TrieError::corrupt(format!(
            "witness did not fold to a single root ({} nodes left)",
            node_stack.len()
        )));
    }
    let root = node_stack.pop().expect("length checked above");
    Ok((Trie::from_node(root), codes))
}

/// The replay stack machine. The node stack and the reference stack are
/// pushed and popped in lock-step; hash-only entries occupy their node slot
/// as [`Node::Hash`].
#[derive(Debug, Default)]
struct Machine {
    node_stack: Vec<Node>,
    rlp_stack: Vec<RlpNode>,
    hasher: Hasher,
    codes: HashMap<B256, Vec<u8>>,
}

impl Machine {
    fn execute(&mut self, instruction: Instruction, tapes: &mut Tapes<'_>) -> Result<(), TrieError> {
        match instruction {
            Instruction::Leaf | Instruction::LeafHash => {
                let key = leaf_key(tapes)?;
                let value = tapes.values.next_bytes()?;
                let rlp = self.hasher.leaf_rlp(&key, &value);
                let node = Node::Short { key, val: Box::new(Node::Value(value)) };
                if instruction == Instruction::Leaf {
                    self.push(node, rlp);
                } else {
                    self.push_hashed(node, rlp);
                }
            }
            Instruction::Extension | Instruction::ExtensionHash => {
                let key = extension_key(tapes)?;
                let (child, child_rlp) = self.pop()?;
                let rlp = self.hasher.extension_rlp(&key, &child_rlp);
                let node = Node::Short { key, val: Box::new(child) };
                if instruction == Instruction::Extension {
                    self.push(node, rlp);
                } else {
                    self.push_hashed(node, rlp);
                }
            }
            Instruction::Branch | Instruction::BranchHash => {
                let mask = branch_mask(tapes)?;
                let count = mask.count_ones() as usize;
                if self.node_stack.len() < count {
                    return Err(TrieError::corrupt("stack underflow in branch"));
                }
                let children = self.node_stack.split_off(self.node_stack.len() - count);
                let child_rlps = self.rlp_stack.split_off(self.rlp_stack.len() - count);
                let rlp = self.hasher.branch_rlp(mask, &child_rlps);
                let node = Node::branch(mask, children);
                if instruction == Instruction::Branch {
                    self.push(node, rlp);
                } else {
                    self.push_hashed(node, rlp);
                }
            }
            Instruction::Hash => {
                let count = tapes.structure.next_uint()?;
                for _ in 0..count {
                    let hash = fixed_hash(tapes.hashes.next_bytes()?)?;
                    let rlp = RlpNode::word_rlp(&hash);
                    self.push(Node::Hash(rlp), rlp);
                }
            }
            Instruction::Code => {
                let code = tapes.codes.next_bytes()?;
                let hash = keccak256(&code);
                self.codes.insert(hash, code);
                let rlp = RlpNode::word_rlp(&hash);
                self.push(Node::Hash(rlp), rlp);
            }
            Instruction::AccountLeaf | Instruction::AccountLeafHash => {
                let key = leaf_key(tapes)?;
                let account = Account {
                    nonce: tapes.values.next_uint()?,
                    balance: balance(tapes)?,
                    ..Default::default()
                };
                let rlp = self.hasher.leaf_rlp(&key, &account.rlp());
                let node = Node::Short { key, val: Box::new(Node::Account { account, storage: None }) };
                if instruction == Instruction::AccountLeaf {
                    self.push(node, rlp);
                } else {
                    self.push_hashed(node, rlp);
                }
            }
            Instruction::ContractLeaf | Instruction::ContractLeafHash => {
                let key = leaf_key(tapes)?;
                let nonce = tapes.values.next_uint()?;
                let balance = balance(tapes)?;
                let (_, code_rlp) = self.pop()?;
                let code_hash = code_rlp
                    .as_hash()
                    .ok_or_else(|| TrieError::corrupt("contract code reference not a hash"))?;
                let (storage_node, storage_rlp) = self.pop()?;
                let (storage_root, storage) = if storage_node.is_empty() {
                    (EMPTY_ROOT_HASH, None)
                } else {
                    (storage_rlp.forced_hash(), Some(Box::new(storage_node)))
                };
                let account = Account { nonce, balance, storage_root, code_hash };
                let rlp = self.hasher.leaf_rlp(&key, &account.rlp());
                let node = Node::Short { key, val: Box::new(Node::Account { account, storage }) };
                if instruction == Instruction::ContractLeaf {
                    self.push(node, rlp);
                } else {
                    self.push_hashed(node, rlp);
                }
            }
            Instruction::EmptyRoot => {
                self.push(Node::Empty, RlpNode::word_rlp(&EMPTY_ROOT_HASH));
            }
        }
        Ok(())
    }

    fn push(&mut self, node: Node, rlp: RlpNode) {
        self.node_stack.push(node);
        self.rlp_stack.push(rlp);
    }

    /// Push for the `*Hash` opcodes: the node slot holds a bare reference,
    /// except below the 32-byte threshold, where the node is embedded in
    /// its parent and travels structurally.
    fn push_hashed(&mut self, node: Node, rlp: RlpNode) {
        let node = if rlp.is_hash() { Node::Hash(rlp) } else { node };
        self.push(node, rlp);
    }

    fn pop(&mut self) -> Result<(Node, RlpNode), TrieError> {
        match (self.node_stack.pop(), self.rlp_stack.pop()) {
            (Some(node), Some(rlp)) => Ok((node, rlp)),
            _ => Err(TrieError::corrupt("stack underflow")),
        }
    }
}

fn leaf_key(tapes: &mut Tapes<'_>) -> Result<Nibbles, TrieError> {
    let len = tapes.structure.next_uint()? as usize;
    if len > crate::LEVELS {
        return Err(TrieError::corrupt(format!("leaf key length {len} exceeds max depth")));
    }
    let packed = tapes.keys.next_bytes()?;
    unpack_nibbles(&packed, len)
        .ok_or_else(|| TrieError::corrupt("leaf key does not match its length operand"))
}

fn extension_key(tapes: &mut Tapes<'_>) -> Result<Nibbles, TrieError> {
    let nibbles = tapes.structure.next_bytes()?;
    if nibbles.is_empty() {
        return Err(TrieError::corrupt("empty extension key"));
    }
    if nibbles.iter().any(|n| *n > 0x0f) {
        return Err(TrieError::corrupt("extension key nibble out of range"));
    }
    Ok(Nibbles::from_vec_unchecked(nibbles))
}

fn branch_mask(tapes: &mut Tapes<'_>) -> Result<crate::TrieMask, TrieError> {
    let raw = tapes.structure.next_uint()?;
    if raw == 0 || raw >= 1 << 17 {
        return Err(TrieError::corrupt(format!("branch mask {raw:#x} out of range")));
    }
    let mask = crate::TrieMask::new(raw as u32);
    if mask.count_ones() < 2 {
        return Err(TrieError::corrupt("branch with fewer than two children"));
    }
    Ok(mask)
}

fn balance(tapes: &mut Tapes<'_>) -> Result<U256, TrieError> {
    let bytes = tapes.values.next_bytes()?;
    if bytes.is_empty() {
        return Err(TrieError::corrupt("empty balance encoding"));
    }
    U256::try_from_be_slice(&bytes)
        .ok_or_else(|| TrieError::InvalidAccount { reason: "balance longer than 32 bytes".into() })
}

fn fixed_hash(bytes: Vec<u8>) -> Result<B256, TrieError> {
    if bytes.len() != 32 {
        return Err(TrieError::corrupt(format!("hash item of {} bytes", bytes.len())));
    }
    Ok(B256::from_slice(&bytes))
}
