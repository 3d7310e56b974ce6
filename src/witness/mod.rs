//! The block witness codec.
//!
//! A witness is five byte streams ("tapes") of back-to-back CBOR items —
//! keys, values, hashes, contract codes and structure — preceded by a
//! canonical CBOR header mapping each tape name to its byte length. The
//! structure tape holds the opcodes of a stack machine; replaying them
//! against the other tapes reconstructs the partial trie and lets a
//! stateless client recompute the root hash.

mod builder;
pub use builder::{CodeFromHash, WitnessBuilder};

mod loader;
pub use loader::load_witness;

pub(crate) const KEYS_TAPE: &str = "keys";
pub(crate) const VALUES_TAPE: &str = "values";
pub(crate) const HASHES_TAPE: &str = "hashes";
pub(crate) const CODES_TAPE: &str = "codes";
pub(crate) const STRUCTURE_TAPE: &str = "structure";

/// The opcodes of the structure tape. The numeric assignments are stable
/// wire values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Instruction {
    /// Consumes a key and a value from the tapes, pushes a leaf node and
    /// its hash.
    Leaf = 0,
    /// Like [`Instruction::Leaf`], but pushes only the would-be leaf's
    /// hash.
    LeafHash = 1,
    /// Pops a node, wraps it in an extension node with the operand key and
    /// pushes it with its hash.
    Extension = 2,
    /// Pops a hash and pushes the hash of the would-be extension node.
    ExtensionHash = 3,
    /// Pops one child per bit of the operand mask, pushes the branch node
    /// and its hash.
    Branch = 4,
    /// Pops one child hash per bit of the operand mask, pushes the hash of
    /// the would-be branch node.
    BranchHash = 5,
    /// Reads the operand's number of hashes from the hashes tape and pushes
    /// them; the first ends up deepest.
    Hash = 6,
    /// Reads a bytecode item from the codes tape, pushes a code node and
    /// its hash.
    Code = 7,
    /// Consumes a key, a nonce and a balance; pushes an account leaf
    /// without storage or code, and its hash.
    AccountLeaf = 8,
    /// Like [`Instruction::AccountLeaf`], but pushes only the hash.
    AccountLeafHash = 9,
    /// Consumes a key, a nonce and a balance, pops the code and storage
    /// nodes; pushes the contract account leaf and its hash.
    ContractLeaf = 10,
    /// Like [`Instruction::ContractLeaf`], but pops and pushes hashes only.
    ContractLeafHash = 11,
    /// Pushes the empty trie and its well-known hash.
    EmptyRoot = 12,
}

impl Instruction {
    /// Decodes a wire value.
    pub fn from_wire(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Leaf,
            1 => Self::LeafHash,
            2 => Self::Extension,
            3 => Self::ExtensionHash,
            4 => Self::Branch,
            5 => Self::BranchHash,
            6 => Self::Hash,
            7 => Self::Code,
            8 => Self::AccountLeaf,
            9 => Self::AccountLeafHash,
            10 => Self::ContractLeaf,
            11 => Self::ContractLeafHash,
            12 => Self::EmptyRoot,
            _ => return None,
        })
    }
}
