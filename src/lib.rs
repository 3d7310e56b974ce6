#![doc = include_str!("../README.md")]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    rustdoc::all
)]
#![deny(unused_must_use, rust_2018_idioms)]

pub mod nodes;
pub use nodes::{compact_to_hex, hex_to_compact, key_bytes_to_hex, Node, RlpNode};

pub mod hash_builder;
pub use hash_builder::{HashBuilder, HashBuilderValue};

mod mask;
pub use mask::TrieMask;

mod account;
pub use account::{Account, ExtAccount};

mod error;
pub use error::TrieError;

mod hasher;
pub use hasher::Hasher;

mod resolve_set;
pub use resolve_set::ResolveSet;

mod trie;
pub use trie::Trie;

mod resolver;
pub use resolver::{
    Database, ResolveRequest, TrieResolver, ACCOUNTS_BUCKET, ACCOUNTS_HISTORY_BUCKET,
    STORAGE_BUCKET, STORAGE_HISTORY_BUCKET,
};

pub mod witness;
pub use witness::{load_witness, Instruction, WitnessBuilder};

#[cfg(test)]
pub(crate) mod triehash_compat;
#[cfg(test)]
pub(crate) use triehash_compat::triehash_trie_root;

pub use nybbles::Nibbles;

pub(crate) use alloy_primitives::map::HashMap;

/// Root hash of an empty trie: `keccak256(rlp(""))`.
pub const EMPTY_ROOT_HASH: alloy_primitives::B256 =
    alloy_primitives::b256!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");

/// Hash of empty code: `keccak256([])`.
pub const KECCAK_EMPTY: alloy_primitives::B256 =
    alloy_primitives::b256!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470");

/// Maximum trie depth in nibbles: a 52-byte composite key (20-byte contract
/// address followed by a 32-byte storage key hash).
pub const LEVELS: usize = 104;
