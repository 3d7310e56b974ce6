use alloy_primitives::B256;
use nybbles::Nibbles;
use thiserror::Error;

/// Error type for trie, resolver and witness operations.
///
/// All recoverable errors bubble up to the caller; none are retried
/// internally.
#[derive(Error, Debug)]
pub enum TrieError {
    /// A resolved subtree's root hash does not match the hash the resolve
    /// request expected. The resolve cycle is aborted and the original trie
    /// is left untouched in its hash-reference state.
    #[error("wrong hash when resolving key {key:?} at pos {pos}: expected {expected}, got {got}")]
    HashMismatch {
        /// The hash the request expected.
        expected: B256,
        /// The hash the resolved subtree produced.
        got: B256,
        /// The hex key of the request.
        key: Nibbles,
        /// The nibble position the request resolves at.
        pos: usize,
    },

    /// A block witness could not be replayed: stack underflow, unknown
    /// opcode, tape overrun, CBOR parse failure or header length mismatch.
    #[error("corrupt witness: {reason}")]
    CorruptWitness {
        /// What was malformed.
        reason: String,
    },

    /// An account value failed to decode, or a storage root / code hash had
    /// the wrong length.
    #[error("invalid account: {reason}")]
    InvalidAccount {
        /// What was malformed.
        reason: String,
    },

    /// The key-value iterator reported an error; propagated verbatim.
    #[error("iteration aborted")]
    IterationAborted {
        /// The underlying cause.
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A node variant was observed where it is impossible. Always a bug.
    #[error("internal invariant violated: {what}")]
    InternalInvariant {
        /// The violated invariant.
        what: String,
    },
}

impl TrieError {
    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        Self::CorruptWitness { reason: reason.into() }
    }

    pub(crate) fn invariant(what: impl Into<String>) -> Self {
        Self::InternalInvariant { what: what.into() }
    }
}
