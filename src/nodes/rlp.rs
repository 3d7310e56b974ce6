use alloy_primitives::{hex, keccak256, B256};
use alloy_rlp::EMPTY_STRING_CODE;
use core::fmt;

const MAX: usize = 33;

/// An RLP-encoded node reference.
///
/// Holds either `rlp(keccak256(rlp(node)))` (a 33-byte hash reference) or,
/// when the node's RLP is shorter than 32 bytes, the raw RLP itself,
/// embedded verbatim in the parent. This is the load-bearing 32-byte
/// threshold of the trie hashing rules.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RlpNode {
    len: u8,
    buf: [u8; MAX],
}

impl Default for RlpNode {
    #[inline]
    fn default() -> Self {
        Self { len: 0, buf: [0; MAX] }
    }
}

impl core::ops::Deref for RlpNode {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl AsRef<[u8]> for RlpNode {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for RlpNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RlpNode({})", hex::encode_prefixed(self.as_slice()))
    }
}

impl RlpNode {
    /// Creates a new RLP-encoded node from the given data.
    ///
    /// Returns `None` if the data is longer than 33 bytes.
    #[inline]
    pub fn from_raw(data: &[u8]) -> Option<Self> {
        if data.len() > MAX {
            return None;
        }
        let mut buf = [0; MAX];
        buf[..data.len()].copy_from_slice(data);
        Some(Self { len: data.len() as u8, buf })
    }

    /// Given an RLP-encoded node, returns it either verbatim (when shorter
    /// than 32 bytes) or as the RLP of its keccak256 hash.
    #[inline]
    pub fn from_rlp(rlp: &[u8]) -> Self {
        if rlp.len() < 32 {
            // Fits by construction.
            Self::from_raw(rlp).unwrap()
        } else {
            Self::word_rlp(&keccak256(rlp))
        }
    }

    /// RLP-encodes the given word and returns it as a new RLP node.
    #[inline]
    pub fn word_rlp(word: &B256) -> Self {
        let mut buf = [0; MAX];
        buf[0] = EMPTY_STRING_CODE + 32;
        buf[1..].copy_from_slice(word.as_slice());
        Self { len: MAX as u8, buf }
    }

    /// Returns `true` if this is an RLP-encoded hash reference.
    #[inline]
    pub fn is_hash(&self) -> bool {
        self.len as usize == MAX
    }

    /// Returns the RLP-encoded node as a slice.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len as usize]
    }

    /// Returns the referenced hash if this is a hash reference.
    #[inline]
    pub fn as_hash(&self) -> Option<B256> {
        if self.is_hash() {
            Some(B256::from_slice(&self.as_slice()[1..]))
        } else {
            None
        }
    }

    /// The hash a caller obtains when this reference is forced to be a root:
    /// the embedded hash, or the keccak256 of the raw inlined RLP.
    ///
    /// The root of a trie is always hashed, never embedded.
    #[inline]
    pub fn forced_hash(&self) -> B256 {
        self.as_hash().unwrap_or_else(|| keccak256(self.as_slice()))
    }
}
