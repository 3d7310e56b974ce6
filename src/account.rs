use crate::{TrieError, EMPTY_ROOT_HASH, KECCAK_EMPTY};
use alloy_primitives::{keccak256, B256, U256};
use alloy_rlp::{RlpDecodable, RlpEncodable};

/// An account in the account trie.
#[derive(Copy, Clone, Debug, PartialEq, Eq, RlpDecodable, RlpEncodable)]
pub struct Account {
    /// The account's nonce.
    pub nonce: u64,
    /// The account's balance.
    pub balance: U256,
    /// The root hash of the account's storage trie.
    pub storage_root: B256,
    /// The hash of the account's code.
    pub code_hash: B256,
}

/// The abbreviated on-disk form of an account without storage or code.
#[derive(Copy, Clone, Debug, PartialEq, Eq, RlpDecodable, RlpEncodable)]
pub struct ExtAccount {
    /// The account's nonce.
    pub nonce: u64,
    /// The account's balance.
    pub balance: U256,
}

impl Default for Account {
    fn default() -> Self {
        Self { nonce: 0, balance: U256::ZERO, storage_root: EMPTY_ROOT_HASH, code_hash: KECCAK_EMPTY }
    }
}

impl From<ExtAccount> for Account {
    fn from(ext: ExtAccount) -> Self {
        Self { nonce: ext.nonce, balance: ext.balance, ..Default::default() }
    }
}

/// Below this encoded length the value cannot carry a storage root and a
/// code hash, so it must be the abbreviated form.
const MIN_FULL_ACCOUNT_LEN: usize = 60;

impl Account {
    /// Returns `true` if the storage trie is empty.
    pub fn is_empty_root(&self) -> bool {
        self.storage_root == EMPTY_ROOT_HASH
    }

    /// Returns `true` if the account has no code.
    pub fn is_empty_code_hash(&self) -> bool {
        self.code_hash == KECCAK_EMPTY
    }

    /// The canonical four-field RLP, as committed to in the trie.
    pub fn rlp(&self) -> Vec<u8> {
        alloy_rlp::encode(self)
    }

    /// Hash of the canonical RLP.
    pub fn trie_hash_slow(&self) -> B256 {
        keccak256(self.rlp())
    }

    /// Decodes any of the three on-disk value shapes and normalizes it to
    /// the canonical full form:
    ///
    /// * a single byte — an untouched externally-owned account: zero nonce
    ///   and balance, empty storage root, empty code hash;
    /// * a short RLP list `{nonce, balance}` — storage root and code hash
    ///   filled in with the empty constants;
    /// * the full four-field RLP — taken verbatim.
    pub fn decode_flexible(mut raw: &[u8]) -> Result<Self, TrieError> {
        match raw.len() {
            0 => Err(TrieError::InvalidAccount { reason: "empty account value".to_string() }),
            1 => Ok(Self::default()),
            len if len < MIN_FULL_ACCOUNT_LEN => {
                let ext = <ExtAccount as alloy_rlp::Decodable>::decode(&mut raw)
                    .map_err(|e| TrieError::InvalidAccount { reason: e.to_string() })?;
                Ok(ext.into())
            }
            _ => <Self as alloy_rlp::Decodable>::decode(&mut raw)
                .map_err(|e| TrieError::InvalidAccount { reason: e.to_string() }),
        }
    }
}
