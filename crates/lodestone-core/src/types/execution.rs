use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};

/// The keccak256 hash of empty bytes, the code hash of an account with no code.
pub const KECCAK_EMPTY: [u8; 32] = [
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03,
    0xc0, 0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85,
    0xa4, 0x70,
];

/// The root of an empty Merkle-Patricia trie.
pub const EMPTY_TRIE_ROOT: [u8; 32] = [
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8,
    0x6e, 0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63,
    0xb4, 0x21,
];

/// An account's claimed state as reported by `eth_getProof`, before
/// verification. The proof verifier re-encodes these fields and compares
/// byte-for-byte against the trie leaf.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountClaim {
    pub nonce: u64,
    pub balance: U256,
    pub storage_root: B256,
    pub code_hash: B256,
}

impl AccountClaim {
    /// The canonical empty account, the only claim a proof of absence may back.
    pub fn empty() -> Self {
        Self {
            nonce: 0,
            balance: U256::ZERO,
            storage_root: B256::from(EMPTY_TRIE_ROOT),
            code_hash: B256::from(KECCAK_EMPTY),
        }
    }

}
