use crate::types::execution::{AccountClaim, EMPTY_TRIE_ROOT, KECCAK_EMPTY};
use alloy_primitives::{B256, U256};
use alloy_rlp::RlpEncodable;
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

/// Errors during Merkle-Patricia trie proof verification.
#[derive(Debug, Error)]
pub enum ProofError {
    #[error("empty proof: no trie nodes provided")]
    EmptyProof,

    #[error("invalid RLP encoding in proof node {index}: {reason}")]
    InvalidRlp { index: usize, reason: String },

    #[error("proof node {index} does not hash to the reference {expected} from its parent")]
    HashMismatch { index: usize, expected: String },

    #[error("invalid trie node at depth {index}: {got}-element list")]
    InvalidNode { index: usize, got: usize },

    #[error("proof path incomplete: ran out of nodes at depth {index}")]
    IncompleteProof { index: usize },

    #[error("account proof leaf does not match the claimed account fields")]
    AccountMismatch,

    #[error("storage proof leaf does not match the claimed slot value")]
    StorageMismatch,
}

/// Compute the keccak256 hash of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut output);
    output
}

/// The state-trie leaf encoding of an account. The proof verifier rebuilds
/// this from the claimed fields and compares byte-for-byte with the leaf.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable)]
pub struct TrieAccount {
    pub nonce: u64,
    pub balance: U256,
    pub storage_root: B256,
    pub code_hash: B256,
}

impl From<&AccountClaim> for TrieAccount {
    fn from(claim: &AccountClaim) -> Self {
        Self {
            nonce: claim.nonce,
            balance: claim.balance,
            storage_root: claim.storage_root,
            code_hash: claim.code_hash,
        }
    }
}

/// Verify an account inclusion proof against a trusted state root.
///
/// The trie key is keccak256(address). The claimed fields are re-encoded and
/// must equal the proof's leaf exactly; a proof of absence is only accepted
/// when the claim is the canonical empty account.
pub fn verify_account_proof(
    state_root: [u8; 32],
    address: [u8; 20],
    proof_nodes: &[Vec<u8>],
    claim: &AccountClaim,
) -> Result<(), ProofError> {
    let key = keccak256(&address);
    match walk_proof(&state_root, &key, proof_nodes)? {
        Some(leaf) => {
            let expected = alloy_rlp::encode(TrieAccount::from(claim));
            if leaf != expected {
                return Err(ProofError::AccountMismatch);
            }
            Ok(())
        }
        None => {
            if *claim != AccountClaim::empty() {
                return Err(ProofError::AccountMismatch);
            }
            Ok(())
        }
    }
}

/// Verify a storage-slot inclusion proof against an account's storage root.
///
/// The trie key is keccak256(slot). A missing leaf is valid only when the
/// claimed value is zero; a present leaf must equal RLP(claimed value).
pub fn verify_storage_proof(
    storage_root: [u8; 32],
    slot: [u8; 32],
    proof_nodes: &[Vec<u8>],
    claimed_value: U256,
) -> Result<(), ProofError> {
    // empty storage trie: only the zero value can be proven, with no nodes
    if storage_root == EMPTY_TRIE_ROOT && proof_nodes.is_empty() {
        if claimed_value != U256::ZERO {
            return Err(ProofError::StorageMismatch);
        }
        return Ok(());
    }

    let key = keccak256(&slot);
    match walk_proof(&storage_root, &key, proof_nodes)? {
        Some(leaf) => {
            if leaf != alloy_rlp::encode(claimed_value) {
                return Err(ProofError::StorageMismatch);
            }
            Ok(())
        }
        None => {
            if claimed_value != U256::ZERO {
                return Err(ProofError::StorageMismatch);
            }
            Ok(())
        }
    }
}

/// Check that `code` hashes to the proven `code_hash`, or that both
/// represent "no code".
pub fn verify_code_hash(code: &[u8], code_hash: [u8; 32]) -> bool {
    if code.is_empty() {
        return code_hash == KECCAK_EMPTY;
    }
    keccak256(code) == code_hash
}

/// Walk a Merkle-Patricia proof from `root` toward `key`.
///
/// Every node consumed from `proof_nodes` must hash to the 32-byte reference
/// its parent (or the root) committed to; sub-32-byte children are embedded
/// inline and followed without consuming a proof node.
///
/// Returns `Some(leaf value)` if the key is present, `None` for a valid
/// proof of absence.
fn walk_proof(
    root: &[u8; 32],
    key: &[u8; 32],
    proof_nodes: &[Vec<u8>],
) -> Result<Option<Vec<u8>>, ProofError> {
    if proof_nodes.is_empty() {
        return Err(ProofError::EmptyProof);
    }

    let nibbles = key_nibbles(key);
    let mut path: &[u8] = &nibbles;

    let mut expected_hash: [u8; 32] = *root;
    let mut inline_node: Option<Vec<u8>> = None;
    let mut next_index = 0usize;

    loop {
        let node_bytes: Vec<u8> = match inline_node.take() {
            Some(bytes) => bytes,
            None => {
                let node = proof_nodes
                    .get(next_index)
                    .ok_or(ProofError::IncompleteProof { index: next_index })?;
                if keccak256(node) != expected_hash {
                    return Err(ProofError::HashMismatch {
                        index: next_index,
                        expected: hex::encode(expected_hash),
                    });
                }
                next_index += 1;
                node.clone()
            }
        };

        let items = decode_rlp_list(&node_bytes).map_err(|reason| ProofError::InvalidRlp {
            index: next_index.saturating_sub(1),
            reason,
        })?;

        match items.len() {
            17 => {
                // branch node: 16 children + value
                let Some((&nibble, rest)) = path.split_first() else {
                    let value = &items[16];
                    return Ok((!value.is_empty()).then(|| value.clone()));
                };
                path = rest;

                let child = &items[nibble as usize];
                if child.is_empty() {
                    return Ok(None);
                }
                if child.len() == 32 {
                    expected_hash.copy_from_slice(child);
                } else {
                    inline_node = Some(child.clone());
                }
            }
            2 => {
                let (prefix, is_leaf) =
                    decode_compact_path(&items[0]).map_err(|reason| ProofError::InvalidRlp {
                        index: next_index.saturating_sub(1),
                        reason,
                    })?;

                if is_leaf {
                    if path == prefix.as_slice() && !items[1].is_empty() {
                        return Ok(Some(items[1].clone()));
                    }
                    // diverging leaf: valid proof of absence
                    return Ok(None);
                }

                // extension node: consume the shared prefix
                if !path.starts_with(&prefix) {
                    return Ok(None);
                }
                path = &path[prefix.len()..];

                let child = &items[1];
                if child.len() == 32 {
                    expected_hash.copy_from_slice(child);
                } else {
                    inline_node = Some(child.clone());
                }
            }
            got => {
                return Err(ProofError::InvalidNode {
                    index: next_index.saturating_sub(1),
                    got,
                })
            }
        }
    }
}

// --- RLP / path decoding helpers ---

/// Expand a 32-byte key into 64 nibbles.
fn key_nibbles(key: &[u8; 32]) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(64);
    for byte in key {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0f);
    }
    nibbles
}

/// Decode the compact (hex-prefix) path encoding of extension/leaf nodes.
/// Returns (nibbles, is_leaf).
fn decode_compact_path(encoded: &[u8]) -> Result<(Vec<u8>, bool), String> {
    let Some((&first, rest)) = encoded.split_first() else {
        return Ok((vec![], false));
    };

    let flag = first >> 4;
    if flag > 3 {
        return Err(format!("invalid hex-prefix flag {flag}"));
    }
    let is_leaf = flag >= 2;

    let mut nibbles = Vec::with_capacity(1 + rest.len() * 2);
    if flag & 1 == 1 {
        nibbles.push(first & 0x0f);
    }
    for &byte in rest {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0f);
    }
    Ok((nibbles, is_leaf))
}

/// Decode an RLP list into its items. String items are returned as their
/// payload bytes; nested lists are returned with their header intact so they
/// can be fed back through the decoder (embedded trie nodes).
fn decode_rlp_list(data: &[u8]) -> Result<Vec<Vec<u8>>, String> {
    let (payload, consumed) = rlp_list_payload(data)?;
    if consumed != data.len() {
        return Err("trailing bytes after list".to_string());
    }

    let mut items = Vec::new();
    let mut offset = 0;
    while offset < payload.len() {
        let (item, used) = rlp_item(&payload[offset..])?;
        items.push(item);
        offset += used;
    }
    Ok(items)
}

/// Split off the payload of an RLP list, returning (payload, total consumed).
fn rlp_list_payload(data: &[u8]) -> Result<(&[u8], usize), String> {
    let Some(&prefix) = data.first() else {
        return Err("empty RLP data".to_string());
    };
    if prefix < 0xc0 {
        return Err("expected a list".to_string());
    }
    if prefix <= 0xf7 {
        let len = (prefix - 0xc0) as usize;
        let total = 1 + len;
        if data.len() < total {
            return Err("short list truncated".to_string());
        }
        Ok((&data[1..total], total))
    } else {
        let len_bytes = (prefix - 0xf7) as usize;
        let len = read_be_len(data, len_bytes)?;
        let total = 1 + len_bytes + len;
        if data.len() < total {
            return Err("long list truncated".to_string());
        }
        Ok((&data[1 + len_bytes..total], total))
    }
}

/// Decode a single RLP item. Strings yield their payload; lists yield their
/// full encoding. Returns (bytes, consumed).
fn rlp_item(data: &[u8]) -> Result<(Vec<u8>, usize), String> {
    let Some(&prefix) = data.first() else {
        return Err("empty RLP item".to_string());
    };

    match prefix {
        0x00..=0x7f => Ok((vec![prefix], 1)),
        0x80..=0xb7 => {
            let len = (prefix - 0x80) as usize;
            let total = 1 + len;
            if data.len() < total {
                return Err("short string truncated".to_string());
            }
            Ok((data[1..total].to_vec(), total))
        }
        0xb8..=0xbf => {
            let len_bytes = (prefix - 0xb7) as usize;
            let len = read_be_len(data, len_bytes)?;
            let total = 1 + len_bytes + len;
            if data.len() < total {
                return Err("long string truncated".to_string());
            }
            Ok((data[1 + len_bytes..total].to_vec(), total))
        }
        _ => {
            // nested list: keep the header so the item stays decodable
            let (_, total) = rlp_list_payload(data)?;
            Ok((data[..total].to_vec(), total))
        }
    }
}

fn read_be_len(data: &[u8], len_bytes: usize) -> Result<usize, String> {
    if data.len() < 1 + len_bytes {
        return Err("length prefix truncated".to_string());
    }
    let mut len = 0usize;
    for &b in &data[1..1 + len_bytes] {
        len = (len << 8) | b as usize;
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    // minimal RLP encoders for building synthetic trie nodes
    fn rlp_str(payload: &[u8]) -> Vec<u8> {
        match payload.len() {
            1 if payload[0] < 0x80 => payload.to_vec(),
            len if len <= 55 => {
                let mut out = vec![0x80 + len as u8];
                out.extend_from_slice(payload);
                out
            }
            len => {
                let mut out = vec![0xb8, len as u8];
                out.extend_from_slice(payload);
                out
            }
        }
    }

    fn rlp_list(items: &[Vec<u8>]) -> Vec<u8> {
        let payload: Vec<u8> = items.iter().flatten().copied().collect();
        let mut out = if payload.len() <= 55 {
            vec![0xc0 + payload.len() as u8]
        } else {
            vec![0xf8, payload.len() as u8]
        };
        out.extend_from_slice(&payload);
        out
    }

    /// Leaf node holding `value` under the full 64-nibble path of `key`.
    fn leaf_node(key: &[u8; 32], value: &[u8]) -> Vec<u8> {
        let mut compact = vec![0x20u8];
        compact.extend_from_slice(key);
        rlp_list(&[rlp_str(&compact), rlp_str(value)])
    }

    fn claim(balance: u64) -> AccountClaim {
        AccountClaim {
            nonce: 3,
            balance: U256::from(balance),
            storage_root: B256::from(EMPTY_TRIE_ROOT),
            code_hash: B256::from(KECCAK_EMPTY),
        }
    }

    #[test]
    fn keccak_of_empty_is_the_empty_code_hash() {
        assert_eq!(keccak256(&[]), KECCAK_EMPTY);
    }

    #[test]
    fn single_leaf_account_proof_verifies() {
        let address = [0x42u8; 20];
        let account = claim(1_000_000);
        let account_rlp = alloy_rlp::encode(TrieAccount::from(&account));

        let key = keccak256(&address);
        let leaf = leaf_node(&key, &account_rlp);
        let root = keccak256(&leaf);

        verify_account_proof(root, address, &[leaf], &account).unwrap();
    }

    #[test]
    fn flipped_proof_byte_is_rejected() {
        let address = [0x42u8; 20];
        let account = claim(1_000_000);
        let account_rlp = alloy_rlp::encode(TrieAccount::from(&account));

        let key = keccak256(&address);
        let leaf = leaf_node(&key, &account_rlp);
        let root = keccak256(&leaf);

        let mut tampered = leaf.clone();
        *tampered.last_mut().unwrap() ^= 0x01;
        let err = verify_account_proof(root, address, &[tampered], &account).unwrap_err();
        assert!(matches!(err, ProofError::HashMismatch { .. }));
    }

    #[test]
    fn mismatched_claim_is_rejected() {
        let address = [0x42u8; 20];
        let account = claim(1_000_000);
        let account_rlp = alloy_rlp::encode(TrieAccount::from(&account));

        let key = keccak256(&address);
        let leaf = leaf_node(&key, &account_rlp);
        let root = keccak256(&leaf);

        let err = verify_account_proof(root, address, &[leaf], &claim(999_999)).unwrap_err();
        assert!(matches!(err, ProofError::AccountMismatch));
    }

    #[test]
    fn absence_only_proves_the_empty_account() {
        // a leaf for a *different* key: walking our key diverges => absence
        let other_key = keccak256(&[0x01u8; 20]);
        let leaf = leaf_node(&other_key, &alloy_rlp::encode(TrieAccount::from(&claim(5))));
        let root = keccak256(&leaf);

        let address = [0x42u8; 20];
        verify_account_proof(root, address, &[leaf.clone()], &AccountClaim::empty()).unwrap();

        let err = verify_account_proof(root, address, &[leaf], &claim(5)).unwrap_err();
        assert!(matches!(err, ProofError::AccountMismatch));
    }

    #[test]
    fn branch_descent_reaches_both_leaves() {
        // two keys differing in their first nibble, under one branch node
        let key_a = [0x00u8; 32];
        let key_b = {
            let mut k = [0x00u8; 32];
            k[0] = 0x10;
            k
        };
        let value = rlp_str(b"v");

        // leaves hold the remaining 63 nibbles (odd => flag 0x3)
        let make_leaf = |key: &[u8; 32]| {
            let mut compact = vec![0x30 | (key[0] & 0x0f)];
            compact.extend_from_slice(&key[1..]);
            rlp_list(&[rlp_str(&compact), rlp_str(&value)])
        };
        let leaf_a = make_leaf(&key_a);
        let leaf_b = make_leaf(&key_b);

        let mut children: Vec<Vec<u8>> = (0..17).map(|_| rlp_str(&[])).collect();
        children[0] = rlp_str(&keccak256(&leaf_a));
        children[1] = rlp_str(&keccak256(&leaf_b));
        let branch = rlp_list(&children);
        let root = keccak256(&branch);

        let got = walk_proof(&root, &key_a, &[branch.clone(), leaf_a]).unwrap();
        assert_eq!(got, Some(value.clone()));
        let got = walk_proof(&root, &key_b, &[branch.clone(), leaf_b]).unwrap();
        assert_eq!(got, Some(value));

        // nibble 2 has no child => absence
        let key_c = {
            let mut k = [0x00u8; 32];
            k[0] = 0x20;
            k
        };
        assert_eq!(walk_proof(&root, &key_c, &[branch]).unwrap(), None);
    }

    #[test]
    fn storage_proof_accepts_value_and_rejects_zero_claim() {
        let slot = [0x07u8; 32];
        let value = U256::from(0xdeadbeefu64);
        let value_rlp = alloy_rlp::encode(value);

        let key = keccak256(&slot);
        let leaf = leaf_node(&key, &value_rlp);
        let root = keccak256(&leaf);

        verify_storage_proof(root, slot, &[leaf.clone()], value).unwrap();
        let err = verify_storage_proof(root, slot, &[leaf], U256::ZERO).unwrap_err();
        assert!(matches!(err, ProofError::StorageMismatch));
    }

    #[test]
    fn empty_storage_trie_proves_only_zero() {
        let slot = [0u8; 32];
        verify_storage_proof(EMPTY_TRIE_ROOT, slot, &[], U256::ZERO).unwrap();
        assert!(verify_storage_proof(EMPTY_TRIE_ROOT, slot, &[], U256::from(1)).is_err());
    }

    #[test]
    fn code_hash_checks() {
        assert!(verify_code_hash(&[], KECCAK_EMPTY));
        let code = b"\x60\x00\x60\x00\xf3";
        assert!(verify_code_hash(code, keccak256(code)));
        assert!(!verify_code_hash(code, KECCAK_EMPTY));
        assert!(!verify_code_hash(&[], keccak256(code)));
    }
}
