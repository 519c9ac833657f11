use crate::types::beacon::*;
use sha2::{Digest, Sha256};

/// Sync committee period containing `slot`.
pub fn period_at_slot(slot: u64) -> u64 {
    slot / SLOTS_PER_SYNC_COMMITTEE_PERIOD
}

/// Wall-clock-implied current slot. Pure function of time, no side effects.
pub fn slot_at_time(unix_time: u64, genesis_time: u64) -> u64 {
    unix_time.saturating_sub(genesis_time) / SECONDS_PER_SLOT
}

/// Wall-clock-implied current sync committee period.
pub fn period_at_time(unix_time: u64, genesis_time: u64) -> u64 {
    period_at_slot(slot_at_time(unix_time, genesis_time))
}

/// Content digest of a committee: SHA-256 over the concatenated public key
/// bytes. Used to confirm an untrusted committee fetch matches a
/// previously-attested commitment without re-verifying signatures.
pub fn committee_hash(pubkeys: &[BlsPublicKey]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for pk in pubkeys {
        hasher.update(pk.0);
    }
    hasher.finalize().into()
}

/// Compute the signing root for a beacon block header:
/// hash(hash_tree_root(header) || domain).
pub fn compute_signing_root(header: &BeaconBlockHeader, domain: &[u8; 32]) -> [u8; 32] {
    sha256_pair(&hash_beacon_block_header(header), domain)
}

/// Compute the signing domain: domain_type + fork_data_root[:28].
pub fn compute_domain(
    domain_type: &[u8; 4],
    fork_version: &[u8; 4],
    genesis_validators_root: &[u8; 32],
) -> [u8; 32] {
    let fork_data_root = {
        let mut data = [0u8; 64];
        data[..4].copy_from_slice(fork_version);
        data[32..].copy_from_slice(genesis_validators_root);
        sha256_hash(&data)
    };
    let mut domain = [0u8; 32];
    domain[..4].copy_from_slice(domain_type);
    domain[4..].copy_from_slice(&fork_data_root[..28]);
    domain
}

/// SSZ hash_tree_root of a beacon block header (5-field container).
pub fn hash_beacon_block_header(header: &BeaconBlockHeader) -> [u8; 32] {
    merkleize(&[
        uint64_to_leaf(header.slot),
        uint64_to_leaf(header.proposer_index),
        header.parent_root,
        header.state_root,
        header.body_root,
    ])
}

/// SSZ hash_tree_root of an execution payload header (15-field container).
pub fn hash_execution_payload_header(header: &ExecutionPayloadHeader) -> [u8; 32] {
    merkleize(&[
        header.parent_hash,
        bytes_to_leaf(&header.fee_recipient),
        header.state_root,
        header.receipts_root,
        hash_bytes_vector(&header.logs_bloom),
        header.prev_randao,
        uint64_to_leaf(header.block_number),
        uint64_to_leaf(header.gas_limit),
        uint64_to_leaf(header.gas_used),
        uint64_to_leaf(header.timestamp),
        hash_byte_list(&header.extra_data),
        uint64_to_leaf(header.base_fee_per_gas),
        header.block_hash,
        header.transactions_root,
        header.withdrawals_root,
    ])
}

/// SSZ hash_tree_root of a sync committee container:
/// hash(root(pubkeys vector), root(aggregate pubkey)).
pub fn hash_sync_committee(committee: &SyncCommittee) -> [u8; 32] {
    let key_leaves: Vec<[u8; 32]> = committee
        .pubkeys
        .iter()
        .map(|pk| hash_pubkey(pk))
        .collect();
    sha256_pair(&merkleize(&key_leaves), &hash_pubkey(&committee.aggregate_pubkey))
}

/// Verify a Merkle branch (SSZ proof) against an expected root.
/// `index` may be a generalized index; only its low `depth` bits steer.
pub fn verify_merkle_branch(
    leaf: &[u8; 32],
    branch: &[[u8; 32]],
    depth: usize,
    index: u64,
    root: &[u8; 32],
) -> bool {
    if branch.len() != depth {
        return false;
    }

    let mut current = *leaf;
    for (i, node) in branch.iter().enumerate() {
        if (index >> i) & 1 == 1 {
            current = sha256_pair(node, &current);
        } else {
            current = sha256_pair(&current, node);
        }
    }

    current == *root
}

// --- Merkleization helpers ---

/// Merkleize a set of 32-byte chunks, zero-padding to the next power of two.
fn merkleize(leaves: &[[u8; 32]]) -> [u8; 32] {
    let zero = [0u8; 32];
    if leaves.is_empty() {
        return zero;
    }
    let mut width = leaves.len().next_power_of_two();
    let mut layer: Vec<[u8; 32]> = leaves.to_vec();
    layer.resize(width, zero);
    while width > 1 {
        width /= 2;
        for i in 0..width {
            layer[i] = sha256_pair(&layer[2 * i], &layer[2 * i + 1]);
        }
        layer.truncate(width);
    }
    layer[0]
}

/// Root of a fixed-size byte vector (e.g. the 256-byte logs bloom).
fn hash_bytes_vector(bytes: &[u8]) -> [u8; 32] {
    let leaves: Vec<[u8; 32]> = bytes.chunks(32).map(bytes_to_leaf).collect();
    merkleize(&leaves)
}

/// Root of a short byte list (up to one chunk), with its length mixed in.
fn hash_byte_list(bytes: &[u8]) -> [u8; 32] {
    let chunk = bytes_to_leaf(bytes);
    sha256_pair(&chunk, &uint64_to_leaf(bytes.len() as u64))
}

/// Leaf of a 48-byte compressed public key: two chunks, second zero-padded.
fn hash_pubkey(pk: &BlsPublicKey) -> [u8; 32] {
    let mut data = [0u8; 64];
    data[..48].copy_from_slice(&pk.0);
    sha256_hash(&data)
}

fn sha256_hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn sha256_pair(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(a);
    data[32..].copy_from_slice(b);
    sha256_hash(&data)
}

/// Encode a u64 as a 32-byte SSZ leaf (little-endian, zero-padded).
fn uint64_to_leaf(value: u64) -> [u8; 32] {
    let mut leaf = [0u8; 32];
    leaf[..8].copy_from_slice(&value.to_le_bytes());
    leaf
}

/// Left-align up to 32 bytes in a zero-padded chunk.
fn bytes_to_leaf(bytes: &[u8]) -> [u8; 32] {
    let mut leaf = [0u8; 32];
    leaf[..bytes.len()].copy_from_slice(bytes);
    leaf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_header(slot: u64) -> BeaconBlockHeader {
        BeaconBlockHeader {
            slot,
            proposer_index: 7,
            parent_root: [0x11; 32],
            state_root: [0x22; 32],
            body_root: [0x33; 32],
        }
    }

    #[test]
    fn period_math() {
        assert_eq!(period_at_slot(0), 0);
        assert_eq!(period_at_slot(8191), 0);
        assert_eq!(period_at_slot(8192), 1);
        // genesis + 2 periods worth of slots
        let genesis_time = 1_606_824_023;
        let now = genesis_time + 2 * SLOTS_PER_SYNC_COMMITTEE_PERIOD * SECONDS_PER_SLOT;
        assert_eq!(period_at_time(now, genesis_time), 2);
        // clock before genesis clamps to slot 0
        assert_eq!(slot_at_time(genesis_time - 100, genesis_time), 0);
    }

    #[test]
    fn committee_hash_is_order_sensitive() {
        let a = BlsPublicKey([0xaa; 48]);
        let b = BlsPublicKey([0xbb; 48]);
        let h1 = committee_hash(&[a.clone(), b.clone()]);
        let h2 = committee_hash(&[b, a]);
        assert_ne!(h1, h2);
    }

    #[test]
    fn header_root_is_deterministic_and_slot_sensitive() {
        let root1 = hash_beacon_block_header(&test_header(100));
        let root2 = hash_beacon_block_header(&test_header(100));
        let root3 = hash_beacon_block_header(&test_header(101));
        assert_eq!(root1, root2);
        assert_ne!(root1, root3);
    }

    #[test]
    fn domain_starts_with_domain_type() {
        let domain = compute_domain(&DOMAIN_SYNC_COMMITTEE, &[4, 0, 0, 0], &[0xaa; 32]);
        assert_eq!(&domain[..4], &DOMAIN_SYNC_COMMITTEE);
    }

    #[test]
    fn merkle_branch_roundtrip() {
        let leaf = sha256_hash(b"leaf");
        let sibling = sha256_hash(b"sibling");
        let root = sha256_pair(&leaf, &sibling);

        assert!(verify_merkle_branch(&leaf, &[sibling], 1, 0, &root));
        assert!(!verify_merkle_branch(&leaf, &[sibling], 1, 1, &root));
        // wrong depth
        assert!(!verify_merkle_branch(&leaf, &[sibling], 2, 0, &root));
    }

    #[test]
    fn branch_to_payload_root_verifies_under_body_root() {
        // Build a depth-4 tree by hand: place the payload root at position 9
        // (generalized index 25) and derive the body root from the branch.
        let payload = ExecutionPayloadHeader {
            parent_hash: [1; 32],
            fee_recipient: [2; 20],
            state_root: [3; 32],
            receipts_root: [4; 32],
            logs_bloom: vec![0; 256],
            prev_randao: [5; 32],
            block_number: 42,
            gas_limit: 30_000_000,
            gas_used: 21_000,
            timestamp: 1_700_000_000,
            extra_data: b"geth".to_vec(),
            base_fee_per_gas: 7,
            block_hash: [6; 32],
            transactions_root: [7; 32],
            withdrawals_root: [8; 32],
        };
        let leaf = hash_execution_payload_header(&payload);

        let branch = [[0x10; 32], [0x20; 32], [0x30; 32], [0x40; 32]];
        let mut current = leaf;
        for (i, node) in branch.iter().enumerate() {
            if (EXECUTION_PAYLOAD_GINDEX >> i) & 1 == 1 {
                current = sha256_pair(node, &current);
            } else {
                current = sha256_pair(&current, node);
            }
        }
        let body_root = current;

        assert!(verify_merkle_branch(
            &leaf,
            &branch,
            EXECUTION_PAYLOAD_DEPTH,
            EXECUTION_PAYLOAD_GINDEX,
            &body_root
        ));

        // any corrupted sibling must fail
        let mut bad = branch;
        bad[2][0] ^= 1;
        assert!(!verify_merkle_branch(
            &leaf,
            &bad,
            EXECUTION_PAYLOAD_DEPTH,
            EXECUTION_PAYLOAD_GINDEX,
            &body_root
        ));
    }
}
