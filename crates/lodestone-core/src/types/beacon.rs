use serde::{Deserialize, Serialize};

/// Number of validators in the Ethereum beacon chain sync committee.
pub const SYNC_COMMITTEE_SIZE: usize = 512;

/// Number of bytes in a BLS12-381 public key (compressed).
pub const BLS_PUBKEY_LEN: usize = 48;

/// Number of bytes in a BLS12-381 signature (compressed).
pub const BLS_SIGNATURE_LEN: usize = 96;

/// Slots per sync committee period (256 epochs * 32 slots/epoch = 8192).
pub const SLOTS_PER_SYNC_COMMITTEE_PERIOD: u64 = 8192;

/// Seconds per beacon chain slot.
pub const SECONDS_PER_SLOT: u64 = 12;

/// Domain type for sync committee signatures.
pub const DOMAIN_SYNC_COMMITTEE: [u8; 4] = [0x07, 0x00, 0x00, 0x00];

/// Minimum number of sync committee participants required (2/3 of 512).
pub const SYNC_SUPER_MAJORITY: usize = 342;

/// Depth of the execution payload branch below the beacon block body root.
pub const EXECUTION_PAYLOAD_DEPTH: usize = 4;

/// Generalized index of the execution payload in the beacon block body.
pub const EXECUTION_PAYLOAD_GINDEX: u64 = 25;

/// Depth of the next sync committee branch below the beacon state root.
pub const NEXT_SYNC_COMMITTEE_DEPTH: usize = 5;

/// Generalized index of the next sync committee in the beacon state.
pub const NEXT_SYNC_COMMITTEE_GINDEX: u64 = 55;

/// Depth of the finalized checkpoint branch below the beacon state root.
pub const FINALIZED_ROOT_DEPTH: usize = 6;

/// Generalized index of the finalized checkpoint in the beacon state.
pub const FINALIZED_ROOT_GINDEX: u64 = 105;

/// A BLS12-381 public key (48 bytes, compressed G1 point).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlsPublicKey(pub [u8; BLS_PUBKEY_LEN]);

impl Serialize for BlsPublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for BlsPublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

impl BlsPublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() != BLS_PUBKEY_LEN {
            return Err("invalid BLS public key length");
        }
        let mut arr = [0u8; BLS_PUBKEY_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }
}

/// A BLS12-381 signature (96 bytes, compressed G2 point).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlsSignature(pub [u8; BLS_SIGNATURE_LEN]);

impl BlsSignature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() != BLS_SIGNATURE_LEN {
            return Err("invalid BLS signature length");
        }
        let mut arr = [0u8; BLS_SIGNATURE_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }
}

/// A beacon chain block header: the minimal header, enough to anchor
/// signatures and Merkle branches without storing full blocks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconBlockHeader {
    pub slot: u64,
    pub proposer_index: u64,
    pub parent_root: [u8; 32],
    pub state_root: [u8; 32],
    pub body_root: [u8; 32],
}

/// The sync committee: 512 validators that sign off on the chain head.
/// Valid for exactly one period; rotates every 256 epochs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCommittee {
    /// Ordered BLS public keys of the 512 committee members.
    pub pubkeys: Vec<BlsPublicKey>,
    /// Aggregate of all 512 member keys, carried in the SSZ container.
    pub aggregate_pubkey: BlsPublicKey,
}

impl SyncCommittee {
    /// Build a committee from its member keys, deriving the aggregate key.
    /// Fails if the key count is wrong or any key is not a valid G1 point.
    pub fn from_pubkeys(pubkeys: Vec<BlsPublicKey>) -> Result<Self, &'static str> {
        use blst::min_pk::{AggregatePublicKey, PublicKey};

        if pubkeys.len() != SYNC_COMMITTEE_SIZE {
            return Err("sync committee must have exactly 512 members");
        }
        let keys: Vec<PublicKey> = pubkeys
            .iter()
            .map(|pk| PublicKey::from_bytes(&pk.0).map_err(|_| "invalid BLS public key"))
            .collect::<Result<_, _>>()?;
        let refs: Vec<&PublicKey> = keys.iter().collect();
        let agg = AggregatePublicKey::aggregate(&refs, false)
            .map_err(|_| "failed to aggregate public keys")?;
        let aggregate_pubkey = BlsPublicKey(agg.to_public_key().compress());
        Ok(Self {
            pubkeys,
            aggregate_pubkey,
        })
    }

    /// Validate the committee has the correct number of members.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.pubkeys.len() != SYNC_COMMITTEE_SIZE {
            return Err("sync committee must have exactly 512 members");
        }
        Ok(())
    }
}

/// The aggregate BLS signature from the sync committee, with a bitfield
/// marking which of the 512 members signed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncAggregate {
    /// One bit per committee member, little-endian within each byte.
    pub sync_committee_bits: [u8; SYNC_COMMITTEE_SIZE / 8],
    pub sync_committee_signature: BlsSignature,
}

impl SyncAggregate {
    /// Count how many committee members participated (set bits).
    pub fn num_participants(&self) -> usize {
        self.sync_committee_bits
            .iter()
            .map(|byte| byte.count_ones() as usize)
            .sum()
    }

    /// Check if a specific committee member (by index) participated.
    pub fn has_participant(&self, index: usize) -> bool {
        if index >= SYNC_COMMITTEE_SIZE {
            return false;
        }
        (self.sync_committee_bits[index / 8] >> (index % 8)) & 1 == 1
    }

    /// Indices of all participating committee members.
    pub fn participant_indices(&self) -> Vec<usize> {
        (0..SYNC_COMMITTEE_SIZE)
            .filter(|&i| self.has_participant(i))
            .collect()
    }
}

/// Execution payload header, the link between beacon and execution layers.
/// Carries the execution block hash/number we hand to the provider and the
/// state root we verify account proofs against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPayloadHeader {
    pub parent_hash: [u8; 32],
    pub fee_recipient: [u8; 20],
    pub state_root: [u8; 32],
    pub receipts_root: [u8; 32],
    #[serde(with = "serde_bytes_hex")]
    pub logs_bloom: Vec<u8>,
    pub prev_randao: [u8; 32],
    pub block_number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    #[serde(with = "serde_bytes_hex")]
    pub extra_data: Vec<u8>,
    pub base_fee_per_gas: u64,
    pub block_hash: [u8; 32],
    pub transactions_root: [u8; 32],
    pub withdrawals_root: [u8; 32],
}

mod serde_bytes_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}

/// A light client header: a beacon header plus the execution payload header
/// it commits to, with the Merkle branch linking the payload to the body root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LightClientHeader {
    pub beacon: BeaconBlockHeader,
    pub execution: ExecutionPayloadHeader,
    /// Branch proving `execution` under `beacon.body_root`.
    pub execution_branch: Vec<[u8; 32]>,
}

/// A full signed update record: attested header, next-committee claim with
/// inclusion branch, optional finality proof, and the aggregate-signature
/// envelope. Signed by the *previous* period's committee.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LightClientUpdate {
    pub attested_header: LightClientHeader,
    pub next_sync_committee: SyncCommittee,
    /// Branch proving `next_sync_committee` under the attested state root.
    pub next_sync_committee_branch: Vec<[u8; 32]>,
    pub finalized_header: Option<LightClientHeader>,
    pub finality_branch: Vec<[u8; 32]>,
    pub sync_aggregate: SyncAggregate,
    pub signature_slot: u64,
}

/// A lighter signed record used for low-latency head tracking between full
/// updates. Carries no committee-rotation data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptimisticUpdate {
    pub attested_header: LightClientHeader,
    pub sync_aggregate: SyncAggregate,
    pub signature_slot: u64,
}

impl OptimisticUpdate {
    /// The execution-layer trust anchor embedded in this update.
    pub fn execution_info(&self) -> ExecutionInfo {
        ExecutionInfo {
            block_hash: self.attested_header.execution.block_hash,
            block_number: self.attested_header.execution.block_number,
        }
    }
}

/// The trust anchor handed to the execution provider: a verified
/// `(block hash, block number)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub block_hash: [u8; 32],
    pub block_number: u64,
}
