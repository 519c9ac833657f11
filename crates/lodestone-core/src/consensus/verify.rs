use crate::consensus::committee::{
    compute_domain, compute_signing_root, hash_execution_payload_header, hash_sync_committee,
    verify_merkle_branch,
};
use crate::types::beacon::*;
use thiserror::Error;

/// Errors raised while verifying a full signed committee update.
/// Each variant is a specific, actionable failure, never a generic "invalid".
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("insufficient sync committee participation: {participants}/512 (need {required})")]
    InsufficientParticipation {
        participants: usize,
        required: usize,
    },

    #[error("invalid BLS signature: the aggregate does not verify against the participating committee members")]
    InvalidSignature,

    #[error("invalid BLS public key at index {index}: {reason}")]
    InvalidPublicKey { index: usize, reason: String },

    #[error("invalid Merkle branch for the execution payload")]
    InvalidExecutionBranch,

    #[error("invalid Merkle branch for the next sync committee")]
    InvalidNextSyncCommitteeBranch,

    #[error("invalid Merkle branch for the finalized header")]
    InvalidFinalityBranch,

    #[error("malformed sync committee: {0}")]
    MalformedCommittee(&'static str),

    #[error("BLS aggregation error: {0}")]
    BlsError(String),
}

/// Chain-level signing parameters: everything needed to compute the domain
/// a sync committee signs under.
#[derive(Clone, Copy, Debug)]
pub struct SigningContext {
    pub genesis_validators_root: [u8; 32],
    pub fork_version: [u8; 4],
}

/// Outcome of optimistic-update verification. Verification never propagates a
/// hard failure to the caller: anything unexpected becomes a tagged reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub correct: bool,
    pub reason: Option<String>,
}

impl VerifyOutcome {
    pub fn valid() -> Self {
        Self {
            correct: true,
            reason: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            correct: false,
            reason: Some(reason.into()),
        }
    }
}

/// Verify an optimistic update against the current period's committee.
///
/// Checks, in order: the aggregate BLS signature over the attested header's
/// signing root, the supermajority participation threshold, and the Merkle
/// branch binding the execution payload to the attested body root.
pub fn verify_optimistic_update(
    committee: &SyncCommittee,
    update: &OptimisticUpdate,
    ctx: &SigningContext,
) -> VerifyOutcome {
    if let Err(e) = committee.validate() {
        return VerifyOutcome::invalid(e);
    }

    match verify_signed_header(
        committee,
        &update.attested_header.beacon,
        &update.sync_aggregate,
        ctx,
    ) {
        Ok(()) => {}
        Err(VerificationError::InvalidSignature) => {
            return VerifyOutcome::invalid("invalid signatures")
        }
        Err(e) => return VerifyOutcome::invalid(e.to_string()),
    }

    if update.sync_aggregate.num_participants() < SYNC_SUPER_MAJORITY {
        return VerifyOutcome::invalid("insufficient signatures");
    }

    let payload_root = hash_execution_payload_header(&update.attested_header.execution);
    if !verify_merkle_branch(
        &payload_root,
        &update.attested_header.execution_branch,
        EXECUTION_PAYLOAD_DEPTH,
        EXECUTION_PAYLOAD_GINDEX,
        &update.attested_header.beacon.body_root,
    ) {
        return VerifyOutcome::invalid("invalid header");
    }

    VerifyOutcome::valid()
}

/// Verify a full signed update against the committee of the period *before*
/// the one the update rotates into, returning the verified next committee.
///
/// Used by the signature-verified committee-advance strategy: the caller
/// replaces its running committee with the returned one.
pub fn verify_committee_update(
    update: &LightClientUpdate,
    committee: &SyncCommittee,
    ctx: &SigningContext,
) -> Result<SyncCommittee, VerificationError> {
    committee
        .validate()
        .map_err(VerificationError::MalformedCommittee)?;
    update
        .next_sync_committee
        .validate()
        .map_err(VerificationError::MalformedCommittee)?;

    let participants = update.sync_aggregate.num_participants();
    if participants < SYNC_SUPER_MAJORITY {
        return Err(VerificationError::InsufficientParticipation {
            participants,
            required: SYNC_SUPER_MAJORITY,
        });
    }

    verify_signed_header(
        committee,
        &update.attested_header.beacon,
        &update.sync_aggregate,
        ctx,
    )?;

    let committee_root = hash_sync_committee(&update.next_sync_committee);
    if !verify_merkle_branch(
        &committee_root,
        &update.next_sync_committee_branch,
        NEXT_SYNC_COMMITTEE_DEPTH,
        NEXT_SYNC_COMMITTEE_GINDEX,
        &update.attested_header.beacon.state_root,
    ) {
        return Err(VerificationError::InvalidNextSyncCommitteeBranch);
    }

    if let Some(finalized) = &update.finalized_header {
        let finalized_root = crate::consensus::committee::hash_beacon_block_header(&finalized.beacon);
        if !verify_merkle_branch(
            &finalized_root,
            &update.finality_branch,
            FINALIZED_ROOT_DEPTH,
            FINALIZED_ROOT_GINDEX,
            &update.attested_header.beacon.state_root,
        ) {
            return Err(VerificationError::InvalidFinalityBranch);
        }
    }

    Ok(update.next_sync_committee.clone())
}

/// Verify the sync aggregate's BLS signature over a beacon header's signing
/// root, using only the committee members marked in the participation bits.
fn verify_signed_header(
    committee: &SyncCommittee,
    attested: &BeaconBlockHeader,
    aggregate: &SyncAggregate,
    ctx: &SigningContext,
) -> Result<(), VerificationError> {
    let domain = compute_domain(
        &DOMAIN_SYNC_COMMITTEE,
        &ctx.fork_version,
        &ctx.genesis_validators_root,
    );
    let signing_root = compute_signing_root(attested, &domain);

    let participants: Vec<&BlsPublicKey> = aggregate
        .participant_indices()
        .into_iter()
        .map(|i| &committee.pubkeys[i])
        .collect();

    verify_aggregate_signature(
        &participants,
        &signing_root,
        &aggregate.sync_committee_signature,
    )
}

/// Verify an aggregate BLS12-381 signature: pairing-based public key
/// aggregation over the participant set, then one signature check.
fn verify_aggregate_signature(
    pubkeys: &[&BlsPublicKey],
    message: &[u8; 32],
    signature: &BlsSignature,
) -> Result<(), VerificationError> {
    use blst::min_pk::{AggregatePublicKey, PublicKey, Signature};
    use blst::BLST_ERROR;

    if pubkeys.is_empty() {
        return Err(VerificationError::InsufficientParticipation {
            participants: 0,
            required: SYNC_SUPER_MAJORITY,
        });
    }

    let sig = Signature::from_bytes(&signature.0)
        .map_err(|e| VerificationError::BlsError(format!("bad signature encoding: {:?}", e)))?;

    let pks: Vec<PublicKey> = pubkeys
        .iter()
        .enumerate()
        .map(|(i, pk)| {
            PublicKey::from_bytes(&pk.0).map_err(|e| VerificationError::InvalidPublicKey {
                index: i,
                reason: format!("{:?}", e),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let pk_refs: Vec<&PublicKey> = pks.iter().collect();
    let agg = AggregatePublicKey::aggregate(&pk_refs, false)
        .map_err(|e| VerificationError::BlsError(format!("aggregation failed: {:?}", e)))?;

    // DST (domain separation tag) for Ethereum BLS signatures
    let dst = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

    let result = sig.verify(false, message, dst, &[], &agg.to_public_key(), false);
    if result != BLST_ERROR::BLST_SUCCESS {
        return Err(VerificationError::InvalidSignature);
    }

    Ok(())
}
