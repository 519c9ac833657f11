//! Compact binary wire format for light client records.
//!
//! Fixed-size fields are written in order (integers little-endian);
//! variable-size fields carry a u32 length prefix. Decoding is strict:
//! truncated input and trailing bytes are both errors.

use crate::types::beacon::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected end of input: needed {needed} more bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("{count} trailing bytes after decoded value")]
    TrailingBytes { count: usize },

    #[error("invalid value: {0}")]
    InvalidValue(&'static str),
}

/// Byte length of an encoded sync committee (512 member keys + aggregate).
const COMMITTEE_LEN: usize = (SYNC_COMMITTEE_SIZE + 1) * BLS_PUBKEY_LEN;

/// Byte length of an encoded sync aggregate (bitfield + signature).
const AGGREGATE_LEN: usize = SYNC_COMMITTEE_SIZE / 8 + BLS_SIGNATURE_LEN;

// --- encoding ---

pub fn encode_beacon_header(header: &BeaconBlockHeader, out: &mut Vec<u8>) {
    out.extend_from_slice(&header.slot.to_le_bytes());
    out.extend_from_slice(&header.proposer_index.to_le_bytes());
    out.extend_from_slice(&header.parent_root);
    out.extend_from_slice(&header.state_root);
    out.extend_from_slice(&header.body_root);
}

pub fn encode_execution_header(header: &ExecutionPayloadHeader, out: &mut Vec<u8>) {
    out.extend_from_slice(&header.parent_hash);
    out.extend_from_slice(&header.fee_recipient);
    out.extend_from_slice(&header.state_root);
    out.extend_from_slice(&header.receipts_root);
    encode_bytes(&header.logs_bloom, out);
    out.extend_from_slice(&header.prev_randao);
    out.extend_from_slice(&header.block_number.to_le_bytes());
    out.extend_from_slice(&header.gas_limit.to_le_bytes());
    out.extend_from_slice(&header.gas_used.to_le_bytes());
    out.extend_from_slice(&header.timestamp.to_le_bytes());
    encode_bytes(&header.extra_data, out);
    out.extend_from_slice(&header.base_fee_per_gas.to_le_bytes());
    out.extend_from_slice(&header.block_hash);
    out.extend_from_slice(&header.transactions_root);
    out.extend_from_slice(&header.withdrawals_root);
}

pub fn encode_light_client_header(header: &LightClientHeader, out: &mut Vec<u8>) {
    encode_beacon_header(&header.beacon, out);
    encode_hashes(&header.execution_branch, out);
    encode_execution_header(&header.execution, out);
}

pub fn encode_committee(committee: &SyncCommittee, out: &mut Vec<u8>) {
    for pk in &committee.pubkeys {
        out.extend_from_slice(&pk.0);
    }
    out.extend_from_slice(&committee.aggregate_pubkey.0);
}

pub fn encode_aggregate(aggregate: &SyncAggregate, out: &mut Vec<u8>) {
    out.extend_from_slice(&aggregate.sync_committee_bits);
    out.extend_from_slice(&aggregate.sync_committee_signature.0);
}

pub fn encode_optimistic_update(update: &OptimisticUpdate) -> Vec<u8> {
    let mut out = Vec::new();
    encode_aggregate(&update.sync_aggregate, &mut out);
    out.extend_from_slice(&update.signature_slot.to_le_bytes());
    encode_light_client_header(&update.attested_header, &mut out);
    out
}

pub fn encode_update(update: &LightClientUpdate) -> Vec<u8> {
    let mut out = Vec::new();
    encode_committee(&update.next_sync_committee, &mut out);
    encode_hashes(&update.next_sync_committee_branch, &mut out);
    encode_hashes(&update.finality_branch, &mut out);
    encode_aggregate(&update.sync_aggregate, &mut out);
    out.extend_from_slice(&update.signature_slot.to_le_bytes());
    encode_light_client_header(&update.attested_header, &mut out);
    match &update.finalized_header {
        Some(header) => {
            out.push(1);
            encode_light_client_header(header, &mut out);
        }
        None => out.push(0),
    }
    out
}

/// Encode a batch of update records, count-prefixed.
pub fn encode_updates(updates: &[LightClientUpdate]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(updates.len() as u32).to_le_bytes());
    for update in updates {
        let encoded = encode_update(update);
        encode_bytes(&encoded, &mut out);
    }
    out
}

/// Encode a list of 32-byte digests, count-prefixed.
pub fn encode_hash_list(hashes: &[[u8; 32]]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_hashes(hashes, &mut out);
    out
}

fn encode_hashes(hashes: &[[u8; 32]], out: &mut Vec<u8>) {
    out.extend_from_slice(&(hashes.len() as u32).to_le_bytes());
    for h in hashes {
        out.extend_from_slice(h);
    }
}

fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

// --- decoding ---

pub fn decode_optimistic_update(data: &[u8]) -> Result<OptimisticUpdate, CodecError> {
    let mut r = Reader::new(data);
    let sync_aggregate = read_aggregate(&mut r)?;
    let signature_slot = r.u64()?;
    let attested_header = read_light_client_header(&mut r)?;
    r.finish()?;
    Ok(OptimisticUpdate {
        attested_header,
        sync_aggregate,
        signature_slot,
    })
}

pub fn decode_update(data: &[u8]) -> Result<LightClientUpdate, CodecError> {
    let mut r = Reader::new(data);
    let update = read_update(&mut r)?;
    r.finish()?;
    Ok(update)
}

pub fn decode_updates(data: &[u8]) -> Result<Vec<LightClientUpdate>, CodecError> {
    let mut r = Reader::new(data);
    let count = r.u32()? as usize;
    let mut updates = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let len = r.u32()? as usize;
        let bytes = r.take(len)?;
        updates.push(decode_update(bytes)?);
    }
    r.finish()?;
    Ok(updates)
}

pub fn decode_committee(data: &[u8]) -> Result<SyncCommittee, CodecError> {
    let mut r = Reader::new(data);
    let committee = read_committee(&mut r)?;
    r.finish()?;
    Ok(committee)
}

pub fn decode_hash_list(data: &[u8]) -> Result<Vec<[u8; 32]>, CodecError> {
    let mut r = Reader::new(data);
    let hashes = read_hashes(&mut r)?;
    r.finish()?;
    Ok(hashes)
}

fn read_update(r: &mut Reader) -> Result<LightClientUpdate, CodecError> {
    let next_sync_committee = read_committee(r)?;
    let next_sync_committee_branch = read_hashes(r)?;
    let finality_branch = read_hashes(r)?;
    let sync_aggregate = read_aggregate(r)?;
    let signature_slot = r.u64()?;
    let attested_header = read_light_client_header(r)?;
    let finalized_header = match r.u8()? {
        0 => None,
        1 => Some(read_light_client_header(r)?),
        _ => return Err(CodecError::InvalidValue("finalized header flag")),
    };
    Ok(LightClientUpdate {
        attested_header,
        next_sync_committee,
        next_sync_committee_branch,
        finalized_header,
        finality_branch,
        sync_aggregate,
        signature_slot,
    })
}

fn read_committee(r: &mut Reader) -> Result<SyncCommittee, CodecError> {
    let bytes = r.take(COMMITTEE_LEN)?;
    let mut pubkeys = Vec::with_capacity(SYNC_COMMITTEE_SIZE);
    for chunk in bytes[..SYNC_COMMITTEE_SIZE * BLS_PUBKEY_LEN].chunks_exact(BLS_PUBKEY_LEN) {
        let mut pk = [0u8; BLS_PUBKEY_LEN];
        pk.copy_from_slice(chunk);
        pubkeys.push(BlsPublicKey(pk));
    }
    let mut agg = [0u8; BLS_PUBKEY_LEN];
    agg.copy_from_slice(&bytes[SYNC_COMMITTEE_SIZE * BLS_PUBKEY_LEN..]);
    Ok(SyncCommittee {
        pubkeys,
        aggregate_pubkey: BlsPublicKey(agg),
    })
}

fn read_aggregate(r: &mut Reader) -> Result<SyncAggregate, CodecError> {
    let bytes = r.take(AGGREGATE_LEN)?;
    let mut bits = [0u8; SYNC_COMMITTEE_SIZE / 8];
    bits.copy_from_slice(&bytes[..SYNC_COMMITTEE_SIZE / 8]);
    let mut sig = [0u8; BLS_SIGNATURE_LEN];
    sig.copy_from_slice(&bytes[SYNC_COMMITTEE_SIZE / 8..]);
    Ok(SyncAggregate {
        sync_committee_bits: bits,
        sync_committee_signature: BlsSignature(sig),
    })
}

fn read_light_client_header(r: &mut Reader) -> Result<LightClientHeader, CodecError> {
    let beacon = read_beacon_header(r)?;
    let execution_branch = read_hashes(r)?;
    if execution_branch.len() != EXECUTION_PAYLOAD_DEPTH {
        return Err(CodecError::InvalidValue("execution branch depth"));
    }
    let execution = read_execution_header(r)?;
    Ok(LightClientHeader {
        beacon,
        execution,
        execution_branch,
    })
}

fn read_beacon_header(r: &mut Reader) -> Result<BeaconBlockHeader, CodecError> {
    Ok(BeaconBlockHeader {
        slot: r.u64()?,
        proposer_index: r.u64()?,
        parent_root: r.array32()?,
        state_root: r.array32()?,
        body_root: r.array32()?,
    })
}

fn read_execution_header(r: &mut Reader) -> Result<ExecutionPayloadHeader, CodecError> {
    let parent_hash = r.array32()?;
    let fee_recipient = {
        let bytes = r.take(20)?;
        let mut a = [0u8; 20];
        a.copy_from_slice(bytes);
        a
    };
    let state_root = r.array32()?;
    let receipts_root = r.array32()?;
    let logs_bloom = read_bytes(r)?;
    if logs_bloom.len() != 256 {
        return Err(CodecError::InvalidValue("logs bloom length"));
    }
    let prev_randao = r.array32()?;
    let block_number = r.u64()?;
    let gas_limit = r.u64()?;
    let gas_used = r.u64()?;
    let timestamp = r.u64()?;
    let extra_data = read_bytes(r)?;
    if extra_data.len() > 32 {
        return Err(CodecError::InvalidValue("extra data length"));
    }
    let base_fee_per_gas = r.u64()?;
    Ok(ExecutionPayloadHeader {
        parent_hash,
        fee_recipient,
        state_root,
        receipts_root,
        logs_bloom,
        prev_randao,
        block_number,
        gas_limit,
        gas_used,
        timestamp,
        extra_data,
        base_fee_per_gas,
        block_hash: r.array32()?,
        transactions_root: r.array32()?,
        withdrawals_root: r.array32()?,
    })
}

fn read_hashes(r: &mut Reader) -> Result<Vec<[u8; 32]>, CodecError> {
    let count = r.u32()? as usize;
    if count > 4096 {
        return Err(CodecError::InvalidValue("hash list too long"));
    }
    let mut hashes = Vec::with_capacity(count);
    for _ in 0..count {
        hashes.push(r.array32()?);
    }
    Ok(hashes)
}

fn read_bytes(r: &mut Reader) -> Result<Vec<u8>, CodecError> {
    let len = r.u32()? as usize;
    Ok(r.take(len)?.to_vec())
}

/// Strict cursor over the input buffer.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let remaining = self.data.len() - self.pos;
        if remaining < n {
            return Err(CodecError::UnexpectedEof {
                needed: n - remaining,
                remaining,
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn array32(&mut self) -> Result<[u8; 32], CodecError> {
        let bytes = self.take(32)?;
        let mut a = [0u8; 32];
        a.copy_from_slice(bytes);
        Ok(a)
    }

    fn finish(self) -> Result<(), CodecError> {
        let count = self.data.len() - self.pos;
        if count != 0 {
            return Err(CodecError::TrailingBytes { count });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_execution_header() -> ExecutionPayloadHeader {
        ExecutionPayloadHeader {
            parent_hash: [1; 32],
            fee_recipient: [2; 20],
            state_root: [3; 32],
            receipts_root: [4; 32],
            logs_bloom: vec![0; 256],
            prev_randao: [5; 32],
            block_number: 17_000_000,
            gas_limit: 30_000_000,
            gas_used: 12_345_678,
            timestamp: 1_700_000_000,
            extra_data: b"rsync-builder".to_vec(),
            base_fee_per_gas: 23_456_789,
            block_hash: [6; 32],
            transactions_root: [7; 32],
            withdrawals_root: [8; 32],
        }
    }

    fn test_light_client_header() -> LightClientHeader {
        LightClientHeader {
            beacon: BeaconBlockHeader {
                slot: 6_200_000,
                proposer_index: 123_456,
                parent_root: [9; 32],
                state_root: [10; 32],
                body_root: [11; 32],
            },
            execution: test_execution_header(),
            execution_branch: vec![[12; 32]; EXECUTION_PAYLOAD_DEPTH],
        }
    }

    fn test_update(with_finality: bool) -> LightClientUpdate {
        LightClientUpdate {
            attested_header: test_light_client_header(),
            next_sync_committee: SyncCommittee {
                pubkeys: vec![BlsPublicKey([0xab; 48]); SYNC_COMMITTEE_SIZE],
                aggregate_pubkey: BlsPublicKey([0xcd; 48]),
            },
            next_sync_committee_branch: vec![[13; 32]; NEXT_SYNC_COMMITTEE_DEPTH],
            finalized_header: with_finality.then(test_light_client_header),
            finality_branch: if with_finality {
                vec![[14; 32]; FINALIZED_ROOT_DEPTH]
            } else {
                vec![]
            },
            sync_aggregate: SyncAggregate {
                sync_committee_bits: [0xff; 64],
                sync_committee_signature: BlsSignature([0xee; 96]),
            },
            signature_slot: 6_200_001,
        }
    }

    #[test]
    fn optimistic_update_roundtrip() {
        let update = OptimisticUpdate {
            attested_header: test_light_client_header(),
            sync_aggregate: SyncAggregate {
                sync_committee_bits: [0b1010_1010; 64],
                sync_committee_signature: BlsSignature([0x42; 96]),
            },
            signature_slot: 6_200_001,
        };
        let encoded = encode_optimistic_update(&update);
        assert_eq!(decode_optimistic_update(&encoded).unwrap(), update);
    }

    #[test]
    fn update_roundtrip_with_and_without_finality() {
        for with_finality in [false, true] {
            let update = test_update(with_finality);
            let encoded = encode_update(&update);
            assert_eq!(decode_update(&encoded).unwrap(), update);
        }
    }

    #[test]
    fn update_batch_roundtrip() {
        let updates = vec![test_update(true), test_update(false)];
        let encoded = encode_updates(&updates);
        assert_eq!(decode_updates(&encoded).unwrap(), updates);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let encoded = encode_update(&test_update(true));
        for cut in [0, 1, COMMITTEE_LEN, encoded.len() - 1] {
            assert!(matches!(
                decode_update(&encoded[..cut]),
                Err(CodecError::UnexpectedEof { .. })
            ));
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut encoded = encode_update(&test_update(false));
        encoded.push(0);
        assert!(matches!(
            decode_update(&encoded),
            Err(CodecError::TrailingBytes { count: 1 })
        ));
    }

    #[test]
    fn committee_roundtrip_and_hash_list() {
        let committee = SyncCommittee {
            pubkeys: vec![BlsPublicKey([0x17; 48]); SYNC_COMMITTEE_SIZE],
            aggregate_pubkey: BlsPublicKey([0x18; 48]),
        };
        let mut encoded = Vec::new();
        encode_committee(&committee, &mut encoded);
        assert_eq!(encoded.len(), COMMITTEE_LEN);
        assert_eq!(decode_committee(&encoded).unwrap(), committee);

        let hashes = vec![[1u8; 32], [2u8; 32]];
        let encoded = encode_hash_list(&hashes);
        assert_eq!(decode_hash_list(&encoded).unwrap(), hashes);
    }
}
