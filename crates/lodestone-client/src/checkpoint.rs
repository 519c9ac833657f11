//! Checkpoint persistence: the latest trusted committee with its period,
//! so a restart can resume the commitment walk from there instead of genesis.

use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use lodestone_core::codec::{self, CodecError};
use lodestone_core::SyncCommittee;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt checkpoint: {0}")]
    Corrupt(#[from] CodecError),

    #[error("corrupt checkpoint: truncated")]
    Truncated,
}

/// Durable store for the checkpoint blob. Implementations only move bytes;
/// the blob is re-validated on load before anything trusts it.
pub trait CheckpointStore: Send + Sync {
    fn load(&self) -> Result<Option<Vec<u8>>, CheckpointError>;
    fn save(&self, data: &[u8]) -> Result<(), CheckpointError>;
}

/// Checkpoint blob: period (8 bytes LE) followed by the encoded committee.
pub fn encode_checkpoint(period: u64, committee: &SyncCommittee) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&period.to_le_bytes());
    codec::encode_committee(committee, &mut out);
    out
}

pub fn decode_checkpoint(data: &[u8]) -> Result<(u64, SyncCommittee), CheckpointError> {
    if data.len() < 8 {
        return Err(CheckpointError::Truncated);
    }
    let period = u64::from_le_bytes(data[..8].try_into().unwrap());
    let committee = codec::decode_committee(&data[8..])?;
    Ok((period, committee))
}

/// File-backed store. Writes go to a sibling temp file first, then rename.
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Result<Option<Vec<u8>>, CheckpointError> {
        match std::fs::read(&self.path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, data: &[u8]) -> Result<(), CheckpointError> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory store, for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<Option<Vec<u8>>>,
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self) -> Result<Option<Vec<u8>>, CheckpointError> {
        Ok(self.data.lock().unwrap().clone())
    }

    fn save(&self, data: &[u8]) -> Result<(), CheckpointError> {
        *self.data.lock().unwrap() = Some(data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestone_core::types::beacon::{BlsPublicKey, SYNC_COMMITTEE_SIZE};

    #[test]
    fn checkpoint_roundtrip() {
        let committee = SyncCommittee {
            pubkeys: vec![BlsPublicKey([0x11; 48]); SYNC_COMMITTEE_SIZE],
            aggregate_pubkey: BlsPublicKey([0x22; 48]),
        };
        let blob = encode_checkpoint(812, &committee);

        let store = MemoryCheckpointStore::default();
        assert!(store.load().unwrap().is_none());
        store.save(&blob).unwrap();

        let loaded = store.load().unwrap().unwrap();
        let (period, decoded) = decode_checkpoint(&loaded).unwrap();
        assert_eq!(period, 812);
        assert_eq!(decoded, committee);
    }

    #[test]
    fn short_blob_is_rejected() {
        assert!(matches!(
            decode_checkpoint(&[1, 2, 3]),
            Err(CheckpointError::Truncated)
        ));
    }
}
