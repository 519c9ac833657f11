//! Caching layer over a [`ConsensusSource`].
//!
//! Fetches committee hash commitments and full updates in period batches so a
//! multi-period catch-up costs a handful of round trips instead of one per
//! period. The caches are keyed by period and never evicted: the number of
//! periods since genesis is small and grows by one every ~27 hours.

use std::collections::HashMap;
use std::sync::Mutex;

use lodestone_core::codec::{self, CodecError};
use lodestone_core::{LightClientUpdate, OptimisticUpdate, SyncCommittee};
use thiserror::Error;
use tracing::debug;

use crate::source::{ConsensusSource, SourceError};

#[derive(Debug, Error)]
pub enum ProverError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("source returned no data for period {0}")]
    MissingPeriod(u64),
}

pub struct Prover<S> {
    source: S,
    hash_cache: Mutex<HashMap<u64, [u8; 32]>>,
    update_cache: Mutex<HashMap<u64, LightClientUpdate>>,
}

impl<S: ConsensusSource> Prover<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            hash_cache: Mutex::new(HashMap::new()),
            update_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Committee hash commitment for `period`. A cache miss fetches hashes
    /// for up to `cache_count` consecutive periods (never past
    /// `current_period`) and caches all of them.
    pub async fn committee_hash(
        &self,
        period: u64,
        current_period: u64,
        cache_count: u64,
    ) -> Result<[u8; 32], ProverError> {
        if let Some(hash) = self.hash_cache.lock().unwrap().get(&period) {
            return Ok(*hash);
        }

        let count = batch_count(period, current_period, cache_count);
        debug!(period, count, "fetching committee hashes");
        let data = self.source.committee_hashes(period, count).await?;
        let hashes = codec::decode_hash_list(&data)?;
        if hashes.is_empty() {
            return Err(ProverError::MissingPeriod(period));
        }

        let mut cache = self.hash_cache.lock().unwrap();
        for (i, hash) in hashes.iter().enumerate() {
            cache.insert(period + i as u64, *hash);
        }
        Ok(hashes[0])
    }

    /// Full committee for `period`. Not cached: it is fetched once per sync
    /// attempt and immediately checked against a hash commitment.
    pub async fn committee(&self, period: u64) -> Result<SyncCommittee, ProverError> {
        let data = self.source.committee(period).await?;
        Ok(codec::decode_committee(&data)?)
    }

    /// Full sync update for `period`, fetched in batches like
    /// [`Self::committee_hash`].
    pub async fn sync_update(
        &self,
        period: u64,
        current_period: u64,
        cache_count: u64,
    ) -> Result<LightClientUpdate, ProverError> {
        if let Some(update) = self.update_cache.lock().unwrap().get(&period) {
            return Ok(update.clone());
        }

        let count = batch_count(period, current_period, cache_count);
        debug!(period, count, "fetching sync updates");
        let data = self.source.sync_updates(period, count).await?;
        let updates = codec::decode_updates(&data)?;
        if updates.is_empty() {
            return Err(ProverError::MissingPeriod(period));
        }

        let mut cache = self.update_cache.lock().unwrap();
        for (i, update) in updates.iter().enumerate() {
            cache.insert(period + i as u64, update.clone());
        }
        cache
            .get(&period)
            .cloned()
            .ok_or(ProverError::MissingPeriod(period))
    }

    pub async fn optimistic_update(&self) -> Result<OptimisticUpdate, ProverError> {
        let data = self.source.optimistic_update().await?;
        Ok(codec::decode_optimistic_update(&data)?)
    }
}

fn batch_count(period: u64, current_period: u64, cache_count: u64) -> u64 {
    (current_period.saturating_sub(period) + 1)
        .min(cache_count)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct HashSource {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl ConsensusSource for HashSource {
        async fn optimistic_update(&self) -> Result<Vec<u8>, SourceError> {
            Err(SourceError::Transport("unused".into()))
        }

        async fn sync_updates(&self, _start: u64, _count: u64) -> Result<Vec<u8>, SourceError> {
            Err(SourceError::Transport("unused".into()))
        }

        async fn committee(&self, _period: u64) -> Result<Vec<u8>, SourceError> {
            Err(SourceError::Transport("unused".into()))
        }

        async fn committee_hashes(
            &self,
            start_period: u64,
            count: u64,
        ) -> Result<Vec<u8>, SourceError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let hashes: Vec<[u8; 32]> = (start_period..start_period + count)
                .map(|p| {
                    let mut h = [0u8; 32];
                    h[..8].copy_from_slice(&p.to_le_bytes());
                    h
                })
                .collect();
            Ok(codec::encode_hash_list(&hashes))
        }
    }

    #[test]
    fn batch_count_is_clamped() {
        assert_eq!(batch_count(10, 20, 5), 5);
        assert_eq!(batch_count(18, 20, 5), 3);
        assert_eq!(batch_count(20, 20, 5), 1);
        // period past current still requests one
        assert_eq!(batch_count(25, 20, 5), 1);
    }

    #[tokio::test]
    async fn one_batched_fetch_serves_consecutive_periods() {
        let prover = Prover::new(HashSource {
            fetches: AtomicUsize::new(0),
        });

        let first = prover.committee_hash(10, 20, 5).await.unwrap();
        assert_eq!(first[..8], 10u64.to_le_bytes());

        // periods 10..15 were cached by the single fetch
        for period in 11..15 {
            let hash = prover.committee_hash(period, 20, 5).await.unwrap();
            assert_eq!(hash[..8], period.to_le_bytes());
        }
        assert_eq!(prover.source.fetches.load(Ordering::SeqCst), 1);

        // period 15 misses and triggers a second batch
        prover.committee_hash(15, 20, 5).await.unwrap();
        assert_eq!(prover.source.fetches.load(Ordering::SeqCst), 2);
    }
}
