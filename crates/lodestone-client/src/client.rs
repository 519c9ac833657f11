//! The consensus sync engine.
//!
//! Owns the trusted committee and advances it across periods, using either
//! hash commitments (cheap, one full committee check at the end) or full
//! signed updates (one aggregate-signature check per period). Once synced it
//! constructs the verifying execution provider and keeps feeding it freshly
//! verified heads from a polling task.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::B256;
use lodestone_core::consensus::verify::{verify_committee_update, verify_optimistic_update};
use lodestone_core::{committee_hash, ExecutionInfo, SyncCommittee};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::checkpoint::{decode_checkpoint, encode_checkpoint, CheckpointStore};
use crate::config::ClientConfig;
use crate::prover::{Prover, ProverError};
use crate::provider::VerifyingProvider;
use crate::source::{ConsensusSource, ExecutionSource};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to fetch committee hash for period {period}: {source}")]
    CommitteeHashFetch {
        period: u64,
        #[source]
        source: ProverError,
    },

    #[error("committee for period {period} does not match its commitment")]
    CommitteeHashMismatch { period: u64 },

    #[error("malformed committee for period {period}: {reason}")]
    MalformedCommittee { period: u64, reason: &'static str },

    #[error("no sync update could be verified against the trusted committee")]
    NoHonestSource,

    #[error("update verification failed at period {period}; verified through period {last_verified}")]
    AdvanceStalled { period: u64, last_verified: u64 },

    #[error("no valid execution payload found within {retries} attempts")]
    ExecutionRetriesExhausted { retries: usize },

    #[error("client has not completed an initial sync")]
    NotSynced,

    #[error(transparent)]
    Prover(#[from] ProverError),
}

struct SyncState {
    latest_committee: Option<SyncCommittee>,
    latest_period: Option<u64>,
    latest_block_hash: Option<[u8; 32]>,
}

struct Inner<S> {
    config: ClientConfig,
    prover: Prover<S>,
    checkpoint: Option<Box<dyn CheckpointStore>>,
    state: Mutex<SyncState>,
}

pub struct Client<S: ConsensusSource, E: ExecutionSource> {
    inner: Arc<Inner<S>>,
    execution: Arc<E>,
    provider: Option<Arc<VerifyingProvider<E>>>,
    poll_task: Option<JoinHandle<()>>,
}

impl<S: ConsensusSource, E: ExecutionSource> Client<S, E> {
    pub fn new(config: ClientConfig, consensus: S, execution: E) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                prover: Prover::new(consensus),
                checkpoint: None,
                state: Mutex::new(SyncState {
                    latest_committee: None,
                    latest_period: None,
                    latest_block_hash: None,
                }),
            }),
            execution: Arc::new(execution),
            provider: None,
            poll_task: None,
        }
    }

    pub fn with_checkpoint_store(mut self, store: Box<dyn CheckpointStore>) -> Self {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("checkpoint store must be attached before sync starts");
        inner.checkpoint = Some(store);
        self
    }

    pub fn current_period(&self) -> u64 {
        self.inner.config.current_period(unix_now())
    }

    pub fn is_synced(&self) -> bool {
        self.inner.state.lock().unwrap().latest_period == Some(self.current_period())
    }

    /// Bring the trusted committee up to the current period. Idempotent:
    /// does nothing when the committee is already current.
    pub async fn catch_up(&self) -> Result<(), SyncError> {
        self.inner.catch_up().await
    }

    /// Full sync: committee catch-up, trust-anchor establishment, provider
    /// construction, and the background polling task. Returns the existing
    /// provider on subsequent calls.
    pub async fn sync(&mut self) -> Result<Arc<VerifyingProvider<E>>, SyncError> {
        self.inner.catch_up().await?;

        if let Some(provider) = &self.provider {
            return Ok(provider.clone());
        }

        let retries = self.inner.config.execution_retries;
        let info = self.inner.next_valid_execution_info(retries).await?;
        info!(
            number = info.block_number,
            hash = %B256::from(info.block_hash),
            "execution trust anchor established"
        );

        let provider = Arc::new(VerifyingProvider::new(
            self.execution.clone(),
            info.block_number,
            B256::from(info.block_hash),
            self.inner.config.chain_id,
        ));
        self.inner.state.lock().unwrap().latest_block_hash = Some(info.block_hash);

        let inner = self.inner.clone();
        let poll_provider = provider.clone();
        self.poll_task = Some(tokio::spawn(async move {
            poll_loop(inner, poll_provider).await;
        }));

        self.provider = Some(provider.clone());
        Ok(provider)
    }

    /// Alternative advance strategy: verify one full signed update per period
    /// instead of walking hash commitments. Slower, but every hop is checked
    /// by aggregate signature.
    pub async fn sync_from_updates(&self) -> Result<(), SyncError> {
        let current = self.current_period();
        let committee = self.inner.advance_by_signatures(current).await?;
        self.inner.commit_committee(current, committee);
        Ok(())
    }

    /// Fetch and verify the latest optimistic update. An update that fails
    /// verification is not an error: the poller simply tries again.
    pub async fn latest_execution(&self) -> Result<Option<ExecutionInfo>, SyncError> {
        self.inner.latest_execution().await
    }
}

impl<S: ConsensusSource, E: ExecutionSource> Drop for Client<S, E> {
    fn drop(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }
}

impl<S: ConsensusSource> Inner<S> {
    async fn catch_up(&self) -> Result<(), SyncError> {
        let current = self.config.current_period(unix_now());
        let latest = self.state.lock().unwrap().latest_period;
        if latest.is_some_and(|p| p >= current) {
            return Ok(());
        }

        let committee = self.advance_by_commitments(current).await?;
        self.commit_committee(current, committee);
        Ok(())
    }

    /// Hash-commitment advance: walk period by period fetching only 32-byte
    /// commitments, then fetch and check the full committee once at the end.
    /// Any fetch failure or hash mismatch is fatal to the attempt.
    async fn advance_by_commitments(&self, current: u64) -> Result<SyncCommittee, SyncError> {
        let (anchor_period, anchor_committee) = self.anchor(current);
        debug!(anchor_period, current, "advancing by hash commitments");

        let mut last_hash = committee_hash(&anchor_committee.pubkeys);
        for period in anchor_period + 1..=current {
            last_hash = self
                .prover
                .committee_hash(period, current, self.config.batch_size)
                .await
                .map_err(|source| SyncError::CommitteeHashFetch { period, source })?;
        }

        self.committee_for(current, last_hash, anchor_period, &anchor_committee)
            .await
    }

    /// Signature-verified advance: verify a full update per period, replacing
    /// the running committee with each verified `next_sync_committee`. A
    /// failed period, whether the fetch or the verification failed, stops the
    /// walk; progress made so far is committed so a retry resumes from the
    /// last verified period instead of re-verifying the whole chain.
    async fn advance_by_signatures(&self, current: u64) -> Result<SyncCommittee, SyncError> {
        let (anchor_period, anchor_committee) = self.anchor(current);
        debug!(anchor_period, current, "advancing by signed updates");

        let ctx = self.config.signing_context();
        let mut committee = anchor_committee;
        let mut verified_through = anchor_period;

        for period in anchor_period..current {
            let verified = match self
                .prover
                .sync_update(period, current, self.config.batch_size)
                .await
            {
                Ok(update) => verify_committee_update(&update, &committee, &ctx)
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match verified {
                Ok(next) => {
                    committee = next;
                    verified_through = period + 1;
                }
                Err(reason) => {
                    warn!(period, reason = %reason, "sync update unavailable or invalid");
                    if verified_through == anchor_period {
                        return Err(SyncError::NoHonestSource);
                    }
                    self.commit_committee(verified_through, committee);
                    return Err(SyncError::AdvanceStalled {
                        period,
                        last_verified: verified_through,
                    });
                }
            }
        }

        Ok(committee)
    }

    /// Committee for `period`, checked against `expected_hash`. The anchor
    /// committee is returned directly for the anchor period.
    async fn committee_for(
        &self,
        period: u64,
        expected_hash: [u8; 32],
        anchor_period: u64,
        anchor_committee: &SyncCommittee,
    ) -> Result<SyncCommittee, SyncError> {
        if period == anchor_period {
            return Ok(anchor_committee.clone());
        }

        let committee = self.prover.committee(period).await?;
        committee
            .validate()
            .map_err(|reason| SyncError::MalformedCommittee { period, reason })?;
        if committee_hash(&committee.pubkeys) != expected_hash {
            return Err(SyncError::CommitteeHashMismatch { period });
        }
        Ok(committee)
    }

    /// The most recent trusted (period, committee) pair: the last synced
    /// committee, else a valid checkpoint, else genesis.
    fn anchor(&self, current: u64) -> (u64, SyncCommittee) {
        {
            let state = self.state.lock().unwrap();
            if let (Some(period), Some(committee)) =
                (state.latest_period, state.latest_committee.as_ref())
            {
                return (period, committee.clone());
            }
        }

        let genesis_period = self.config.genesis_period();
        if let Some(store) = &self.checkpoint {
            match store.load() {
                Ok(Some(blob)) => match decode_checkpoint(&blob) {
                    Ok((period, committee))
                        if period >= genesis_period
                            && period <= current
                            && committee.validate().is_ok() =>
                    {
                        info!(period, "resuming from checkpoint");
                        return (period, committee);
                    }
                    Ok((period, _)) => {
                        warn!(period, "ignoring out-of-range checkpoint");
                    }
                    Err(e) => warn!(error = %e, "ignoring corrupt checkpoint"),
                },
                Ok(None) => {}
                Err(e) => warn!(error = %e, "checkpoint load failed"),
            }
        }

        (genesis_period, self.config.genesis_committee.clone())
    }

    fn commit_committee(&self, period: u64, committee: SyncCommittee) {
        if let Some(store) = &self.checkpoint {
            if let Err(e) = store.save(&encode_checkpoint(period, &committee)) {
                warn!(error = %e, "checkpoint save failed");
            }
        }
        let mut state = self.state.lock().unwrap();
        state.latest_committee = Some(committee);
        state.latest_period = Some(period);
    }

    async fn latest_execution(&self) -> Result<Option<ExecutionInfo>, SyncError> {
        let committee = self
            .state
            .lock()
            .unwrap()
            .latest_committee
            .clone()
            .ok_or(SyncError::NotSynced)?;

        let update = self.prover.optimistic_update().await?;
        let outcome = verify_optimistic_update(&committee, &update, &self.config.signing_context());
        if !outcome.correct {
            warn!(reason = ?outcome.reason, "invalid optimistic update");
            return Ok(None);
        }

        debug!(
            slot = update.attested_header.beacon.slot,
            "optimistic update verified"
        );
        Ok(Some(update.execution_info()))
    }

    /// Bounded retry loop around [`Self::latest_execution`], sleeping one
    /// poll interval between attempts.
    async fn next_valid_execution_info(&self, retries: usize) -> Result<ExecutionInfo, SyncError> {
        for attempt in 0..retries {
            if let Some(info) = self.latest_execution().await? {
                return Ok(info);
            }
            debug!(attempt, "no valid execution payload yet");
            tokio::time::sleep(self.config.poll_interval).await;
        }
        Err(SyncError::ExecutionRetriesExhausted { retries })
    }
}

/// One sync attempt per tick, strictly sequential. A failed tick is logged
/// and retried on the next one; every newer verified head is pushed into the
/// provider's block ledger.
async fn poll_loop<S: ConsensusSource, E: ExecutionSource>(
    inner: Arc<Inner<S>>,
    provider: Arc<VerifyingProvider<E>>,
) {
    let mut interval = tokio::time::interval(inner.config.poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately; skip it, sync() just ran
    interval.tick().await;

    loop {
        interval.tick().await;

        if let Err(e) = inner.catch_up().await {
            warn!(error = %e, "committee catch-up failed");
            continue;
        }

        match inner.latest_execution().await {
            Ok(Some(info)) => {
                let is_new = {
                    let mut state = inner.state.lock().unwrap();
                    if state.latest_block_hash != Some(info.block_hash) {
                        state.latest_block_hash = Some(info.block_hash);
                        true
                    } else {
                        false
                    }
                };
                if is_new {
                    info!(number = info.block_number, "new verified head");
                    provider.update(B256::from(info.block_hash), info.block_number);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "head poll failed"),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceError;
    use async_trait::async_trait;
    use lodestone_core::codec;
    use lodestone_core::types::beacon::{BlsPublicKey, SYNC_COMMITTEE_SIZE};

    fn committee(seed: u8) -> SyncCommittee {
        SyncCommittee {
            pubkeys: vec![BlsPublicKey([seed; 48]); SYNC_COMMITTEE_SIZE],
            aggregate_pubkey: BlsPublicKey([seed; 48]),
        }
    }

    /// Serves hash commitments chaining genesis -> `head_committee`, and the
    /// full committee for the head period. `lie` makes the served head
    /// committee disagree with its commitment.
    struct CommitmentSource {
        head_committee: SyncCommittee,
        lie: bool,
    }

    #[async_trait]
    impl ConsensusSource for CommitmentSource {
        async fn optimistic_update(&self) -> Result<Vec<u8>, SourceError> {
            Err(SourceError::Transport("no head".into()))
        }

        async fn sync_updates(&self, start: u64, _count: u64) -> Result<Vec<u8>, SourceError> {
            Err(SourceError::NotFound(start))
        }

        async fn committee(&self, _period: u64) -> Result<Vec<u8>, SourceError> {
            let served = if self.lie {
                committee(0x66)
            } else {
                self.head_committee.clone()
            };
            let mut out = Vec::new();
            codec::encode_committee(&served, &mut out);
            Ok(out)
        }

        async fn committee_hashes(
            &self,
            start_period: u64,
            count: u64,
        ) -> Result<Vec<u8>, SourceError> {
            // every period commits to the same head committee; good enough
            // for exercising the walk
            let hash = committee_hash(&self.head_committee.pubkeys);
            let hashes = vec![hash; count as usize];
            let _ = start_period;
            Ok(codec::encode_hash_list(&hashes))
        }
    }

    struct NullExecution;

    #[async_trait]
    impl ExecutionSource for NullExecution {
        async fn request(
            &self,
            _method: &str,
            _params: serde_json::Value,
        ) -> Result<serde_json::Value, SourceError> {
            Err(SourceError::Transport("unused".into()))
        }
    }

    fn two_period_config() -> ClientConfig {
        // genesis two periods in the past, so catch-up walks 2 commitments
        let genesis_time = unix_now() - 2 * 8192 * 12;
        ClientConfig::new(1, committee(0x01), 0, genesis_time, [0xaa; 32], [4, 0, 0, 0])
    }

    #[tokio::test]
    async fn catch_up_accepts_a_matching_committee() {
        let head = committee(0x42);
        let client = Client::new(
            two_period_config(),
            CommitmentSource {
                head_committee: head.clone(),
                lie: false,
            },
            NullExecution,
        );

        client.catch_up().await.unwrap();
        assert!(client.is_synced());

        let state = client.inner.state.lock().unwrap();
        assert_eq!(state.latest_committee.as_ref(), Some(&head));
    }

    #[tokio::test]
    async fn committee_hash_mismatch_is_fatal() {
        let client = Client::new(
            two_period_config(),
            CommitmentSource {
                head_committee: committee(0x42),
                lie: true,
            },
            NullExecution,
        );

        let err = client.catch_up().await.unwrap_err();
        assert!(matches!(err, SyncError::CommitteeHashMismatch { .. }));
        assert!(!client.is_synced());
    }

    #[tokio::test]
    async fn catch_up_is_idempotent_within_a_period() {
        let client = Client::new(
            two_period_config(),
            CommitmentSource {
                head_committee: committee(0x42),
                lie: false,
            },
            NullExecution,
        );

        client.catch_up().await.unwrap();
        // second call short-circuits; no state change
        client.catch_up().await.unwrap();
        assert!(client.is_synced());
    }
}
