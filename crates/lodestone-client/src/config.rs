use std::time::Duration;

use lodestone_core::consensus::verify::SigningContext;
use lodestone_core::{period_at_slot, period_at_time, SyncCommittee};

/// How many consecutive periods a single batched prover fetch covers.
pub const DEFAULT_BATCH_SIZE: u64 = 5;

/// One beacon slot plus a second of slack.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(13);

/// Attempts to obtain a valid execution payload before giving up.
pub const DEFAULT_EXECUTION_RETRIES: usize = 10;

/// Oldest block (relative to the verified head) the provider will serve.
pub const MAX_BLOCK_HISTORY: u64 = 256;

/// How far ahead of the verified head a requested block may be before the
/// request is rejected instead of suspended.
pub const MAX_BLOCK_FUTURE: u64 = 4;

/// Everything the sync engine needs to know about the chain it follows.
/// The genesis committee is the root of trust: every later committee is
/// only accepted through a commitment or signature chain back to it.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub chain_id: u64,
    pub genesis_committee: SyncCommittee,
    pub genesis_slot: u64,
    pub genesis_time: u64,
    pub genesis_validators_root: [u8; 32],
    pub fork_version: [u8; 4],
    pub poll_interval: Duration,
    pub batch_size: u64,
    pub execution_retries: usize,
}

impl ClientConfig {
    pub fn new(
        chain_id: u64,
        genesis_committee: SyncCommittee,
        genesis_slot: u64,
        genesis_time: u64,
        genesis_validators_root: [u8; 32],
        fork_version: [u8; 4],
    ) -> Self {
        Self {
            chain_id,
            genesis_committee,
            genesis_slot,
            genesis_time,
            genesis_validators_root,
            fork_version,
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            execution_retries: DEFAULT_EXECUTION_RETRIES,
        }
    }

    pub fn genesis_period(&self) -> u64 {
        period_at_slot(self.genesis_slot)
    }

    /// The period the wall clock says we should be in.
    pub fn current_period(&self, unix_time: u64) -> u64 {
        period_at_time(unix_time, self.genesis_time)
    }

    pub fn signing_context(&self) -> SigningContext {
        SigningContext {
            genesis_validators_root: self.genesis_validators_root,
            fork_version: self.fork_version,
        }
    }
}
