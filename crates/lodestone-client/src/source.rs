//! Abstract data suppliers. Sources move bytes; they never verify anything.
//! Everything a source returns is treated as untrusted until it passes the
//! checks in `lodestone-core`.

use async_trait::async_trait;
use thiserror::Error;

/// Transport-level failures. Opaque by design: the sync engine only decides
/// whether to retry or give up, it never inspects transport details.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("no data available for period {0}")]
    NotFound(u64),
}

/// Supplier of consensus-layer records, binary-encoded per the codec in
/// `lodestone_core::codec`.
#[async_trait]
pub trait ConsensusSource: Send + Sync + 'static {
    /// The latest optimistic update the source knows about.
    async fn optimistic_update(&self) -> Result<Vec<u8>, SourceError>;

    /// `count` consecutive full sync updates starting at `start_period`.
    async fn sync_updates(&self, start_period: u64, count: u64) -> Result<Vec<u8>, SourceError>;

    /// The full committee for a single period.
    async fn committee(&self, period: u64) -> Result<Vec<u8>, SourceError>;

    /// `count` consecutive committee hash commitments starting at
    /// `start_period`.
    async fn committee_hashes(
        &self,
        start_period: u64,
        count: u64,
    ) -> Result<Vec<u8>, SourceError>;
}

/// Supplier of execution-layer JSON-RPC responses. The verifying provider
/// never trusts these responses directly; every piece of state is checked
/// against a proof before use.
#[async_trait]
pub trait ExecutionSource: Send + Sync + 'static {
    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, SourceError>;

    /// Issue several requests as one batch. The default implementation runs
    /// them sequentially; transports with native batching should override.
    async fn request_batch(
        &self,
        calls: &[(&str, serde_json::Value)],
    ) -> Result<Vec<serde_json::Value>, SourceError> {
        let mut responses = Vec::with_capacity(calls.len());
        for (method, params) in calls {
            responses.push(self.request(method, params.clone()).await?);
        }
        Ok(responses)
    }
}
