//! # Lodestone Client
//!
//! The async half of the Lodestone Ethereum light client: a consensus sync
//! engine that maintains a trusted sync committee, and a verifying execution
//! provider that answers JSON-RPC state queries with every response checked
//! against proofs.
//!
//! Data flows in one direction: untrusted sources supply bytes, the sync
//! engine verifies them with `lodestone-core`, and only verified block
//! hashes ever reach the provider's ledger.
//!
//! ```no_run
//! # use lodestone_client::{Client, ClientConfig};
//! # async fn run<S, E>(config: ClientConfig, consensus: S, execution: E)
//! # where S: lodestone_client::ConsensusSource, E: lodestone_client::ExecutionSource {
//! let mut client = Client::new(config, consensus, execution);
//! let provider = client.sync().await.unwrap();
//! let balance = provider
//!     .rpc_method("eth_getBalance", serde_json::json!(["0x00000000219ab540356cbb839cbe05303d7705fa", "latest"]))
//!     .await
//!     .unwrap();
//! # }
//! ```

pub mod checkpoint;
pub mod client;
pub mod config;
pub mod prover;
pub mod provider;
pub mod source;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use client::{Client, SyncError};
pub use config::ClientConfig;
pub use prover::{Prover, ProverError};
pub use provider::types::{BlockTag, RpcError, RpcMethod};
pub use provider::VerifyingProvider;
pub use source::{ConsensusSource, ExecutionSource, SourceError};
