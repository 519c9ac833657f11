//! # Lodestone Core
//!
//! Pure Rust verification logic for the Lodestone Ethereum light client.
//!
//! This crate contains **no networking code** and **no async machinery**.
//! It is the cryptographic heart of Lodestone: every piece of Ethereum data
//! passes through these verification functions before being trusted.
//!
//! ## Trust Model
//!
//! - **Sync committee verification** (`consensus` module): Verifies BLS12-381
//!   aggregate signatures from Ethereum's 512-member sync committee. Trusts
//!   that 2/3+ of the committee is honest (same assumption as Ethereum itself).
//!
//! - **Execution proof verification** (`execution` module): Verifies
//!   Merkle-Patricia trie proofs for account state and storage against a
//!   state root extracted from a signature-verified consensus update.
//!
//! - **Binary codec** (`codec` module): Canonical fixed/variable-length
//!   encodings for committees and signed update records, used for wire
//!   transfer and local caching.

pub mod codec;
pub mod consensus;
pub mod execution;
pub mod types;

// Re-export commonly used items for convenience
pub use consensus::{
    committee::{committee_hash, period_at_slot, period_at_time, slot_at_time},
    verify::{
        verify_committee_update, verify_optimistic_update, SigningContext, VerificationError,
        VerifyOutcome,
    },
};
pub use execution::proof::{
    keccak256, verify_account_proof, verify_code_hash, verify_storage_proof, ProofError,
    TrieAccount,
};
pub use types::{beacon::*, execution::*};
