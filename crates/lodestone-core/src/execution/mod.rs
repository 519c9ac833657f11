//! Execution-layer proof verification: Merkle-Patricia trie proofs for
//! accounts and storage, and code hash checks.

pub mod proof;
