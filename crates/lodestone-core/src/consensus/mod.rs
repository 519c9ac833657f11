//! Sync committee consensus verification.
//!
//! `committee` holds the pure helpers: period arithmetic, committee digests,
//! and SSZ merkleization. `verify` holds the signature checks that decide
//! whether a signed update is trusted.

pub mod committee;
pub mod verify;
