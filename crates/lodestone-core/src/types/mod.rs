//! Data types shared across the verification modules.

pub mod beacon;
pub mod execution;
