//! # Elastore
//!
//! Elastic object storage: buckets of keyed objects opened as file handles,
//! with tiered residency across memory, local disk and block stores.
//!
//! This package re-exports the public crates of the workspace and hosts the
//! workspace-level integration tests.

pub use elastore_blockstore as blockstore;
pub use elastore_core::*;
