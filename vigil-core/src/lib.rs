//! Vigil Core - Threat graph model and link consistency rules
//!
//! This crate provides the foundational primitives:
//! - Closed registry of node kinds (observables, indicators, entities)
//! - Graph store with idempotent get-or-create by canonical value
//! - Link manager enforcing the active-link merge rule
//! - Investigations whose link slots never dangle after a delete
//! - Atomic, lock-guarded persistence of state files

pub mod error;
pub mod kinds;
pub mod node;
pub mod link;
pub mod investigation;
pub mod graph;
pub mod links;
pub mod persist;

pub use error::*;
pub use kinds::*;
pub use node::*;
pub use link::*;
pub use investigation::*;
pub use graph::*;
pub use links::*;
pub use persist::*;

/// Prefix of every tombstone token written into an investigation slot
pub const TOMBSTONE_PREFIX: &str = "local";
