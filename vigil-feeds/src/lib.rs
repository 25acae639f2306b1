//! Vigil Feed Ingestion
//!
//! Pulls events from MISP instances and folds them into the graph:
//! - Per-instance sync cursors persisted between runs
//! - Weekly windows walked backward from today, each fetch time-bounded
//! - Backfill / catch-up state machine with resumable stop rules
//! - Event enrichment: attribute → node, tags, context records

pub mod cursor;
pub mod enricher;
pub mod error;
pub mod instance;
pub mod sync;
pub mod window;

pub use cursor::*;
pub use enricher::*;
pub use error::*;
pub use instance::*;
pub use sync::*;
pub use window::*;
