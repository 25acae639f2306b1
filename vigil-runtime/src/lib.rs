//! Vigil Runtime
//!
//! Runs sync cycles over every configured MISP instance:
//! - Configuration file loading
//! - Sequential per-instance sync with failure containment
//! - Cursor and graph snapshot persistence after each cycle
//! - Periodic scheduling

pub mod config;
pub mod cycle;

pub use config::*;
pub use cycle::*;
