//! Vigil MISP Layer
//!
//! Network access to MISP-style threat sharing instances:
//! - HTTP client construction (proxy, timeout, user agent)
//! - Wire types for events, attributes, tags and organisations
//! - `FeedTransport` seam with the HTTP implementation

pub mod client;
pub mod events;
pub mod transport;

pub use client::*;
pub use events::*;
pub use transport::*;
