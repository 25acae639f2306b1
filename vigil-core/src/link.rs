//! Relationship edges between nodes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::NodeId;

/// Unique identifier for a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(Uuid);

impl LinkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }
}

impl Default for LinkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key under which repeated sightings of an active relation are merged
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActiveKey {
    pub src: NodeId,
    pub dst: NodeId,
    pub source: String,
}

/// A directed relationship between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub src: NodeId,
    pub dst: NodeId,
    /// Nature of the relationship (e.g. "analysis_link", "resolves_to")
    #[serde(default)]
    pub description: String,
    /// Who asserted the relationship
    #[serde(default)]
    pub source: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Active links are extended on repeat sightings instead of duplicated
    pub active: bool,
}

impl Link {
    /// A time-bounded relation with explicit first/last sightings
    pub fn historical(
        src: NodeId,
        dst: NodeId,
        description: &str,
        source: &str,
        first_seen: DateTime<Utc>,
        last_seen: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LinkId::new(),
            src,
            dst,
            description: description.to_string(),
            source: source.to_string(),
            first_seen,
            last_seen,
            active: false,
        }
    }

    /// An ongoing relation first seen at `now`
    pub fn active(
        src: NodeId,
        dst: NodeId,
        description: &str,
        source: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LinkId::new(),
            src,
            dst,
            description: description.to_string(),
            source: source.to_string(),
            first_seen: now,
            last_seen: now,
            active: true,
        }
    }

    /// Merge key, only for active links
    pub fn active_key(&self) -> Option<ActiveKey> {
        self.active.then(|| ActiveKey {
            src: self.src,
            dst: self.dst,
            source: self.source.clone(),
        })
    }

    pub fn touches(&self, node: NodeId) -> bool {
        self.src == node || self.dst == node
    }
}
