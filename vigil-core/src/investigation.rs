//! Investigations and their cached link references
//!
//! An investigation keeps an ordered list of link slots. A slot either points
//! at a live link or holds a tombstone left behind when that link was deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{LinkId, TOMBSTONE_PREFIX};

/// Unique identifier for an investigation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvestigationId(Uuid);

impl InvestigationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }
}

impl Default for InvestigationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvestigationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One slot in an investigation's link list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LinkRef {
    Live { id: LinkId },
    Tombstone { token: String, former: LinkId },
}

impl LinkRef {
    pub fn live_id(&self) -> Option<LinkId> {
        match self {
            LinkRef::Live { id } => Some(*id),
            LinkRef::Tombstone { .. } => None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, LinkRef::Tombstone { .. })
    }
}

/// Build the tombstone token for one rewritten slot.
///
/// The position keeps tokens distinct when several slots are rewritten within
/// the same instant.
pub fn tombstone_token(at: DateTime<Utc>, position: usize) -> String {
    format!("{}-{}-{}", TOMBSTONE_PREFIX, at.timestamp_micros(), position)
}

/// A case-like container referencing a subset of links
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Investigation {
    pub id: InvestigationId,
    pub name: String,
    #[serde(default)]
    pub links: Vec<LinkRef>,
    pub created: DateTime<Utc>,
}

impl Investigation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: InvestigationId::new(),
            name: name.into(),
            links: Vec::new(),
            created: Utc::now(),
        }
    }

    /// Ids of all live slots, in slot order
    pub fn live_links(&self) -> impl Iterator<Item = LinkId> + '_ {
        self.links.iter().filter_map(LinkRef::live_id)
    }

    pub fn references(&self, id: LinkId) -> bool {
        self.live_links().any(|l| l == id)
    }

    /// Rewrite every live slot holding `id` to its own tombstone.
    /// Returns the number of slots rewritten.
    pub fn tombstone<F>(&mut self, id: LinkId, mut token_for: F) -> usize
    where
        F: FnMut(usize) -> String,
    {
        let mut rewritten = 0;
        for (position, slot) in self.links.iter_mut().enumerate() {
            if slot.live_id() == Some(id) {
                *slot = LinkRef::Tombstone {
                    token: token_for(position),
                    former: id,
                };
                rewritten += 1;
            }
        }
        rewritten
    }
}
