//! Graph nodes and the context records attached to them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use crate::{NodeClass, NodeKind};

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a node id from its string form
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One enrichment pass worth of context about a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRecord {
    /// Who contributed this context (feed display name, analytics name)
    pub source: String,
    /// Free-form key/value details
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Identifier of the record at the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Where the record can be looked at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
}

impl ContextRecord {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            attributes: BTreeMap::new(),
            external_id: None,
            external_url: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    pub fn with_external_url(mut self, url: impl Into<String>) -> Self {
        self.external_url = Some(url.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// A node in the threat graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Canonical value; (kind, value) is the node's identity
    pub value: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Context in the order it was contributed
    #[serde(default)]
    pub context: Vec<ContextRecord>,
    pub created: DateTime<Utc>,
}

impl Node {
    /// Create a node from an already-normalized value
    pub fn new(kind: NodeKind, value: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            value: value.into(),
            tags: BTreeSet::new(),
            context: Vec::new(),
            created: Utc::now(),
        }
    }

    pub fn class(&self) -> NodeClass {
        self.kind.class()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Add tags, ignoring blanks. Returns how many were new.
    pub fn tag<I, S>(&mut self, tags: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = 0;
        for tag in tags {
            let tag: String = tag.into();
            let tag = tag.trim();
            if !tag.is_empty() && self.tags.insert(tag.to_string()) {
                added += 1;
            }
        }
        added
    }

    /// Append a context record unless an identical one is already present
    pub fn add_context(&mut self, record: ContextRecord) -> bool {
        if self.context.contains(&record) {
            return false;
        }
        self.context.push(record);
        true
    }
}
