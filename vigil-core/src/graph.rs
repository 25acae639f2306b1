//! Graph store - owns nodes, links and investigations
//!
//! Every primitive takes the store lock once, so each call is atomic with
//! respect to the others:
//! - Node creation is idempotent on (kind, canonical value)
//! - The active-link index and the link → investigation reverse index are
//!   updated under the same lock as the edge table
//! - Removing a link rewrites every investigation slot that pointed at it

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info};

use crate::persist::write_atomic;
use crate::{
    ActiveKey, ContextRecord, GraphError, GraphResult, Investigation, InvestigationId, Link,
    LinkId, LinkRef, Node, NodeId, NodeKind,
};

/// Outcome of a get-or-create call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Canonical value
    pub value: String,
    /// False when an existing node was returned
    pub created: bool,
}

/// Summary of a link removal
#[derive(Debug, Clone, Default)]
pub struct Removal {
    /// Links that existed and were removed
    pub removed: Vec<LinkId>,
    /// Investigation slots rewritten to tombstones
    pub rewritten_slots: usize,
    /// Investigations that had at least one slot rewritten
    pub investigations: Vec<InvestigationId>,
}

#[derive(Debug, Default)]
struct GraphState {
    nodes: HashMap<NodeId, Node>,
    by_value: HashMap<(NodeKind, String), NodeId>,
    links: HashMap<LinkId, Link>,
    active: HashMap<ActiveKey, LinkId>,
    investigations: HashMap<InvestigationId, Investigation>,
    referenced_by: HashMap<LinkId, HashSet<InvestigationId>>,
}

impl GraphState {
    fn require_node(&self, id: NodeId) -> GraphResult<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| GraphError::NotFound(format!("node {}", id)))
    }

    fn require_link_mut(&mut self, id: LinkId) -> GraphResult<&mut Link> {
        self.links
            .get_mut(&id)
            .ok_or_else(|| GraphError::NotFound(format!("link {}", id)))
    }

    fn insert_node(&mut self, node: Node) {
        self.by_value.insert((node.kind, node.value.clone()), node.id);
        self.nodes.insert(node.id, node);
    }

    fn insert_link(&mut self, link: Link) {
        if let Some(key) = link.active_key() {
            self.active.insert(key, link.id);
        }
        self.links.insert(link.id, link);
    }

    fn index_investigation(&mut self, inv: &Investigation) {
        for id in inv.live_links() {
            self.referenced_by.entry(id).or_default().insert(inv.id);
        }
    }
}

/// On-disk form of the graph
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    investigations: Vec<Investigation>,
}

fn load_state(path: &Path) -> GraphResult<GraphState> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("No graph snapshot at {}, starting empty", path.display());
            return Ok(GraphState::default());
        }
        Err(e) => return Err(e.into()),
    };

    let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
    let mut state = GraphState::default();
    for node in snapshot.nodes {
        state.insert_node(node);
    }
    for link in snapshot.links {
        state.insert_link(link);
    }
    for inv in snapshot.investigations {
        state.index_investigation(&inv);
        state.investigations.insert(inv.id, inv);
    }

    info!(
        "Loaded graph snapshot: {} nodes, {} links, {} investigations",
        state.nodes.len(),
        state.links.len(),
        state.investigations.len()
    );
    Ok(state)
}

/// Thread-safe in-memory graph with JSON snapshot persistence
#[derive(Debug, Default)]
pub struct GraphStore {
    state: RwLock<GraphState>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot; a missing file yields an empty graph
    pub fn open<P: AsRef<Path>>(path: P) -> GraphResult<Self> {
        Ok(Self {
            state: RwLock::new(load_state(path.as_ref())?),
        })
    }

    /// Replace the in-memory graph with the snapshot at `path`, picking up
    /// changes other processes saved since this store was opened
    pub fn reload<P: AsRef<Path>>(&self, path: P) -> GraphResult<()> {
        let state = load_state(path.as_ref())?;
        *self.state.write() = state;
        Ok(())
    }

    /// Write the whole graph to `path`, replacing the file atomically
    pub fn save<P: AsRef<Path>>(&self, path: P) -> GraphResult<()> {
        let snapshot = {
            let state = self.state.read();
            Snapshot {
                nodes: state.nodes.values().cloned().collect(),
                links: state.links.values().cloned().collect(),
                investigations: state.investigations.values().cloned().collect(),
            }
        };
        write_atomic(path.as_ref(), &serde_json::to_vec_pretty(&snapshot)?)?;
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.state.read().links.len()
    }

    pub fn investigation_count(&self) -> usize {
        self.state.read().investigations.len()
    }

    // === Nodes ===

    /// Return the node for (kind, value), creating it if needed
    pub fn get_or_create(&self, kind: NodeKind, raw: &str) -> GraphResult<NodeRef> {
        let value = kind.normalize(raw)?;
        let mut state = self.state.write();

        if let Some(id) = state.by_value.get(&(kind, value.clone())) {
            return Ok(NodeRef {
                id: *id,
                kind,
                value,
                created: false,
            });
        }

        let node = Node::new(kind, value.clone());
        let id = node.id;
        state.insert_node(node);
        debug!("Created {} node {}", kind, value);

        Ok(NodeRef {
            id,
            kind,
            value,
            created: true,
        })
    }

    /// Look a node up by kind and raw value
    pub fn find(&self, kind: NodeKind, raw: &str) -> Option<Node> {
        let value = kind.normalize(raw).ok()?;
        let state = self.state.read();
        state
            .by_value
            .get(&(kind, value))
            .and_then(|id| state.nodes.get(id))
            .cloned()
    }

    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.state.read().nodes.get(&id).cloned()
    }

    /// Add tags to a node. Returns how many were new.
    pub fn tag_node<I, S>(&self, id: NodeId, tags: I) -> GraphResult<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.write();
        let node = state
            .nodes
            .get_mut(&id)
            .ok_or_else(|| GraphError::NotFound(format!("node {}", id)))?;
        Ok(node.tag(tags))
    }

    /// Attach a context record. Returns false if an identical record existed.
    pub fn add_context(&self, id: NodeId, record: ContextRecord) -> GraphResult<bool> {
        let mut state = self.state.write();
        let node = state
            .nodes
            .get_mut(&id)
            .ok_or_else(|| GraphError::NotFound(format!("node {}", id)))?;
        Ok(node.add_context(record))
    }

    // === Links ===

    /// Store a new link; both endpoints must exist
    pub fn insert_link(&self, link: Link) -> GraphResult<Link> {
        let mut state = self.state.write();
        state.require_node(link.src)?;
        state.require_node(link.dst)?;
        state.insert_link(link.clone());
        Ok(link)
    }

    pub fn link(&self, id: LinkId) -> Option<Link> {
        self.state.read().links.get(&id).cloned()
    }

    pub fn find_active_link(&self, key: &ActiveKey) -> Option<Link> {
        let state = self.state.read();
        state
            .active
            .get(key)
            .and_then(|id| state.links.get(id))
            .cloned()
    }

    /// Move an existing link's last sighting forward
    pub fn extend_link(&self, id: LinkId, seen: DateTime<Utc>) -> GraphResult<Link> {
        let mut state = self.state.write();
        let link = state.require_link_mut(id)?;
        if seen > link.last_seen {
            link.last_seen = seen;
        }
        Ok(link.clone())
    }

    /// Reload a link, check both endpoints still resolve, then set its description
    pub fn set_link_description(&self, id: LinkId, description: &str) -> GraphResult<Link> {
        let mut state = self.state.write();
        let (src, dst) = {
            let link = state.require_link_mut(id)?;
            (link.src, link.dst)
        };
        state.require_node(src)?;
        state.require_node(dst)?;

        let link = state.require_link_mut(id)?;
        link.description = description.to_string();
        Ok(link.clone())
    }

    /// Every link with `node` at either end
    pub fn links_of(&self, node: NodeId) -> Vec<Link> {
        self.state
            .read()
            .links
            .values()
            .filter(|l| l.touches(node))
            .cloned()
            .collect()
    }

    /// Remove links and rewrite each investigation slot that referenced one
    /// of them to the token produced by `token_for(slot_position)`.
    /// Unknown ids are skipped.
    pub fn remove_links<F>(&self, ids: &[LinkId], mut token_for: F) -> Removal
    where
        F: FnMut(usize) -> String,
    {
        let mut state = self.state.write();
        let mut removal = Removal::default();
        let mut touched: HashSet<InvestigationId> = HashSet::new();

        for id in ids {
            let Some(link) = state.links.remove(id) else {
                continue;
            };
            if let Some(key) = link.active_key() {
                if state.active.get(&key) == Some(id) {
                    state.active.remove(&key);
                }
            }

            let holders = state.referenced_by.remove(id).unwrap_or_default();
            for inv_id in holders {
                if let Some(inv) = state.investigations.get_mut(&inv_id) {
                    let rewritten = inv.tombstone(*id, &mut token_for);
                    if rewritten > 0 {
                        removal.rewritten_slots += rewritten;
                        touched.insert(inv_id);
                    }
                }
            }
            removal.removed.push(*id);
        }

        removal.investigations = touched.into_iter().collect();
        removal
    }

    // === Investigations ===

    pub fn create_investigation(&self, name: &str) -> InvestigationId {
        let inv = Investigation::new(name);
        let id = inv.id;
        self.state.write().investigations.insert(id, inv);
        id
    }

    /// Append a live slot for `link` to an investigation
    pub fn attach_link(&self, investigation: InvestigationId, link: LinkId) -> GraphResult<()> {
        let mut state = self.state.write();
        if !state.links.contains_key(&link) {
            return Err(GraphError::NotFound(format!("link {}", link)));
        }
        let inv = state
            .investigations
            .get_mut(&investigation)
            .ok_or_else(|| GraphError::NotFound(format!("investigation {}", investigation)))?;
        inv.links.push(LinkRef::Live { id: link });
        state
            .referenced_by
            .entry(link)
            .or_default()
            .insert(investigation);
        Ok(())
    }

    pub fn investigation(&self, id: InvestigationId) -> Option<Investigation> {
        self.state.read().investigations.get(&id).cloned()
    }

    /// Live slots that do not resolve to a stored link, as (investigation, position)
    pub fn dangling_references(&self) -> Vec<(InvestigationId, usize)> {
        let state = self.state.read();
        let links = &state.links;
        state
            .investigations
            .values()
            .flat_map(|inv| {
                inv.links.iter().enumerate().filter_map(move |(pos, slot)| {
                    slot.live_id()
                        .filter(|id| !links.contains_key(id))
                        .map(|_| (inv.id, pos))
                })
            })
            .collect()
    }
}
