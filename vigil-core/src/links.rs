//! Link manager - edge creation, merging and deletion
//!
//! Sits on top of the [`GraphStore`] and owns the rules around edges:
//! - Historical links are always created, never merged
//! - Active links are merged per (src, dst, source): a repeat sighting
//!   extends `last_seen` instead of adding an edge
//! - Deleting a link tombstones every investigation slot that cached it

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    tombstone_token, ActiveKey, GraphError, GraphResult, GraphStore, Link, LinkId, NodeClass,
    NodeId,
};

/// Parameters of an inbound link creation request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewLinkParams {
    pub type_src: Option<String>,
    pub type_dst: Option<String>,
    pub link_src: Option<String>,
    pub link_dst: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Result of a bulk description update
#[derive(Debug, Default)]
pub struct DescriptionUpdate {
    /// Links whose description was changed
    pub updated: Vec<LinkId>,
    /// Links that could not be updated, with the reason
    pub failed: Vec<(LinkId, GraphError)>,
}

/// Creates, merges and deletes links while keeping investigations consistent
pub struct LinkManager {
    store: Arc<GraphStore>,
    active_locks: DashMap<ActiveKey, Arc<Mutex<()>>>,
}

impl LinkManager {
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self {
            store,
            active_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// Create a time-bounded link. Never merges with existing links.
    pub fn create_historical_link(
        &self,
        src: NodeId,
        dst: NodeId,
        description: &str,
        source: &str,
        first_seen: DateTime<Utc>,
        last_seen: DateTime<Utc>,
    ) -> GraphResult<Link> {
        if first_seen > last_seen {
            return Err(GraphError::Validation(format!(
                "first_seen {} is after last_seen {}",
                first_seen, last_seen
            )));
        }

        let link = self.store.insert_link(Link::historical(
            src,
            dst,
            description,
            source,
            first_seen,
            last_seen,
        ))?;
        debug!("Created historical link {} ({} -> {})", link.id, src, dst);
        Ok(link)
    }

    /// Extend the active link for (src, dst, source), or create it
    pub fn create_or_extend_active_link(
        &self,
        src: NodeId,
        dst: NodeId,
        description: &str,
        source: &str,
    ) -> GraphResult<Link> {
        let key = ActiveKey {
            src,
            dst,
            source: source.to_string(),
        };

        let lock = self.active_locks.entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock();
            self.merge_or_create(&key, description)
        };
        drop(lock);
        self.active_locks
            .remove_if(&key, |_, l| Arc::strong_count(l) == 1);

        result
    }

    fn merge_or_create(&self, key: &ActiveKey, description: &str) -> GraphResult<Link> {
        let existing = self.store.find_active_link(key);
        self.extend_or_create(key, existing, description)
    }

    /// `existing` may be stale: a link deleted since the lookup is recreated
    fn extend_or_create(
        &self,
        key: &ActiveKey,
        existing: Option<Link>,
        description: &str,
    ) -> GraphResult<Link> {
        let now = Utc::now();

        if let Some(existing) = existing {
            match self.store.extend_link(existing.id, now) {
                Ok(link) => {
                    debug!("Extended active link {} to {}", link.id, link.last_seen);
                    return Ok(link);
                }
                // Deleted between lookup and extend
                Err(GraphError::NotFound(_)) => {
                    debug!("Active link {} vanished, recreating", existing.id);
                }
                Err(e) => return Err(e),
            }
        }

        let link = self.store.insert_link(Link::active(
            key.src,
            key.dst,
            description,
            &key.source,
            now,
        ))?;
        debug!("Created active link {} ({} -> {})", link.id, key.src, key.dst);
        Ok(link)
    }

    /// Delete one link, tombstoning every investigation slot that held it
    pub fn delete_link(&self, id: LinkId) -> GraphResult<LinkId> {
        let removal = self.remove(&[id]);
        if removal.is_empty() {
            return Err(GraphError::NotFound(format!("link {}", id)));
        }
        Ok(id)
    }

    /// Delete several links. Unknown ids are ignored; returns those deleted.
    pub fn delete_links(&self, ids: &[LinkId]) -> Vec<LinkId> {
        self.remove(ids)
    }

    fn remove(&self, ids: &[LinkId]) -> Vec<LinkId> {
        let now = Utc::now();
        let removal = self
            .store
            .remove_links(ids, |position| tombstone_token(now, position));

        if removal.rewritten_slots > 0 {
            info!(
                "Deleted {} links, tombstoned {} slots in {} investigations",
                removal.removed.len(),
                removal.rewritten_slots,
                removal.investigations.len()
            );
        }
        removal.removed
    }

    /// Set the description of each link. Partial success is allowed.
    pub fn update_description(&self, ids: &[LinkId], new_description: &str) -> DescriptionUpdate {
        let mut outcome = DescriptionUpdate::default();

        for id in ids {
            match self.store.set_link_description(*id, new_description) {
                Ok(link) => outcome.updated.push(link.id),
                Err(e) => {
                    warn!("Could not update description of link {}: {}", id, e);
                    outcome.failed.push((*id, e));
                }
            }
        }

        outcome
    }

    /// Every link touching `node`
    pub fn links_of(&self, node: NodeId) -> Vec<Link> {
        self.store.links_of(node)
    }

    /// Handle an inbound link creation request
    pub fn new_link(&self, params: &NewLinkParams) -> GraphResult<Link> {
        let (Some(type_src), Some(type_dst), Some(link_src), Some(link_dst)) = (
            params.type_src.as_deref(),
            params.type_dst.as_deref(),
            params.link_src.as_deref(),
            params.link_dst.as_deref(),
        ) else {
            return Err(GraphError::Validation(
                "type_src, type_dst, link_src and link_dst are required".to_string(),
            ));
        };

        let src_class = NodeClass::from_name(type_src)?;
        let dst_class = NodeClass::from_name(type_dst)?;
        let src = self.resolve(src_class, link_src)?;
        let dst = self.resolve(dst_class, link_dst)?;

        let description = params.description.as_deref().unwrap_or_default();
        let source = params.source.as_deref().unwrap_or_default();

        let created = match (params.first_seen, params.last_seen) {
            (Some(first_seen), Some(last_seen)) => {
                self.create_historical_link(src, dst, description, source, first_seen, last_seen)
            }
            _ => self.create_or_extend_active_link(src, dst, description, source),
        };

        created.map_err(|e| {
            error!("Link creation {} -> {} failed: {}", src, dst, e);
            GraphError::Rejected
        })
    }

    fn resolve(&self, class: NodeClass, raw_id: &str) -> GraphResult<NodeId> {
        let not_found = || GraphError::NotFound(format!("{} {}", class, raw_id));

        let id = NodeId::parse(raw_id).ok_or_else(not_found)?;
        match self.store.node(id) {
            Some(node) if node.class() == class => Ok(id),
            _ => Err(not_found()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LinkRef, NodeKind};
    use chrono::Duration;

    fn manager_with_nodes() -> (LinkManager, NodeId, NodeId) {
        let store = Arc::new(GraphStore::new());
        let a = store.get_or_create(NodeKind::Hash, &"a".repeat(64)).unwrap().id;
        let b = store
            .get_or_create(NodeKind::Text, "https://sandbox.example/analysis/1/")
            .unwrap()
            .id;
        (LinkManager::new(store), a, b)
    }

    #[test]
    fn test_active_link_merges() {
        let (manager, a, b) = manager_with_nodes();

        let first = manager.create_or_extend_active_link(a, b, "x", "src").unwrap();
        let second = manager.create_or_extend_active_link(a, b, "x", "src").unwrap();

        assert_eq!(first.id, second.id);
        assert!(second.last_seen >= first.last_seen);
        assert_eq!(second.first_seen, first.first_seen);
        assert_eq!(manager.store().link_count(), 1);
        assert!(manager.active_locks.is_empty());
    }

    #[test]
    fn test_extend_of_deleted_link_recreates_it() {
        let (manager, a, b) = manager_with_nodes();
        let original = manager.create_or_extend_active_link(a, b, "x", "src").unwrap();
        let key = ActiveKey {
            src: a,
            dst: b,
            source: "src".to_string(),
        };

        // Lookup happens, then a delete lands before the extend
        let stale = manager.store().find_active_link(&key);
        manager.delete_link(original.id).unwrap();
        let recreated = manager.extend_or_create(&key, stale, "x").unwrap();

        assert_ne!(recreated.id, original.id);
        assert!(recreated.active);
        assert_eq!(manager.store().link_count(), 1);
        assert_eq!(
            manager.store().find_active_link(&key).map(|l| l.id),
            Some(recreated.id)
        );
    }

    #[test]
    fn test_active_links_differ_by_source() {
        let (manager, a, b) = manager_with_nodes();
        let one = manager.create_or_extend_active_link(a, b, "x", "feed-a").unwrap();
        let two = manager.create_or_extend_active_link(a, b, "x", "feed-b").unwrap();
        assert_ne!(one.id, two.id);
    }

    #[test]
    fn test_concurrent_active_links_merge() {
        let (manager, a, b) = manager_with_nodes();
        let manager = Arc::new(manager);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                std::thread::spawn(move || {
                    manager
                        .create_or_extend_active_link(a, b, "x", "src")
                        .unwrap()
                        .id
                })
            })
            .collect();

        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(manager.store().link_count(), 1);
    }

    #[test]
    fn test_historical_links_never_merge() {
        let (manager, a, b) = manager_with_nodes();
        let t0 = Utc::now() - Duration::days(10);

        let one = manager
            .create_historical_link(a, b, "x", "src", t0, t0 + Duration::days(1))
            .unwrap();
        let two = manager
            .create_historical_link(a, b, "x", "src", t0 + Duration::days(2), t0 + Duration::days(3))
            .unwrap();

        assert_ne!(one.id, two.id);
        assert!(!one.active);
        assert_eq!(manager.store().link_count(), 2);
    }

    #[test]
    fn test_historical_rejects_inverted_dates() {
        let (manager, a, b) = manager_with_nodes();
        let now = Utc::now();
        let result = manager.create_historical_link(a, b, "x", "src", now, now - Duration::hours(1));
        assert!(matches!(result, Err(GraphError::Validation(_))));
        assert_eq!(manager.store().link_count(), 0);
    }

    #[test]
    fn test_delete_rewrites_duplicate_slots_distinctly() {
        let (manager, a, b) = manager_with_nodes();
        let l1 = manager.create_or_extend_active_link(a, b, "x", "s1").unwrap().id;
        let l2 = manager.create_or_extend_active_link(a, b, "x", "s2").unwrap().id;

        let store = manager.store();
        let inv = store.create_investigation("case");
        store.attach_link(inv, l1).unwrap();
        store.attach_link(inv, l2).unwrap();
        store.attach_link(inv, l1).unwrap();

        assert_eq!(manager.delete_link(l1).unwrap(), l1);

        let slots = store.investigation(inv).unwrap().links;
        assert_eq!(slots[1], LinkRef::Live { id: l2 });
        match (&slots[0], &slots[2]) {
            (
                LinkRef::Tombstone { token: t0, former: f0 },
                LinkRef::Tombstone { token: t2, former: f2 },
            ) => {
                assert_ne!(t0, t2);
                assert_eq!((*f0, *f2), (l1, l1));
            }
            other => panic!("expected two tombstones, got {:?}", other),
        }
        assert!(store.dangling_references().is_empty());
    }

    #[test]
    fn test_delete_missing_link() {
        let (manager, _, _) = manager_with_nodes();
        assert!(matches!(
            manager.delete_link(LinkId::new()),
            Err(GraphError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_links_across_investigations() {
        let (manager, a, b) = manager_with_nodes();
        let l1 = manager.create_or_extend_active_link(a, b, "x", "s1").unwrap().id;
        let l2 = manager.create_or_extend_active_link(a, b, "x", "s2").unwrap().id;
        let l3 = manager.create_or_extend_active_link(a, b, "x", "s3").unwrap().id;

        let store = manager.store();
        let first = store.create_investigation("one");
        let second = store.create_investigation("two");
        for id in [l1, l2, l3] {
            store.attach_link(first, id).unwrap();
        }
        store.attach_link(second, l2).unwrap();
        store.attach_link(second, l3).unwrap();

        let mut deleted = manager.delete_links(&[l1, l2, LinkId::new()]);
        deleted.sort_by_key(|id| id.to_string());
        let mut expected = vec![l1, l2];
        expected.sort_by_key(|id| id.to_string());
        assert_eq!(deleted, expected);

        let first = store.investigation(first).unwrap();
        let tokens: Vec<_> = first
            .links
            .iter()
            .filter_map(|slot| match slot {
                LinkRef::Tombstone { token, .. } => Some(token.clone()),
                LinkRef::Live { .. } => None,
            })
            .collect();
        assert_eq!(tokens.len(), 2);
        assert_ne!(tokens[0], tokens[1]);
        assert_eq!(first.links[2], LinkRef::Live { id: l3 });

        let second = store.investigation(second).unwrap();
        assert!(second.links[0].is_tombstone());
        assert_eq!(second.links[1], LinkRef::Live { id: l3 });
    }

    #[test]
    fn test_update_description_partial_success() {
        let (manager, a, b) = manager_with_nodes();
        let l1 = manager.create_or_extend_active_link(a, b, "old", "s1").unwrap().id;
        let gone = manager.create_or_extend_active_link(a, b, "old", "s2").unwrap().id;
        manager.delete_link(gone).unwrap();

        let outcome = manager.update_description(&[l1, gone], "c2 beacon");

        assert_eq!(outcome.updated, vec![l1]);
        assert_eq!(outcome.failed.len(), 1);
        assert!(matches!(outcome.failed[0].1, GraphError::NotFound(_)));
        assert_eq!(manager.store().link(l1).unwrap().description, "c2 beacon");
    }

    #[test]
    fn test_new_link_requires_mandatory_params() {
        let (manager, a, _) = manager_with_nodes();
        let params = NewLinkParams {
            type_src: Some("observable".into()),
            link_src: Some(a.to_string()),
            ..Default::default()
        };
        assert!(matches!(
            manager.new_link(&params),
            Err(GraphError::Validation(_))
        ));
    }

    #[test]
    fn test_new_link_unknown_class_and_missing_node() {
        let (manager, a, b) = manager_with_nodes();

        let mut params = NewLinkParams {
            type_src: Some("observable".into()),
            type_dst: Some("vulnerability".into()),
            link_src: Some(a.to_string()),
            link_dst: Some(b.to_string()),
            ..Default::default()
        };
        let err = manager.new_link(&params).unwrap_err();
        assert!(matches!(err, GraphError::UnknownKind(_)));

        params.type_dst = Some("observable".into());
        params.link_dst = Some(NodeId::new().to_string());
        assert!(matches!(
            manager.new_link(&params),
            Err(GraphError::NotFound(_))
        ));

        // Node exists but is not an entity
        params.type_dst = Some("entity".into());
        params.link_dst = Some(b.to_string());
        assert!(matches!(
            manager.new_link(&params),
            Err(GraphError::NotFound(_))
        ));
    }

    #[test]
    fn test_new_link_picks_historical_or_active() {
        let (manager, a, b) = manager_with_nodes();
        let params: NewLinkParams = serde_json::from_value(serde_json::json!({
            "type_src": "observable",
            "type_dst": "observable",
            "link_src": a.to_string(),
            "link_dst": b.to_string(),
            "description": "analysis_link",
            "source": "analyst",
            "first_seen": "2024-03-01T00:00:00Z",
            "last_seen": "2024-03-05T00:00:00Z"
        }))
        .unwrap();

        let historical = manager.new_link(&params).unwrap();
        assert!(!historical.active);
        assert_eq!(historical.description, "analysis_link");

        let active_params = NewLinkParams {
            first_seen: None,
            last_seen: None,
            ..params.clone()
        };
        let one = manager.new_link(&active_params).unwrap();
        let two = manager.new_link(&active_params).unwrap();
        assert!(one.active);
        assert_eq!(one.id, two.id);
    }

    #[test]
    fn test_new_link_hides_creation_cause() {
        let (manager, a, b) = manager_with_nodes();
        let params = NewLinkParams {
            type_src: Some("observable".into()),
            type_dst: Some("observable".into()),
            link_src: Some(a.to_string()),
            link_dst: Some(b.to_string()),
            first_seen: Some(Utc::now()),
            last_seen: Some(Utc::now() - Duration::days(1)),
            ..Default::default()
        };
        assert!(matches!(manager.new_link(&params), Err(GraphError::Rejected)));
    }
}
