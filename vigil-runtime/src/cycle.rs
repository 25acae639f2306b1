//! Sync cycle
//!
//! One cycle syncs every instance in turn. Each instance runs inside its
//! own failure boundary: a panic in one sync is logged and the cycle moves
//! on. The cycle holds the snapshot lock throughout, reloads the graph
//! first so edits saved by other processes are kept, and writes the graph
//! before the cursors: a cursor never points past data that was not saved.

use chrono::{Local, NaiveDate};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

use vigil_core::{GraphStore, SnapshotLock};
use vigil_feeds::{CursorStore, FeedInstance, SyncController, SyncReport, SyncSettings};
use vigil_misp::{FeedTransport, MispTransport};

use crate::VigilConfig;

/// How one instance's sync ended
#[derive(Debug, Clone)]
pub enum InstanceOutcome {
    Synced(SyncReport),
    Panicked { instance: String, message: String },
}

impl InstanceOutcome {
    pub fn instance(&self) -> &str {
        match self {
            InstanceOutcome::Synced(report) => &report.instance,
            InstanceOutcome::Panicked { instance, .. } => instance,
        }
    }
}

/// Result of one cycle across all instances
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub outcomes: Vec<InstanceOutcome>,
}

impl CycleReport {
    pub fn imported(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o {
                InstanceOutcome::Synced(report) => report.imported,
                InstanceOutcome::Panicked { .. } => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| match o {
                InstanceOutcome::Synced(report) => !report.cursor_advanced,
                InstanceOutcome::Panicked { .. } => true,
            })
            .count()
    }
}

/// Owns the instance list and everything a cycle persists
pub struct SyncCycle {
    controller: SyncController,
    store: Arc<GraphStore>,
    instances: Vec<FeedInstance>,
    cursors: CursorStore,
    graph_path: PathBuf,
}

impl SyncCycle {
    /// Build a cycle from configuration: opens the graph snapshot and cursor
    /// file, and connects over HTTP
    pub fn from_config(config: &VigilConfig) -> anyhow::Result<Self> {
        let store = Arc::new(GraphStore::open(&config.graph_path)?);
        let transport: Arc<dyn FeedTransport> = Arc::new(MispTransport::new(&config.transport)?);
        Self::with_transport(config, store, transport)
    }

    pub fn with_transport(
        config: &VigilConfig,
        store: Arc<GraphStore>,
        transport: Arc<dyn FeedTransport>,
    ) -> anyhow::Result<Self> {
        Ok(Self::new(
            config.feed_instances(),
            store,
            transport,
            config.sync_settings(),
            CursorStore::load(&config.state_path)?,
            config.graph_path.clone(),
        ))
    }

    pub fn new(
        instances: Vec<FeedInstance>,
        store: Arc<GraphStore>,
        transport: Arc<dyn FeedTransport>,
        settings: SyncSettings,
        cursors: CursorStore,
        graph_path: PathBuf,
    ) -> Self {
        let instances = instances
            .into_iter()
            .map(|instance| {
                let cursor = cursors.get(instance.name());
                instance.with_cursor(cursor)
            })
            .collect();

        Self {
            controller: SyncController::new(transport, store.clone(), settings),
            store,
            instances,
            cursors,
            graph_path,
        }
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    pub fn instances(&self) -> &[FeedInstance] {
        &self.instances
    }

    /// Sync every instance once as of `today`, then persist state
    pub async fn run_once(&mut self, today: NaiveDate) -> anyhow::Result<CycleReport> {
        let mut report = CycleReport::default();

        let lock_path = self.graph_path.clone();
        let _lock = tokio::task::spawn_blocking(move || SnapshotLock::acquire(&lock_path)).await??;
        self.store.reload(&self.graph_path)?;
        info!("Sync cycle starting: {} instances", self.instances.len());

        for instance in &mut self.instances {
            let name = instance.name().to_string();
            let sync = self.controller.sync(instance, today);

            let outcome = match AssertUnwindSafe(sync).catch_unwind().await {
                Ok(sync_report) => {
                    self.cursors.set(&name, instance.cursor);
                    InstanceOutcome::Synced(sync_report)
                }
                Err(panic) => {
                    let message = panic_message(&*panic);
                    error!("Sync of {} aborted: {}", name, message);
                    InstanceOutcome::Panicked {
                        instance: name,
                        message,
                    }
                }
            };
            report.outcomes.push(outcome);
        }

        self.store.save(&self.graph_path)?;
        self.cursors.save()?;

        info!(
            "Sync cycle done: {} events imported, {} instances incomplete, graph has {} nodes",
            report.imported(),
            report.failures(),
            self.store.node_count()
        );

        Ok(report)
    }

    /// Run cycles on a fixed interval. `max_cycles = 0` runs until ctrl-c.
    pub async fn watch(&mut self, every: Duration, max_cycles: usize) -> anyhow::Result<()> {
        let mut ticker = interval(every);
        let mut cycles = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted, stopping sync loop");
                    break;
                }
            }

            if let Err(e) = self.run_once(Local::now().date_naive()).await {
                error!("Sync cycle failed: {:#}", e);
            }

            cycles += 1;
            if max_cycles > 0 && cycles >= max_cycles {
                break;
            }
        }

        Ok(())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use vigil_core::{LinkManager, NodeKind};
    use vigil_misp::{MispEndpoint, RawEvent, TransportError};

    /// Panics for the instance named "bad"; elsewhere one event in the week ending 2024-03-20
    struct Flaky;

    #[async_trait]
    impl FeedTransport for Flaky {
        async fn fetch_window(
            &self,
            endpoint: &MispEndpoint,
            _from: NaiveDate,
            to: NaiveDate,
        ) -> Result<Vec<RawEvent>, TransportError> {
            if endpoint.name == "bad" {
                panic!("malformed feed state");
            }
            if to < NaiveDate::from_ymd_opt(2024, 3, 14).unwrap() {
                return Ok(Vec::new());
            }
            let event = serde_json::from_value(json!({
                "id": "1",
                "Attribute": [{"type": "hostname", "value": "c2.example", "category": "Network activity"}]
            }))
            .unwrap();
            Ok(vec![event])
        }

        async fn fetch_organisations(
            &self,
            _endpoint: &MispEndpoint,
        ) -> Result<HashMap<String, String>, TransportError> {
            Ok(HashMap::new())
        }
    }

    fn instance(name: &str) -> FeedInstance {
        let endpoint = MispEndpoint::new(name, "https://misp.example", "k").unwrap();
        FeedInstance::new(endpoint, name)
    }

    #[tokio::test]
    async fn test_panic_is_contained_per_instance() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("state.json");
        let graph_path = dir.path().join("graph.json");

        let store = Arc::new(GraphStore::new());
        let mut cycle = SyncCycle::new(
            vec![instance("bad"), instance("good")],
            store.clone(),
            Arc::new(Flaky),
            SyncSettings::default(),
            CursorStore::load(&state_path).unwrap(),
            graph_path.clone(),
        );

        let today = NaiveDate::from_ymd_opt(2024, 3, 20).unwrap();
        let report = cycle.run_once(today).await.unwrap();

        assert_eq!(report.outcomes.len(), 2);
        assert!(matches!(report.outcomes[0], InstanceOutcome::Panicked { .. }));
        assert_eq!(report.outcomes[1].instance(), "good");
        assert_eq!(report.failures(), 1);
        assert!(store.find(NodeKind::Hostname, "c2.example").is_some());

        // Only the healthy instance got a cursor
        let cursors = CursorStore::load(&state_path).unwrap();
        assert_eq!(cursors.get("good").last_run, Some(today));
        assert!(!cursors.get("bad").is_set());

        let reopened = GraphStore::open(&graph_path).unwrap();
        assert_eq!(reopened.node_count(), 1);
    }

    #[tokio::test]
    async fn test_second_cycle_catches_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(GraphStore::new());
        let mut cycle = SyncCycle::new(
            vec![instance("good")],
            store,
            Arc::new(Flaky),
            SyncSettings::default(),
            CursorStore::load(dir.path().join("state.json")).unwrap(),
            dir.path().join("graph.json"),
        );

        let first = NaiveDate::from_ymd_opt(2024, 3, 20).unwrap();
        cycle.run_once(first).await.unwrap();
        assert_eq!(cycle.instances()[0].cursor.last_run, Some(first));

        let report = cycle.run_once(first).await.unwrap();
        match &report.outcomes[0] {
            InstanceOutcome::Synced(sync) => {
                assert_eq!(sync.mode, vigil_feeds::SyncMode::Catchup);
                assert_eq!(sync.windows, 2);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(cycle.store().node_count(), 1);
    }

    /// Turns the graph path into a directory mid-sync so the snapshot write fails
    struct Sabotage {
        graph_path: PathBuf,
    }

    #[async_trait]
    impl FeedTransport for Sabotage {
        async fn fetch_window(
            &self,
            endpoint: &MispEndpoint,
            from: NaiveDate,
            to: NaiveDate,
        ) -> Result<Vec<RawEvent>, TransportError> {
            std::fs::create_dir_all(&self.graph_path).unwrap();
            Flaky.fetch_window(endpoint, from, to).await
        }

        async fn fetch_organisations(
            &self,
            _endpoint: &MispEndpoint,
        ) -> Result<HashMap<String, String>, TransportError> {
            Ok(HashMap::new())
        }
    }

    #[tokio::test]
    async fn test_failed_graph_save_leaves_cursor_unset() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("state.json");
        let graph_path = dir.path().join("graph.json");

        let mut cycle = SyncCycle::new(
            vec![instance("good")],
            Arc::new(GraphStore::new()),
            Arc::new(Sabotage {
                graph_path: graph_path.clone(),
            }),
            SyncSettings::default(),
            CursorStore::load(&state_path).unwrap(),
            graph_path,
        );

        let today = NaiveDate::from_ymd_opt(2024, 3, 20).unwrap();
        assert!(cycle.run_once(today).await.is_err());

        // The next run must backfill again instead of skipping the lost window
        let cursors = CursorStore::load(&state_path).unwrap();
        assert_eq!(cursors.get("good").last_run, None);
    }

    #[tokio::test]
    async fn test_cycle_keeps_edits_saved_between_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let graph_path = dir.path().join("graph.json");
        let today = NaiveDate::from_ymd_opt(2024, 3, 20).unwrap();

        let mut cycle = SyncCycle::new(
            vec![instance("good")],
            Arc::new(GraphStore::new()),
            Arc::new(Flaky),
            SyncSettings::default(),
            CursorStore::load(dir.path().join("state.json")).unwrap(),
            graph_path.clone(),
        );
        cycle.run_once(today).await.unwrap();

        // Another process adds a link while the watcher sleeps
        let link_id = {
            let _lock = SnapshotLock::acquire(&graph_path).unwrap();
            let store = Arc::new(GraphStore::open(&graph_path).unwrap());
            let host = store.find(NodeKind::Hostname, "c2.example").unwrap();
            let actor = store.get_or_create(NodeKind::Actor, "APT-X").unwrap();
            let link = LinkManager::new(store.clone())
                .create_or_extend_active_link(host.id, actor.id, "attributed", "analyst")
                .unwrap();
            store.save(&graph_path).unwrap();
            link.id
        };

        cycle.run_once(today).await.unwrap();
        assert!(cycle.store().link(link_id).is_some());

        // ...and later deletes it again
        {
            let _lock = SnapshotLock::acquire(&graph_path).unwrap();
            let store = Arc::new(GraphStore::open(&graph_path).unwrap());
            LinkManager::new(store.clone()).delete_link(link_id).unwrap();
            store.save(&graph_path).unwrap();
        }

        cycle.run_once(today).await.unwrap();
        assert!(cycle.store().link(link_id).is_none());
        let reopened = GraphStore::open(&graph_path).unwrap();
        assert!(reopened.link(link_id).is_none());
        assert!(reopened.find(NodeKind::Actor, "APT-X").is_some());
    }
}
