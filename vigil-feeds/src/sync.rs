//! Per-instance sync controller
//!
//! Walks weekly windows backward from today:
//! - Backfill (no cursor): until two consecutive windows import nothing
//! - Catch-up (cursor set): until the walk reaches the cursor, plus a
//!   configurable number of overlap windows
//!
//! The cursor only moves to today when the walk ends on one of these stop
//! rules (or the instance's day limit). A transport failure leaves it
//! untouched so the next run covers the same ground.

use chrono::{Days, NaiveDate};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vigil_core::GraphStore;
use vigil_misp::FeedTransport;

use crate::{EnrichmentReport, EventEnricher, FeedInstance, Window, WindowedFetcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Backfill,
    Catchup,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Backfill => write!(f, "backfill"),
            SyncMode::Catchup => write!(f, "catch-up"),
        }
    }
}

/// Why the window walk ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Backfill saw two consecutive empty windows
    Exhausted,
    /// Catch-up walked past the cursor
    ReachedCursor,
    /// The next window is older than the instance's day limit
    DayLimit,
    /// A window fetch failed or timed out
    Transport(String),
}

impl StopReason {
    /// Whether the walk finished on a rule that allows the cursor to move
    pub fn is_complete(&self) -> bool {
        !matches!(self, StopReason::Transport(_))
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Exhausted => write!(f, "no more events"),
            StopReason::ReachedCursor => write!(f, "reached last run"),
            StopReason::DayLimit => write!(f, "day limit"),
            StopReason::Transport(e) => write!(f, "transport failure: {}", e),
        }
    }
}

/// Outcome of one instance sync
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub instance: String,
    pub mode: SyncMode,
    /// Windows fetched successfully
    pub windows: usize,
    /// Events imported across all windows
    pub imported: usize,
    pub attributes: EnrichmentReport,
    pub stop: StopReason,
    pub cursor_advanced: bool,
}

/// Tuning for the window walk
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Timeout around each window fetch
    pub fetch_timeout: Duration,
    /// Windows processed after the one that reaches the cursor
    pub catchup_overlap: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(120),
            catchup_overlap: 1,
        }
    }
}

/// Drives the sync of one instance at a time
pub struct SyncController {
    fetcher: WindowedFetcher,
    enricher: EventEnricher,
    settings: SyncSettings,
}

impl SyncController {
    pub fn new(
        transport: Arc<dyn FeedTransport>,
        store: Arc<GraphStore>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            fetcher: WindowedFetcher::new(transport, settings.fetch_timeout),
            enricher: EventEnricher::new(store),
            settings,
        }
    }

    /// Refresh the organisation map. On failure the previous map is kept.
    pub async fn refresh_organisations(&self, instance: &mut FeedInstance) {
        let fetched = tokio::time::timeout(
            self.settings.fetch_timeout,
            self.fetcher
                .transport()
                .fetch_organisations(&instance.endpoint),
        )
        .await;

        match fetched {
            Ok(Ok(orgs)) => {
                debug!("{}: {} organisations", instance.name(), orgs.len());
                instance.organisations = orgs;
            }
            Ok(Err(e)) => warn!("{}: could not refresh organisations: {}", instance.name(), e),
            Err(_) => warn!("{}: organisation refresh timed out", instance.name()),
        }
    }

    /// Run one sync of `instance` as of `today`
    pub async fn sync(&self, instance: &mut FeedInstance, today: NaiveDate) -> SyncReport {
        self.refresh_organisations(instance).await;

        let mode = match instance.cursor.last_run {
            None => SyncMode::Backfill,
            Some(_) => SyncMode::Catchup,
        };
        info!("Syncing {} ({})", instance.name(), mode);

        let oldest = instance
            .days
            .and_then(|days| today.checked_sub_days(Days::new(u64::from(days))));

        let mut report = SyncReport {
            instance: instance.name().to_string(),
            mode,
            windows: 0,
            imported: 0,
            attributes: EnrichmentReport::default(),
            stop: StopReason::Exhausted,
            cursor_advanced: false,
        };

        let mut window = Window::ending(today);
        // Backfill: whether the previous window imported anything
        let mut had_results = true;
        // Catch-up: overlap windows still to process once the cursor is reached
        let mut trailing: Option<usize> = None;

        let stop = loop {
            if oldest.is_some_and(|bound| window.to < bound) {
                break StopReason::DayLimit;
            }

            let events = match self.fetcher.fetch(&instance.endpoint, window).await {
                Ok(events) => events,
                Err(e) => {
                    warn!("{}: fetching {} failed: {}", instance.name(), window, e);
                    break StopReason::Transport(e.to_string());
                }
            };

            for event in &events {
                report.attributes.merge(self.enricher.enrich(instance, event));
            }
            let imported = events.len();
            report.windows += 1;
            report.imported += imported;
            debug!(
                "{}: imported {} events from {} to {}",
                instance.name(),
                imported,
                window.from,
                window.to
            );

            match (mode, instance.cursor.last_run) {
                (SyncMode::Catchup, Some(cursor)) => match trailing {
                    Some(0) => break StopReason::ReachedCursor,
                    Some(n) => trailing = Some(n - 1),
                    None if window.reaches(cursor) => {
                        if self.settings.catchup_overlap == 0 {
                            break StopReason::ReachedCursor;
                        }
                        trailing = Some(self.settings.catchup_overlap - 1);
                    }
                    None => {}
                },
                _ => {
                    if imported == 0 {
                        if !had_results {
                            break StopReason::Exhausted;
                        }
                        had_results = false;
                    } else {
                        had_results = true;
                    }
                }
            }

            window = window.previous();
        };

        if stop.is_complete() {
            instance.cursor.advance(today);
            report.cursor_advanced = true;
        }
        report.stop = stop;

        info!(
            "{}: {} windows, {} events, stopped on {}{}",
            report.instance,
            report.windows,
            report.imported,
            report.stop,
            if report.cursor_advanced {
                ""
            } else {
                " (cursor kept)"
            }
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use vigil_core::NodeKind;
    use vigil_misp::{MispEndpoint, RawEvent, TransportError};

    use crate::FeedCursor;

    /// Returns a scripted number of events per window, then empty windows
    struct ScriptedTransport {
        script: Mutex<VecDeque<Option<usize>>>,
        requested: Mutex<Vec<Window>>,
        organisations: Option<HashMap<String, String>>,
    }

    impl ScriptedTransport {
        /// `None` in the script is a failed fetch
        fn new(script: &[Option<usize>]) -> Self {
            Self {
                script: Mutex::new(script.iter().copied().collect()),
                requested: Mutex::new(Vec::new()),
                organisations: Some(HashMap::new()),
            }
        }

        fn counts(counts: &[usize]) -> Self {
            let script: Vec<Option<usize>> = counts.iter().map(|c| Some(*c)).collect();
            Self::new(&script)
        }

        fn requested(&self) -> Vec<Window> {
            self.requested.lock().clone()
        }
    }

    #[async_trait]
    impl FeedTransport for ScriptedTransport {
        async fn fetch_window(
            &self,
            _endpoint: &MispEndpoint,
            from: NaiveDate,
            to: NaiveDate,
        ) -> Result<Vec<RawEvent>, TransportError> {
            let index = {
                let mut requested = self.requested.lock();
                requested.push(Window { from, to });
                requested.len()
            };

            let step = self.script.lock().pop_front().unwrap_or(Some(0));
            let Some(count) = step else {
                return Err(TransportError::Status {
                    url: "mock".to_string(),
                    status: 502,
                });
            };

            Ok((0..count)
                .map(|i| {
                    serde_json::from_value(json!({
                        "id": format!("{}{}", index, i),
                        "Attribute": [{
                            "type": "ip-dst",
                            "value": format!("10.0.{}.{}", index, i),
                            "category": "Network activity"
                        }]
                    }))
                    .unwrap()
                })
                .collect())
        }

        async fn fetch_organisations(
            &self,
            _endpoint: &MispEndpoint,
        ) -> Result<HashMap<String, String>, TransportError> {
            self.organisations.clone().ok_or(TransportError::Status {
                url: "mock".to_string(),
                status: 500,
            })
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn instance() -> FeedInstance {
        let endpoint = MispEndpoint::new("circl", "https://misp.example", "k").unwrap();
        FeedInstance::new(endpoint, "CIRCL")
    }

    fn controller(transport: Arc<ScriptedTransport>, overlap: usize) -> (SyncController, Arc<GraphStore>) {
        let store = Arc::new(GraphStore::new());
        let settings = SyncSettings {
            fetch_timeout: Duration::from_secs(5),
            catchup_overlap: overlap,
        };
        (SyncController::new(transport, store.clone(), settings), store)
    }

    #[tokio::test]
    async fn test_backfill_stops_after_two_empty_windows() {
        let transport = Arc::new(ScriptedTransport::counts(&[5, 0, 0, 9]));
        let (sync, store) = controller(transport.clone(), 1);
        let mut inst = instance();

        let report = sync.sync(&mut inst, date("2024-03-20")).await;

        assert_eq!(report.mode, SyncMode::Backfill);
        assert_eq!(report.windows, 3);
        assert_eq!(report.imported, 5);
        assert_eq!(report.stop, StopReason::Exhausted);
        assert!(report.cursor_advanced);
        assert_eq!(inst.cursor.last_run, Some(date("2024-03-20")));
        assert_eq!(store.node_count(), 5);
    }

    #[tokio::test]
    async fn test_backfill_survives_isolated_gap() {
        let transport = Arc::new(ScriptedTransport::counts(&[5, 0, 3, 0, 0, 9]));
        let (sync, _) = controller(transport.clone(), 1);
        let mut inst = instance();

        let report = sync.sync(&mut inst, date("2024-03-20")).await;

        assert_eq!(report.windows, 5);
        assert_eq!(report.imported, 8);
        assert_eq!(report.stop, StopReason::Exhausted);

        let requested = transport.requested();
        assert_eq!(requested[0], Window::ending(date("2024-03-20")));
        assert_eq!(requested[1], Window::ending(date("2024-03-13")));
        assert_eq!(requested[4].from, date("2024-02-15"));
    }

    #[tokio::test]
    async fn test_catchup_stops_at_window_containing_cursor() {
        let transport = Arc::new(ScriptedTransport::counts(&[1, 1, 1, 1, 1]));
        let (sync, _) = controller(transport.clone(), 0);
        let mut inst = instance().with_cursor(FeedCursor::at(date("2024-03-10")));

        let report = sync.sync(&mut inst, date("2024-03-20")).await;

        assert_eq!(report.mode, SyncMode::Catchup);
        assert_eq!(report.stop, StopReason::ReachedCursor);
        let requested = transport.requested();
        assert_eq!(requested.len(), 2);
        assert!(requested[1].contains(date("2024-03-10")));
        assert_eq!(inst.cursor.last_run, Some(date("2024-03-20")));
    }

    #[tokio::test]
    async fn test_catchup_overlap_window() {
        let transport = Arc::new(ScriptedTransport::counts(&[0, 0, 0, 0, 0]));
        let (sync, _) = controller(transport.clone(), 1);
        let mut inst = instance().with_cursor(FeedCursor::at(date("2024-03-10")));

        let report = sync.sync(&mut inst, date("2024-03-20")).await;

        // Empty windows never end a catch-up early
        assert_eq!(report.windows, 3);
        assert_eq!(transport.requested()[2], Window::ending(date("2024-03-06")));
        assert!(report.cursor_advanced);
    }

    #[tokio::test]
    async fn test_catchup_with_cursor_today() {
        let transport = Arc::new(ScriptedTransport::counts(&[2, 2, 2]));
        let (sync, _) = controller(transport.clone(), 0);
        let mut inst = instance().with_cursor(FeedCursor::at(date("2024-03-20")));

        let report = sync.sync(&mut inst, date("2024-03-20")).await;
        assert_eq!(report.windows, 1);
        assert_eq!(report.imported, 2);
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_cursor() {
        let transport = Arc::new(ScriptedTransport::new(&[Some(4), None, Some(4)]));
        let (sync, store) = controller(transport.clone(), 1);
        let mut inst = instance().with_cursor(FeedCursor::at(date("2024-01-01")));

        let report = sync.sync(&mut inst, date("2024-03-20")).await;

        assert!(matches!(report.stop, StopReason::Transport(_)));
        assert!(!report.cursor_advanced);
        assert_eq!(inst.cursor.last_run, Some(date("2024-01-01")));
        // Work done before the failure stays in the graph
        assert_eq!(report.windows, 1);
        assert_eq!(store.node_count(), 4);
        assert_eq!(transport.requested().len(), 2);
    }

    #[tokio::test]
    async fn test_day_limit_bounds_backfill() {
        let transport = Arc::new(ScriptedTransport::counts(&[1; 20]));
        let (sync, _) = controller(transport.clone(), 1);
        let mut inst = instance().with_days(Some(14));

        let report = sync.sync(&mut inst, date("2024-03-20")).await;

        // Windows ending 03-20, 03-13, 03-06; the next ends before 03-06
        assert_eq!(report.windows, 3);
        assert_eq!(report.stop, StopReason::DayLimit);
        assert!(report.cursor_advanced);
    }

    #[tokio::test]
    async fn test_organisation_failure_keeps_previous_map() {
        let mut transport = ScriptedTransport::counts(&[1]);
        transport.organisations = None;
        let (sync, store) = controller(Arc::new(transport), 1);

        let mut inst = instance();
        inst.organisations.insert("1".to_string(), "CIRCL".to_string());

        let report = sync.sync(&mut inst, date("2024-03-20")).await;

        assert_eq!(inst.organisations.get("1").map(String::as_str), Some("CIRCL"));
        assert!(report.cursor_advanced);
        assert!(store.find(NodeKind::Ip, "10.0.1.0").is_some());
    }
}
