//! Configuration file

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;
use vigil_feeds::{FeedInstance, InstanceSettings, SyncSettings};
use vigil_misp::TransportConfig;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    /// Cursor file (instance → last run date)
    pub state_path: PathBuf,
    /// Graph snapshot
    pub graph_path: PathBuf,
    /// Seconds between cycles in watch mode
    pub interval_secs: u64,
    pub transport: TransportConfig,
    pub sync: SyncOptions,
    pub instances: Vec<InstanceSettings>,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("vigil-state.json"),
            graph_path: PathBuf::from("vigil-graph.json"),
            interval_secs: 3600,
            transport: TransportConfig::default(),
            sync: SyncOptions::default(),
            instances: Vec::new(),
        }
    }
}

/// `[sync]` table
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    pub window_timeout_secs: u64,
    pub catchup_overlap: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        let defaults = SyncSettings::default();
        Self {
            window_timeout_secs: defaults.fetch_timeout.as_secs(),
            catchup_overlap: defaults.catchup_overlap,
        }
    }
}

impl VigilConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            fetch_timeout: Duration::from_secs(self.sync.window_timeout_secs.max(1)),
            catchup_overlap: self.sync.catchup_overlap,
        }
    }

    /// Instances ready to sync. Incomplete entries are skipped with a warning.
    pub fn feed_instances(&self) -> Vec<FeedInstance> {
        self.instances
            .iter()
            .filter_map(|settings| match FeedInstance::from_settings(settings) {
                Ok(instance) => Some(instance),
                Err(e) => {
                    warn!("Skipping instance {}: {}", settings.name, e);
                    None
                }
            })
            .collect()
    }
}
