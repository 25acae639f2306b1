//! Feed instance settings and runtime state

use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;
use vigil_misp::MispEndpoint;

use crate::{FeedCursor, FeedError};

/// One `[[instances]]` entry of the configuration file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InstanceSettings {
    /// Key used for cursor state and logs
    pub name: String,
    /// Name written as the `source` of context records; defaults to `name`
    pub display_name: Option<String>,
    pub url: Option<String>,
    pub key: Option<String>,
    /// Environment variable holding the key, used when `key` is absent
    pub key_env: Option<String>,
    /// Tag substrings kept out of the generic tag set
    pub galaxy_filter: Vec<String>,
    /// Oldest day (relative to today) a backfill may request
    pub days: Option<u32>,
}

impl InstanceSettings {
    fn resolve_key(&self) -> Option<String> {
        self.key
            .clone()
            .or_else(|| {
                self.key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok())
            })
            .filter(|k| !k.trim().is_empty())
    }
}

/// A configured instance together with its sync state
#[derive(Debug, Clone)]
pub struct FeedInstance {
    pub endpoint: MispEndpoint,
    pub display_name: String,
    pub galaxy_filter: Vec<String>,
    pub days: Option<u32>,
    /// Organisation id → name, refreshed at the start of every sync
    pub organisations: HashMap<String, String>,
    pub cursor: FeedCursor,
}

impl FeedInstance {
    pub fn new(endpoint: MispEndpoint, display_name: &str) -> Self {
        Self {
            endpoint,
            display_name: display_name.to_string(),
            galaxy_filter: Vec::new(),
            days: None,
            organisations: HashMap::new(),
            cursor: FeedCursor::default(),
        }
    }

    /// Build an instance from settings; fails if url or key is missing
    pub fn from_settings(settings: &InstanceSettings) -> Result<Self, FeedError> {
        let url = settings
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| FeedError::MissingUrl(settings.name.clone()))?;
        let key = settings
            .resolve_key()
            .ok_or_else(|| FeedError::MissingKey(settings.name.clone()))?;

        let endpoint = MispEndpoint::new(&settings.name, url, &key)?;
        let display_name = settings.display_name.as_deref().unwrap_or(&settings.name);

        debug!("Configured instance {} at {}", settings.name, endpoint.url);

        Ok(Self::new(endpoint, display_name)
            .with_galaxy_filter(settings.galaxy_filter.clone())
            .with_days(settings.days))
    }

    pub fn name(&self) -> &str {
        &self.endpoint.name
    }

    pub fn with_galaxy_filter(mut self, filter: Vec<String>) -> Self {
        self.galaxy_filter = filter
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        self
    }

    pub fn with_days(mut self, days: Option<u32>) -> Self {
        self.days = days;
        self
    }

    pub fn with_cursor(mut self, cursor: FeedCursor) -> Self {
        self.cursor = cursor;
        self
    }
}
