//! Weekly date windows and the time-bounded fetch over them

use chrono::{Days, NaiveDate};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use vigil_misp::{FeedTransport, MispEndpoint, RawEvent, TransportError};

/// An inclusive 7-day range `[from, to]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl Window {
    /// The week ending on `to`
    pub fn ending(to: NaiveDate) -> Self {
        Self {
            from: to - Days::new(6),
            to,
        }
    }

    /// The week immediately before this one
    pub fn previous(&self) -> Self {
        Self::ending(self.from - Days::new(1))
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }

    /// True once the walk has reached `date`. Windows are walked newest
    /// first, so this also covers dates later than the window.
    pub fn reaches(&self, date: NaiveDate) -> bool {
        self.from <= date
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.from, self.to)
    }
}

/// Fetches one window through a transport under a hard timeout
#[derive(Clone)]
pub struct WindowedFetcher {
    transport: Arc<dyn FeedTransport>,
    timeout: Duration,
}

impl WindowedFetcher {
    pub fn new(transport: Arc<dyn FeedTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn transport(&self) -> &Arc<dyn FeedTransport> {
        &self.transport
    }

    pub async fn fetch(
        &self,
        endpoint: &MispEndpoint,
        window: Window,
    ) -> Result<Vec<RawEvent>, TransportError> {
        tokio::time::timeout(
            self.timeout,
            self.transport.fetch_window(endpoint, window.from, window.to),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.timeout.as_secs()))?
    }
}
