//! Sync cursors
//!
//! A cursor is the date of the last completed sync of one instance. The
//! cursor file is a JSON object mapping instance name to ISO date.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use vigil_core::write_atomic;

use crate::CursorError;

/// Last completed sync of one instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedCursor {
    pub last_run: Option<NaiveDate>,
}

impl FeedCursor {
    pub fn at(date: NaiveDate) -> Self {
        Self {
            last_run: Some(date),
        }
    }

    pub fn is_set(&self) -> bool {
        self.last_run.is_some()
    }

    pub fn advance(&mut self, today: NaiveDate) {
        self.last_run = Some(today);
    }
}

/// Cursor file shared by every configured instance
#[derive(Debug)]
pub struct CursorStore {
    path: PathBuf,
    entries: BTreeMap<String, NaiveDate>,
}

impl CursorStore {
    /// Load the cursor file; a missing file means no instance has synced yet
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CursorError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| CursorError::Malformed {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No cursor file at {}, starting fresh", path.display());
                BTreeMap::new()
            }
            Err(source) => return Err(CursorError::Io { path, source }),
        };

        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, instance: &str) -> FeedCursor {
        FeedCursor {
            last_run: self.entries.get(instance).copied(),
        }
    }

    /// Record a cursor. An unset cursor leaves the stored value alone.
    pub fn set(&mut self, instance: &str, cursor: FeedCursor) {
        if let Some(date) = cursor.last_run {
            self.entries.insert(instance.to_string(), date);
        }
    }

    /// Atomically replace the cursor file
    pub fn save(&self) -> Result<(), CursorError> {
        let json = serde_json::to_vec_pretty(&self.entries).map_err(CursorError::Encode)?;
        write_atomic(&self.path, &json).map_err(|source| CursorError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
