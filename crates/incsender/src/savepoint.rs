//! Persisted cursor marking the last guaranteed-delivered point in time.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, SubsecRound, Utc};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// On-disk format: microseconds and a numeric UTC offset.
pub const SAVEPOINT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f%z";

/// Savepoints older than this are discarded in favour of the lookback window.
pub const STALE_AFTER_HOURS: i64 = 24;

/// A point in time; incidents created at or after it are not yet delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Savepoint(DateTime<Utc>);

impl Savepoint {
    /// Wrap an instant, truncated to the stored microsecond precision.
    #[must_use]
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at.trunc_subsecs(6))
    }

    #[must_use]
    pub fn at(&self) -> DateTime<Utc> {
        self.0
    }

    /// Parse the stored representation.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
            .or_else(|_| DateTime::parse_from_rfc3339(raw))
            .map(|parsed| Self::new(parsed.with_timezone(&Utc)))
            .map_err(|e| Error::Data(format!("invalid savepoint {raw:?}: {e}")))
    }
}

impl fmt::Display for Savepoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(SAVEPOINT_FORMAT))
    }
}

/// Pick the cursor for a cycle starting at `now`.
///
/// A missing savepoint, or one older than [`STALE_AFTER_HOURS`], falls back to
/// `now - lookback`.
#[must_use]
pub fn resolve_cursor(
    loaded: Option<Savepoint>,
    now: DateTime<Utc>,
    lookback: Duration,
) -> DateTime<Utc> {
    let fallback = now - lookback;

    match loaded {
        None => {
            debug!(cursor = %fallback, "No savepoint, using lookback window");
            fallback
        }
        Some(savepoint) if now - savepoint.at() > Duration::hours(STALE_AFTER_HOURS) => {
            warn!(
                savepoint = %savepoint,
                cursor = %fallback,
                "Savepoint is stale, resetting to lookback window"
            );
            fallback
        }
        Some(savepoint) => savepoint.at(),
    }
}

/// File-backed savepoint storage.
#[derive(Debug, Clone)]
pub struct SavepointStore {
    path: PathBuf,
}

impl SavepointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the savepoint. Missing or unreadable files yield `None`.
    pub fn load(&self) -> Option<Savepoint> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No savepoint file");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read savepoint");
                return None;
            }
        };

        match Savepoint::parse(&content) {
            Ok(savepoint) => Some(savepoint),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Error on savepoint processing");
                None
            }
        }
    }

    /// Persist the savepoint, replacing the previous file atomically.
    pub fn save(&self, savepoint: Savepoint) -> Result<()> {
        let io_err = |source: std::io::Error| Error::Savepoint {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let staging = self.path.with_extension("tmp");
        std::fs::write(&staging, savepoint.to_string()).map_err(io_err)?;
        std::fs::rename(&staging, &self.path).map_err(io_err)?;

        info!(savepoint = %savepoint, "Savepoint stored");
        Ok(())
    }
}
