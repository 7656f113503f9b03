//! Active run tracking.
//!
//! The external worker writes each run into a new subdirectory of the output
//! base path without reporting which one. The tracker records when a run was
//! started and later picks the subdirectory whose modification time says it
//! belongs to that run. This is a correlation heuristic: a directory touched
//! by anything else after the stamp can be picked instead.

pub mod files;

pub use files::{check_relative, list_data_files, list_files, resolve_file, resolve_within, validation_report};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;
use tracing::{debug, info};

/// Lifecycle phase of the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    /// No run has been started.
    Idle,
    /// A run was stamped and no directory has been resolved since.
    Started,
    /// An active directory is cached.
    Resolved,
}

/// Point-in-time view of the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSnapshot {
    pub phase: RunPhase,
    pub run_started_at: Option<String>,
    pub active_run: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct TrackerState {
    run_started_at: Option<SystemTime>,
    active_dir: Option<PathBuf>,
}

/// Tracks the run start stamp and the resolved active run directory.
#[derive(Debug, Default)]
pub struct RunTracker {
    state: Mutex<TrackerState>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the start of a new run and forgets the previous active directory.
    pub fn stamp_start(&self) -> SystemTime {
        let now = SystemTime::now();
        let mut state = self.lock();
        state.run_started_at = Some(now);
        state.active_dir = None;
        info!("Run started at {}", DateTime::<Utc>::from(now).to_rfc3339());
        now
    }

    /// Returns the active run directory under `base`, resolving it if needed.
    ///
    /// A cached directory is kept while it still exists. Otherwise the
    /// subdirectory with the newest mtime at or after the run stamp wins,
    /// falling back to the newest subdirectory overall.
    pub fn resolve_active(&self, base: &Path) -> Option<PathBuf> {
        let mut state = self.lock();

        if let Some(dir) = &state.active_dir {
            if dir.is_dir() {
                return Some(dir.clone());
            }
            debug!("Cached run directory {} is gone", dir.display());
            state.active_dir = None;
        }

        let candidates = subdirs_by_mtime(base);
        let threshold = state.run_started_at.unwrap_or(SystemTime::UNIX_EPOCH);

        let chosen = candidates
            .iter()
            .find(|(_, mtime)| *mtime >= threshold)
            .or_else(|| candidates.first())
            .map(|(path, _)| path.clone())?;

        info!("Active run directory: {}", chosen.display());
        state.active_dir = Some(chosen.clone());
        Some(chosen)
    }

    /// Returns the current phase, stamp and cached directory.
    pub fn snapshot(&self) -> RunSnapshot {
        let state = self.lock();
        let phase = match (&state.run_started_at, &state.active_dir) {
            (_, Some(_)) => RunPhase::Resolved,
            (Some(_), None) => RunPhase::Started,
            (None, None) => RunPhase::Idle,
        };
        RunSnapshot {
            phase,
            run_started_at: state
                .run_started_at
                .map(|t| DateTime::<Utc>::from(t).to_rfc3339()),
            active_run: state.active_dir.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Immediate subdirectories of `base`, newest first. Ties are broken by
/// name, descending, so the order is deterministic.
fn subdirs_by_mtime(base: &Path) -> Vec<(PathBuf, SystemTime)> {
    let Ok(entries) = std::fs::read_dir(base) else {
        return Vec::new();
    };

    let mut dirs: Vec<(PathBuf, SystemTime)> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| {
            let mtime = entry.metadata().and_then(|m| m.modified()).ok()?;
            Some((entry.path(), mtime))
        })
        .collect();

    dirs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
    dirs
}
