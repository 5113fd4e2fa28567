//! Durable run lifecycle state.
//!
//! The scheduler keeps no queue of its own: whether a run still needs work is
//! read back from its markers on every cycle.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    /// A job was launched for the run and finished, successfully or not.
    Processed,
    /// Every job of the run succeeded.
    Complete,
    /// Set by operators to keep a run out of the scheduler.
    Skip,
    /// Operators were told the run never completed.
    IncompleteNotified,
}

impl Marker {
    fn suffix(self) -> &'static str {
        match self {
            Marker::Processed => "processed",
            Marker::Complete => "complete",
            Marker::Skip => "skip",
            Marker::IncompleteNotified => "incomplete_notified",
        }
    }
}

pub trait RunStateStore: Send + Sync {
    fn has_marker(&self, run_dir: &Path, marker: Marker) -> bool;

    /// Setting a marker that is already set is a no-op.
    fn set_marker(&self, run_dir: &Path, marker: Marker) -> Result<()>;
}

/// Markers as empty files inside the run directory, e.g. `demux.processed`.
#[derive(Debug, Clone)]
pub struct FsMarkerStore {
    prefix: String,
}

impl FsMarkerStore {
    pub fn new(prefix: &str) -> Self {
        FsMarkerStore {
            prefix: prefix.to_string(),
        }
    }

    pub fn marker_path(&self, run_dir: &Path, marker: Marker) -> PathBuf {
        run_dir.join(format!("{}.{}", self.prefix, marker.suffix()))
    }
}

impl RunStateStore for FsMarkerStore {
    fn has_marker(&self, run_dir: &Path, marker: Marker) -> bool {
        self.marker_path(run_dir, marker).is_file()
    }

    fn set_marker(&self, run_dir: &Path, marker: Marker) -> Result<()> {
        let path = self.marker_path(run_dir, marker);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("writing marker {}", path.display()))?;
        Ok(())
    }
}
