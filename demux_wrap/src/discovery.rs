//! Finding run folders that are ready for bcl2fastq, and queued runs that
//! never completed.

use crate::config::Config;
use crate::run_state::{Marker, RunStateStore};
use anyhow::Result;
use chrono::{DateTime, Local};
use log::{debug, warn};
use std::path::{Path, PathBuf};

/// Age windows and required files used to classify run folders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRules {
    pub search_after: DateTime<Local>,
    pub days_to_search: i64,
    pub incomplete_after_days: i64,
    pub required_files: Vec<String>,
}

impl DiscoveryRules {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(DiscoveryRules {
            search_after: config.search_after()?,
            days_to_search: config.days_to_search,
            incomplete_after_days: config.incomplete_after_days,
            required_files: config.required_files.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    pub path: PathBuf,
    pub name: String,
    pub modified: DateTime<Local>,
}

impl RunDirectory {
    pub fn read(path: &Path) -> Result<RunDirectory> {
        let modified = std::fs::metadata(path)?.modified()?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(RunDirectory {
            path: path.to_path_buf(),
            name,
            modified: modified.into(),
        })
    }

    /// Whole days since the last modification.
    fn age_days(&self, now: DateTime<Local>) -> i64 {
        (now - self.modified).num_days()
    }
}

/// Subdirectories of `root`, sorted by path. Anything unreadable is logged
/// and left out.
pub fn list_run_dirs(root: &Path) -> Vec<RunDirectory> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("cannot list run folders in {}: {err}", root.display());
            return Vec::new();
        }
    };
    let mut runs: Vec<RunDirectory> = entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(err) => {
                warn!("skipping unreadable entry in {}: {err}", root.display());
                None
            }
        })
        .filter(|path| path.is_dir())
        .filter_map(|path| match RunDirectory::read(&path) {
            Ok(run) => Some(run),
            Err(err) => {
                warn!("skipping {}: {err}", path.display());
                None
            }
        })
        .collect();
    runs.sort_by(|a, b| a.path.cmp(&b.path));
    runs
}

/// A run is eligible when it was modified recently, has not been processed or
/// skipped, and the instrument has written every required file.
pub fn is_eligible(
    run: &RunDirectory,
    rules: &DiscoveryRules,
    store: &dyn RunStateStore,
    now: DateTime<Local>,
) -> bool {
    if run.modified < rules.search_after {
        return false;
    }
    if run.age_days(now) > rules.days_to_search {
        return false;
    }
    if store.has_marker(&run.path, Marker::Processed) || store.has_marker(&run.path, Marker::Skip)
    {
        return false;
    }
    match rules
        .required_files
        .iter()
        .find(|req| !run.path.join(req).exists())
    {
        Some(missing) => {
            debug!("{} is missing {missing}", run.name);
            false
        }
        None => true,
    }
}

/// A run is incomplete when it was queued long enough ago but never marked
/// complete, and nobody has been told yet.
pub fn is_incomplete(
    run: &RunDirectory,
    rules: &DiscoveryRules,
    store: &dyn RunStateStore,
    now: DateTime<Local>,
) -> bool {
    run.modified >= rules.search_after
        && run.age_days(now) > rules.incomplete_after_days
        && !store.has_marker(&run.path, Marker::Complete)
        && store.has_marker(&run.path, Marker::Processed)
        && !store.has_marker(&run.path, Marker::IncompleteNotified)
}

pub fn find_eligible_runs(
    root: &Path,
    rules: &DiscoveryRules,
    store: &dyn RunStateStore,
    now: DateTime<Local>,
) -> Vec<RunDirectory> {
    list_run_dirs(root)
        .into_iter()
        .filter(|run| is_eligible(run, rules, store, now))
        .collect()
}

pub fn find_incomplete_runs(
    root: &Path,
    rules: &DiscoveryRules,
    store: &dyn RunStateStore,
    now: DateTime<Local>,
) -> Vec<RunDirectory> {
    list_run_dirs(root)
        .into_iter()
        .filter(|run| is_incomplete(run, rules, store, now))
        .collect()
}
