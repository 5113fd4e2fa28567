//! Identifier clean-up for `[Data]` rows.
//!
//! Sample ids, names and projects end up as path components of the
//! demultiplexed output, so they are restricted to letters, digits, `_` and
//! `-`. A sample id shared by several projects is made unique by prefixing it
//! with the row's submission tag (its `Description`), and with its project
//! when the tags alone do not separate them.

use crate::{Column, SampleRow, SampleSheet, SampleSheetError};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use itertools::Itertools;
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Replace runs of whitespace with `_` and drop anything that is not a
/// letter, digit, underscore or dash. Letters and digits are Unicode aware.
pub fn sanitize_identifier(value: &str) -> String {
    value
        .split_whitespace()
        .join("_")
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-'))
        .collect()
}

fn clean(column: Column, value: &mut String, key: &str) -> Result<bool> {
    let cleaned = sanitize_identifier(value);
    if cleaned == *value {
        if value.is_empty() && column == Column::SampleId {
            bail!(SampleSheetError::EmptyIdentifier {
                column: column.canonical(),
                value: value.clone(),
                key: key.to_string(),
            });
        }
        return Ok(false);
    }
    if cleaned.is_empty() {
        bail!(SampleSheetError::EmptyIdentifier {
            column: column.canonical(),
            value: value.clone(),
            key: key.to_string(),
        });
    }
    *value = cleaned;
    Ok(true)
}

/// Sample ids that appear under more than one project, with those projects.
fn shared_ids(sheet: &SampleSheet) -> BTreeMap<String, BTreeSet<String>> {
    let mut projects: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for row in sheet.data.rows() {
        projects
            .entry(row.sample_id.clone())
            .or_default()
            .insert(row.sample_project.clone());
    }
    projects.retain(|_, p| p.len() > 1);
    projects
}

/// The row's sanitized `Description`, or its project when that is empty.
fn submission_tag(row: &SampleRow) -> String {
    match sanitize_identifier(&row.description) {
        tag if tag.is_empty() => row.sample_project.clone(),
        tag => tag,
    }
}

/// Prefix the id and name of every row whose id is in `shared` with `tag(row)`.
fn prefix_shared(
    sheet: &mut SampleSheet,
    shared: &BTreeMap<String, BTreeSet<String>>,
    tag: impl Fn(&SampleRow) -> String,
) {
    for row in sheet.data.rows_mut() {
        if !shared.contains_key(&row.sample_id) {
            continue;
        }
        let tag = tag(row);
        row.sample_id = format!("{tag}_{}", row.sample_id);
        if !row.sample_name.is_empty() {
            row.sample_name = format!("{tag}_{}", row.sample_name);
        }
    }
}

/// Normalize identifiers and resolve sample ids that appear under more than
/// one project. Returns whether anything changed.
pub fn validate(mut sheet: SampleSheet) -> Result<(bool, SampleSheet)> {
    let mut corrected = false;
    let has_name = sheet.data.has_column(Column::SampleName);
    let has_project = sheet.data.has_column(Column::SampleProject);

    for row in sheet.data.rows_mut() {
        let key = row.key();
        corrected |= clean(Column::SampleId, &mut row.sample_id, &key)?;
        if has_name {
            corrected |= clean(Column::SampleName, &mut row.sample_name, &key)?;
        }
        if has_project {
            corrected |= clean(Column::SampleProject, &mut row.sample_project, &key)?;
        }
    }

    let shared = shared_ids(&sheet);
    if !shared.is_empty() {
        info!(
            "sample ids used by more than one project: {}",
            shared.keys().join(", ")
        );
        prefix_shared(&mut sheet, &shared, submission_tag);

        // rows of different projects can carry the same submission tag
        let still_shared = shared_ids(&sheet);
        if !still_shared.is_empty() {
            warn!(
                "sample ids still shared after adding submission tags: {}",
                still_shared.keys().join(", ")
            );
            prefix_shared(&mut sheet, &still_shared, |row| row.sample_project.clone());
        }

        if let Some((sample_id, projects)) = shared_ids(&sheet).into_iter().next() {
            bail!(SampleSheetError::UnresolvedCollision {
                sample_id,
                projects: projects.into_iter().join(", "),
            });
        }
        corrected = true;
    }

    Ok((corrected, sheet))
}

/// The outcome of [`normalize_sheet_file`].
#[derive(Debug)]
pub struct NormalizedSheet {
    pub sheet: SampleSheet,
    /// Copy of the sheet as the instrument wrote it, present only when the
    /// sheet needed correcting.
    pub backup: Option<PathBuf>,
}

impl NormalizedSheet {
    pub fn was_corrected(&self) -> bool {
        self.backup.is_some()
    }
}

fn backup_path(path: &Path, now: DateTime<Local>) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stamp = now.format("%Y%m%dT%H%M%S");
    let name = match path.extension() {
        Some(ext) => format!("{stem}_orig_{stamp}.{}", ext.to_string_lossy()),
        None => format!("{stem}_orig_{stamp}"),
    };
    path.with_file_name(name)
}

/// Parse and validate the sheet at `path`. When a correction was needed the
/// file is first copied to a timestamped backup and then overwritten with the
/// corrected sheet.
pub fn normalize_sheet_file(path: &Path, now: DateTime<Local>) -> Result<NormalizedSheet> {
    let sheet = SampleSheet::parse(path)?;
    let (corrected, sheet) =
        validate(sheet).with_context(|| format!("validating {}", path.display()))?;
    if !corrected {
        return Ok(NormalizedSheet {
            sheet,
            backup: None,
        });
    }

    let backup = backup_path(path, now);
    std::fs::copy(path, &backup)
        .with_context(|| format!("backing up {} to {}", path.display(), backup.display()))?;
    sheet.write(path)?;
    info!(
        "rewrote sample sheet {}, original kept at {}",
        path.display(),
        backup.display()
    );
    Ok(NormalizedSheet {
        sheet,
        backup: Some(backup),
    })
}
