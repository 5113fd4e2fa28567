//! Illumina sample sheets: parsing, identifier validation and rewriting.
// Warning groups (as of rust 1.55)
#![deny(
    future_incompatible,
    nonstandard_style,
    rust_2018_compatibility,
    rust_2021_compatibility,
    rust_2018_idioms,
    unused
)]

mod parse;
mod validate;
mod write;

pub use validate::{normalize_sheet_file, sanitize_identifier, validate, NormalizedSheet};
pub use write::derived_sheet_path;

use anyhow::{Context, Result};
use itertools::Itertools;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default sample sheet name inside a run directory.
pub const SAMPLE_SHEET_CSV: &str = "SampleSheet.csv";

#[derive(Debug, thiserror::Error)]
pub enum SampleSheetError {
    #[error("No data for samples present in sample sheet {path:?}")]
    MissingSampleData { path: PathBuf },

    #[error(
        "{column} '{value}' of sample sheet row {key} is empty after removing every character \
         other than letters, digits, underscores and dashes"
    )]
    EmptyIdentifier {
        column: &'static str,
        value: String,
        key: String,
    },

    #[error("Sample_ID '{sample_id}' is still used by projects {projects} after renaming")]
    UnresolvedCollision { sample_id: String, projects: String },

    #[error("Unknown instrument class '{0}', expected one of: hiseq, nextseq")]
    UnknownInstrument(String),
}

/// The instrument families we know how to report on.
/// `Hiseq` runs are demultiplexed per physical lane, `Nextseq` runs have no
/// per-sample lane separation and are reported as a single lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentClass {
    Hiseq,
    Nextseq,
}

impl InstrumentClass {
    pub fn has_lanes(self) -> bool {
        matches!(self, InstrumentClass::Hiseq)
    }
}

impl Display for InstrumentClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InstrumentClass::Hiseq => "hiseq",
            InstrumentClass::Nextseq => "nextseq",
        })
    }
}

impl FromStr for InstrumentClass {
    type Err = SampleSheetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hiseq" => Ok(InstrumentClass::Hiseq),
            "nextseq" => Ok(InstrumentClass::Nextseq),
            _ => Err(SampleSheetError::UnknownInstrument(s.to_string())),
        }
    }
}

/// A `[Data]` column with a fixed meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Column {
    Lane,
    SampleId,
    SampleName,
    SampleProject,
    Description,
    Index,
    Index2,
}

impl Column {
    pub const ALL: [Column; 7] = [
        Column::Lane,
        Column::SampleId,
        Column::SampleName,
        Column::SampleProject,
        Column::Description,
        Column::Index,
        Column::Index2,
    ];

    /// The spelling written back out to sample sheets.
    pub fn canonical(self) -> &'static str {
        match self {
            Column::Lane => "Lane",
            Column::SampleId => "Sample_ID",
            Column::SampleName => "Sample_Name",
            Column::SampleProject => "Sample_Project",
            Column::Description => "Description",
            Column::Index => "index",
            Column::Index2 => "index2",
        }
    }

    /// Older IEM sheets omit the underscore.
    fn legacy(self) -> &'static str {
        match self {
            Column::Lane => "Lane",
            Column::SampleId => "SampleID",
            Column::SampleName => "SampleName",
            Column::SampleProject => "SampleProject",
            Column::Description => "Description",
            Column::Index => "Index",
            Column::Index2 => "Index2",
        }
    }

    pub fn from_header(name: &str) -> Option<Column> {
        Column::ALL.into_iter().find(|col| {
            name.eq_ignore_ascii_case(col.canonical()) || name.eq_ignore_ascii_case(col.legacy())
        })
    }
}

/// A column of the `[Data]` section, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataColumn {
    Known(Column),
    Other(String),
}

impl DataColumn {
    fn from_header(name: &str) -> Self {
        match Column::from_header(name) {
            Some(col) => DataColumn::Known(col),
            None => DataColumn::Other(name.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DataColumn::Known(col) => col.canonical(),
            DataColumn::Other(name) => name,
        }
    }
}

/// One row of the `[Data]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleRow {
    pub lane: Option<String>,
    pub sample_id: String,
    pub sample_name: String,
    pub sample_project: String,
    pub description: String,
    pub index: String,
    pub index2: String,
    /// Columns we carry through untouched, e.g. `I7_Index_ID`.
    pub extra: BTreeMap<String, String>,
}

impl SampleRow {
    /// `lane:sample_id` when the sheet has lanes, `project:sample_id` otherwise.
    pub fn key(&self) -> String {
        match &self.lane {
            Some(lane) => format!("{lane}:{}", self.sample_id),
            None => format!("{}:{}", self.sample_project, self.sample_id),
        }
    }

    pub fn get(&self, column: &DataColumn) -> Option<&str> {
        match column {
            DataColumn::Known(col) => self.field(*col),
            DataColumn::Other(name) => self.extra.get(name).map(String::as_str),
        }
    }

    fn field(&self, col: Column) -> Option<&str> {
        match col {
            Column::Lane => self.lane.as_deref(),
            Column::SampleId => Some(&self.sample_id),
            Column::SampleName => Some(&self.sample_name),
            Column::SampleProject => Some(&self.sample_project),
            Column::Description => Some(&self.description),
            Column::Index => Some(&self.index),
            Column::Index2 => Some(&self.index2),
        }
    }

    fn set(&mut self, column: &DataColumn, value: String) {
        match column {
            DataColumn::Known(Column::Lane) => self.lane = Some(value),
            DataColumn::Known(Column::SampleId) => self.sample_id = value,
            DataColumn::Known(Column::SampleName) => self.sample_name = value,
            DataColumn::Known(Column::SampleProject) => self.sample_project = value,
            DataColumn::Known(Column::Description) => self.description = value,
            DataColumn::Known(Column::Index) => self.index = value,
            DataColumn::Known(Column::Index2) => self.index2 = value,
            DataColumn::Other(name) => {
                self.extra.insert(name.clone(), value);
            }
        }
    }

    /// The lane number, if the sheet has a `Lane` column and it is numeric.
    pub fn lane_number(&self) -> Option<u32> {
        self.lane.as_deref().and_then(|l| l.trim().parse().ok())
    }
}

/// The `[Data]` section: column order plus rows, keyed by [`SampleRow::key`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataSection {
    columns: Vec<DataColumn>,
    rows: Vec<SampleRow>,
}

impl DataSection {
    pub fn new(columns: Vec<DataColumn>) -> Self {
        DataSection {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[DataColumn] {
        &self.columns
    }

    pub fn has_column(&self, col: Column) -> bool {
        self.columns.contains(&DataColumn::Known(col))
    }

    /// Insert a row. A row with the key and project of an earlier row
    /// replaces it in place. A row that shares only the key is kept next to
    /// the earlier one so that validation can tell them apart.
    pub fn insert(&mut self, row: SampleRow) {
        let key = row.key();
        let same_key = |r: &&mut SampleRow| r.key() == key;
        match self.rows.iter_mut().find(same_key) {
            Some(existing) if existing.sample_project == row.sample_project => {
                warn!("sample sheet row {key} appears twice, keeping the later one");
                *existing = row;
            }
            Some(existing) => {
                warn!(
                    "sample sheet row {key} is used by projects {} and {}",
                    existing.sample_project, row.sample_project
                );
                self.rows.push(row);
            }
            None => self.rows.push(row),
        }
    }

    pub fn rows(&self) -> &[SampleRow] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [SampleRow] {
        &mut self.rows
    }

    pub fn get(&self, key: &str) -> Option<&SampleRow> {
        self.rows.iter().find(|r| r.key() == key)
    }

    /// Rows paired with their keys, in file order.
    pub fn entries(&self) -> impl Iterator<Item = (String, &SampleRow)> + '_ {
        self.rows.iter().map(|r| (r.key(), r))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct lane numbers in order of first appearance.
    pub fn lanes(&self) -> Vec<u32> {
        self.rows
            .iter()
            .filter_map(SampleRow::lane_number)
            .unique()
            .collect()
    }
}

/// Read lengths from the `[Reads]` section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reads {
    pub read1_length: Option<u32>,
    pub read2_length: Option<u32>,
}

impl Reads {
    pub fn is_empty(&self) -> bool {
        self.read1_length.is_none() && self.read2_length.is_none()
    }
}

/// Raw lines surrounding the `[Data]` rows, so a rewritten sheet keeps
/// everything it does not own byte-for-byte.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Layout {
    preamble: Vec<String>,
    trailer: Vec<String>,
    line_ending: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleSheet {
    pub header: BTreeMap<String, String>,
    pub reads: Reads,
    pub settings: BTreeMap<String, String>,
    pub data: DataSection,
    layout: Layout,
    warnings: Vec<String>,
}

/// Values filled into `[Settings]` when the sheet leaves them unset.
pub const SETTINGS_DEFAULTS: [(&str, &str); 4] = [
    ("FindAdaptersWithIndels", "1"),
    ("TrimUMI", "0"),
    ("CreateFastqForIndexReads", "0"),
    ("ReverseComplement", "0"),
];

impl SampleSheet {
    /// Parse the sample sheet at `path`.
    pub fn parse(path: impl AsRef<Path>) -> Result<SampleSheet> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
        SampleSheet::parse_str(&text, path)
    }

    /// Parse sheet contents; `source` is only used in messages.
    pub fn parse_str(text: &str, source: &Path) -> Result<SampleSheet> {
        parse::SheetParser::new(source)
            .run(text)
            .with_context(|| format!("Error parsing sample sheet {}", source.display()))
    }

    /// Problems that did not stop parsing, e.g. an empty `[Header]`.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn instrument(&self) -> InstrumentClass {
        if self.data.has_column(Column::Lane) {
            InstrumentClass::Hiseq
        } else {
            InstrumentClass::Nextseq
        }
    }

    /// Submission tags for this run. Lane-less runs list them in the header
    /// `Description`; laned runs tag each row.
    pub fn submissions(&self) -> Vec<String> {
        match self.instrument() {
            InstrumentClass::Nextseq => self
                .header
                .get("Description")
                .map(|d| {
                    d.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            InstrumentClass::Hiseq => self
                .data
                .rows()
                .iter()
                .map(|r| r.description.as_str())
                .filter(|d| !d.is_empty())
                .sorted()
                .dedup()
                .map(String::from)
                .collect(),
        }
    }
}

/// Find the sample sheet for a run. A single `SampleSheet*.txt` marker selects
/// its `.csv` sibling when that file exists; otherwise `SampleSheet.csv`.
pub fn find_sample_sheet(run_dir: &Path) -> PathBuf {
    let default = run_dir.join(SAMPLE_SHEET_CSV);
    let Some(dir) = run_dir.to_str() else {
        return default;
    };
    let pattern = format!("{}/SampleSheet*txt", glob::Pattern::escape(dir));
    let Ok(paths) = glob::glob(&pattern) else {
        return default;
    };
    let markers: Vec<PathBuf> = paths.filter_map(Result::ok).collect();
    if let [marker] = markers.as_slice() {
        let csv = marker.with_extension("csv");
        if csv.exists() {
            return csv;
        }
    }
    default
}
