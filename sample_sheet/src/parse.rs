//! Line-oriented state machine over the sectioned sample sheet CSV.

use crate::{
    Column, DataColumn, DataSection, Layout, Reads, SampleRow, SampleSheet, SampleSheetError,
    SETTINGS_DEFAULTS,
};
use anyhow::{bail, Context, Result};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before the first section, or inside a section we don't read.
    None,
    Header,
    Reads,
    Settings,
    Data,
}

impl State {
    fn from_section(name: &str) -> State {
        match name {
            "Header" => State::Header,
            "Reads" => State::Reads,
            "Settings" => State::Settings,
            "Data" => State::Data,
            _ => State::None,
        }
    }
}

pub(crate) struct SheetParser<'a> {
    source: &'a Path,
    state: State,
    header: BTreeMap<String, String>,
    reads: Reads,
    settings: BTreeMap<String, String>,
    data: Option<DataSection>,
    layout: Layout,
    /// Set once a section opens after the `[Data]` rows.
    past_data: bool,
}

/// Split one line into trimmed fields, honouring CSV quoting.
fn split_fields(line: &str) -> Result<Vec<String>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    let mut record = csv::StringRecord::new();
    if rdr.read_record(&mut record)? {
        Ok(record.iter().map(|f| f.trim().to_string()).collect())
    } else {
        Ok(Vec::new())
    }
}

impl<'a> SheetParser<'a> {
    pub(crate) fn new(source: &'a Path) -> Self {
        SheetParser {
            source,
            state: State::None,
            header: BTreeMap::new(),
            reads: Reads::default(),
            settings: BTreeMap::new(),
            data: None,
            layout: Layout::default(),
            past_data: false,
        }
    }

    pub(crate) fn run(mut self, text: &str) -> Result<SampleSheet> {
        self.layout.line_ending = if text.contains("\r\n") { "\r\n" } else { "\n" };
        for (i, line) in text.lines().enumerate() {
            self.line(line)
                .with_context(|| format!("line {}: '{line}'", i + 1))?;
        }
        self.finish()
    }

    fn line(&mut self, raw: &str) -> Result<()> {
        let fields = split_fields(raw)?;
        let first = fields.first().map(String::as_str).unwrap_or("");

        if raw.trim_start().starts_with('[') {
            let name = first.trim_start_matches('[').trim_end_matches(']').trim();
            let next = State::from_section(name);
            if next == State::None {
                debug!("ignoring section [{name}] in {}", self.source.display());
            }
            if self.data.is_some() {
                self.past_data = true;
            }
            self.state = next;
            self.keep_raw(raw);
            return Ok(());
        }

        if first.is_empty() {
            if self.data.is_none() || self.past_data {
                self.keep_raw(raw);
            }
            return Ok(());
        }

        match self.state {
            State::None => self.keep_raw(raw),
            State::Header => {
                self.header.insert(first.to_string(), value_of(&fields));
                self.keep_raw(raw);
            }
            State::Settings => {
                self.settings.insert(first.to_string(), value_of(&fields));
                self.keep_raw(raw);
            }
            State::Reads => {
                self.read_length(first)?;
                self.keep_raw(raw);
            }
            State::Data => self.data_line(raw, &fields),
        }
        Ok(())
    }

    fn keep_raw(&mut self, raw: &str) {
        if self.past_data {
            self.layout.trailer.push(raw.to_string());
        } else if self.data.is_none() {
            self.layout.preamble.push(raw.to_string());
        }
    }

    fn read_length(&mut self, value: &str) -> Result<()> {
        let len: u32 = value
            .parse()
            .with_context(|| format!("invalid read length '{value}' in [Reads]"))?;
        if self.reads.read1_length.is_none() {
            self.reads.read1_length = Some(len);
        } else if self.reads.read2_length.is_none() {
            self.reads.read2_length = Some(len);
        } else {
            debug!("ignoring extra [Reads] entry {len}");
        }
        Ok(())
    }

    fn data_line(&mut self, raw: &str, fields: &[String]) {
        if let Some(data) = &mut self.data {
            let mut row = SampleRow::default();
            for (col, value) in data.columns.iter().zip(fields) {
                row.set(col, value.clone());
            }
            data.insert(row);
            return;
        }

        // the first line naming the sample id column fixes the column order
        let is_header = fields
            .iter()
            .any(|f| Column::from_header(f) == Some(Column::SampleId));
        if is_header {
            let columns = fields
                .iter()
                .filter(|f| !f.is_empty())
                .map(|f| DataColumn::from_header(f))
                .collect();
            self.data = Some(DataSection::new(columns));
        } else {
            self.keep_raw(raw);
        }
    }

    fn finish(mut self) -> Result<SampleSheet> {
        let data = match self.data.take() {
            Some(data) if !data.is_empty() => data,
            _ => bail!(SampleSheetError::MissingSampleData {
                path: self.source.to_path_buf(),
            }),
        };

        let mut warnings = Vec::new();
        if self.header.is_empty() {
            warnings.push("No header information in sample sheet".to_string());
        }
        if self.settings.is_empty() {
            warnings.push("No settings information provided in sample sheet".to_string());
        }
        if self.reads.is_empty() {
            warnings.push("No read information provided in sample sheet".to_string());
        }
        for w in &warnings {
            warn!("{}: {w}", self.source.display());
        }

        for (key, value) in SETTINGS_DEFAULTS {
            self.settings
                .entry(key.to_string())
                .or_insert_with(|| value.to_string());
        }

        Ok(SampleSheet {
            header: self.header,
            reads: self.reads,
            settings: self.settings,
            data,
            layout: self.layout,
            warnings,
        })
    }
}

fn value_of(fields: &[String]) -> String {
    fields.get(1).cloned().unwrap_or_default()
}
