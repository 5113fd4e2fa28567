//! Writing sample sheets back out: full rewrites after validation and
//! per-job sheets holding a subset of the rows.

use crate::{SampleRow, SampleSheet};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

impl SampleSheet {
    /// Render the sheet. Lines outside the `[Data]` rows are reproduced as read.
    pub fn render(&self) -> Result<String> {
        self.render_rows(self.data.rows())
    }

    fn render_rows<'a>(&self, rows: impl IntoIterator<Item = &'a SampleRow>) -> Result<String> {
        let eol = self.layout.line_ending;
        let mut out = String::new();
        for line in &self.layout.preamble {
            out.push_str(line);
            out.push_str(eol);
        }

        let terminator = if eol == "\r\n" {
            csv::Terminator::CRLF
        } else {
            csv::Terminator::Any(b'\n')
        };
        let mut wtr = csv::WriterBuilder::new()
            .terminator(terminator)
            .from_writer(Vec::new());
        let columns = self.data.columns();
        wtr.write_record(columns.iter().map(|c| c.name()))?;
        for row in rows {
            wtr.write_record(columns.iter().map(|c| row.get(c).unwrap_or("")))?;
        }
        let data = wtr.into_inner().context("flushing [Data] rows")?;
        out.push_str(std::str::from_utf8(&data)?);

        for line in &self.layout.trailer {
            out.push_str(line);
            out.push_str(eol);
        }
        Ok(out)
    }

    /// Write the whole sheet to `path`.
    pub fn write(&self, path: &Path) -> Result<()> {
        let text = self.render()?;
        std::fs::write(path, text).with_context(|| path.display().to_string())
    }

    /// Write a sheet identical to this one except that `[Data]` holds only `rows`.
    pub fn write_subset(&self, rows: &[SampleRow], path: &Path) -> Result<()> {
        let text = self.render_rows(rows)?;
        std::fs::write(path, text).with_context(|| path.display().to_string())
    }
}

/// `SampleSheet.csv` + `y26,i8,y134` → `SampleSheet_y26_i8_y134.csv`.
pub fn derived_sheet_path(sheet: &Path, suffix: &str) -> PathBuf {
    let stem = sheet
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match sheet.extension() {
        Some(ext) => format!("{stem}_{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{suffix}"),
    };
    sheet.with_file_name(name)
}
