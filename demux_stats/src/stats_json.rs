//! Typed view of the `Stats/Stats.json` file written by bcl2fastq.

use crate::StatsError;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Top level of `Stats.json`. Fields bcl2fastq writes that are not needed
/// for the summary are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatsJson {
    /// Run identifier, when present.
    #[serde(default)]
    pub run_id: Option<String>,
    /// One entry per lane.
    pub conversion_results: Vec<ConversionResult>,
    /// Unmatched barcodes per lane.
    #[serde(default)]
    pub unknown_barcodes: Vec<UnknownBarcodes>,
}

/// Conversion results of one lane.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConversionResult {
    /// Lane number, 1-based.
    pub lane_number: u32,
    /// Clusters passing filter.
    #[serde(rename = "TotalClustersPF")]
    pub total_clusters_pf: u64,
    /// Bases in the lane.
    #[serde(rename = "Yield")]
    pub total_yield: u64,
    /// Per-sample results, in sample sheet order.
    #[serde(default)]
    pub demux_results: Vec<DemuxResult>,
    /// Reads that matched no sample.
    #[serde(default)]
    pub undetermined: Option<UndeterminedResult>,
}

/// Demultiplexing results for one sample in one lane.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DemuxResult {
    /// `Sample_ID` from the sample sheet.
    pub sample_id: String,
    /// Reads assigned to the sample.
    pub number_reads: u64,
    /// Index sequences the sample matched.
    #[serde(default)]
    pub index_metrics: Vec<IndexMetric>,
    /// Per-read yields.
    #[serde(default)]
    pub read_metrics: Vec<ReadMetric>,
}

/// The `Undetermined` block of a lane.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UndeterminedResult {
    /// Reads without a matching index.
    pub number_reads: u64,
    /// Per-read yields.
    #[serde(default)]
    pub read_metrics: Vec<ReadMetric>,
}

/// One index sequence of a sample.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IndexMetric {
    /// The sequence, `i7+i5` for dual-indexed samples.
    pub index_sequence: String,
}

/// Yield of one read.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReadMetric {
    /// Read number, 1-based.
    #[serde(default)]
    pub read_number: u32,
    /// Bases.
    #[serde(rename = "Yield")]
    pub total_yield: u64,
    /// Bases with quality of at least 30.
    #[serde(rename = "YieldQ30")]
    pub yield_q30: u64,
}

/// Unmatched barcode counts of one lane.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UnknownBarcodes {
    /// Lane number, when present.
    #[serde(default)]
    pub lane: Option<u32>,
    /// Barcode to read count.
    #[serde(default)]
    pub barcodes: BTreeMap<String, u64>,
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

impl StatsJson {
    /// Read and check a `Stats.json` file.
    pub fn from_path(path: &Path) -> Result<StatsJson> {
        if !path.exists() {
            return Err(StatsError::Missing {
                path: path.to_path_buf(),
            }
            .into());
        }
        let text = std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
        if text.trim().is_empty() {
            return Err(StatsError::Empty {
                path: path.to_path_buf(),
            }
            .into());
        }
        let value: Value = serde_json::from_str(&text)
            .with_context(|| format!("Error parsing stats file {}", path.display()))?;
        if is_empty(&value) {
            return Err(StatsError::Empty {
                path: path.to_path_buf(),
            }
            .into());
        }
        serde_json::from_value(value)
            .with_context(|| format!("Unexpected layout of stats file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_load_hiseq_stats() -> Result<()> {
        let stats = StatsJson::from_path(Path::new("test/hiseq_stats.json"))?;
        assert_eq!(stats.run_id.as_deref(), Some("171101_D00365_1013_AHYYTWBCXY"));
        assert_eq!(stats.conversion_results.len(), 2);
        let lane1 = &stats.conversion_results[0];
        assert_eq!(lane1.total_clusters_pf, 5_000_000);
        assert_eq!(lane1.demux_results[0].index_metrics[0].index_sequence, "GTTTCGCT");
        assert_eq!(lane1.demux_results[0].read_metrics[1].yield_q30, 360);
        assert!(lane1.undetermined.is_some());
        assert!(stats.conversion_results[1].undetermined.is_none());
        assert_eq!(stats.unknown_barcodes[1].lane, Some(2));
        Ok(())
    }

    #[test]
    fn test_empty_and_missing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let blank = dir.path().join("Stats.json");
        std::fs::write(&blank, "  \n")?;

        for (path, empty) in [
            (Path::new("test/empty_stats.json"), true),
            (blank.as_path(), true),
            (Path::new("test/no_such_stats.json"), false),
        ] {
            let err = StatsJson::from_path(path).unwrap_err();
            match err.downcast_ref::<StatsError>() {
                Some(StatsError::Empty { .. }) => assert!(empty),
                Some(StatsError::Missing { .. }) => assert!(!empty),
                None => panic!("unexpected error {err:#}"),
            }
        }
        Ok(())
    }

    #[test]
    fn test_malformed_stats() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("Stats.json");
        std::fs::write(&path, r#"{"ConversionResults": [{"LaneNumber": "one"}]}"#)?;
        assert!(StatsJson::from_path(&path).is_err());
        std::fs::write(&path, "{not json")?;
        assert!(StatsJson::from_path(&path).is_err());
        Ok(())
    }
}
