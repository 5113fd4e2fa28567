//! Aggregation of bcl2fastq `Stats.json` into a per-lane, per-sample summary.
#![deny(missing_docs)]

mod stats_json;
mod summary;

pub use stats_json::{
    ConversionResult, DemuxResult, IndexMetric, ReadMetric, StatsJson, UndeterminedResult,
    UnknownBarcodes,
};
pub use summary::{
    fold_lanes, lane_stats, q30_percent, stats_path, summarize, top_undetermined, LaneStats,
    LaneSummaryRow, LaneTable, SampleRow, SampleStats, StatsSummary, UndeterminedBarcode,
    MIN_UNDETERMINED_COUNT, UNDETERMINED,
};

use std::path::PathBuf;

/// Problems with the stats file that make a summary impossible.
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    /// bcl2fastq did not write a stats file.
    #[error("Stats path does not exist: {path:?}")]
    Missing {
        /// Expected location.
        path: PathBuf,
    },

    /// The stats file holds no data.
    #[error("Stats file empty: {path:?}")]
    Empty {
        /// Location of the empty file.
        path: PathBuf,
    },
}
