//! Per-lane and per-sample aggregation of `Stats.json`.

use crate::stats_json::{ConversionResult, ReadMetric, StatsJson, UnknownBarcodes};
use anyhow::Result;
use itertools::Itertools;
use log::info;
use sample_sheet::InstrumentClass;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thousands::Separable;

/// Unknown barcodes with at most this many reads are left out of the summary.
pub const MIN_UNDETERMINED_COUNT: u64 = 1_000_000;

/// Name and index label of the pseudo-sample holding a lane's undetermined reads.
pub const UNDETERMINED: &str = "undetermined";

/// Location of the stats file inside a bcl2fastq output directory.
pub fn stats_path(output_dir: &Path) -> PathBuf {
    output_dir.join("Stats").join("Stats.json")
}

/// `100 * q30 / total`, or 0 when nothing was sequenced.
pub fn q30_percent(yields: &[u64], yields_q30: &[u64]) -> f64 {
    let total: u64 = yields.iter().sum();
    if total == 0 {
        return 0.0;
    }
    100.0 * yields_q30.iter().sum::<u64>() as f64 / total as f64
}

fn format_percent(pct: f64) -> String {
    format!("{pct:.2}")
}

/// Raw counts for one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleStats {
    /// Sample id, or [`UNDETERMINED`].
    pub sample: String,
    /// Index sequences.
    pub index: Vec<String>,
    /// Reads.
    pub reads: u64,
    /// Yield of each read, in order of appearance.
    pub yields: Vec<u64>,
    /// Q30 yield of each read, parallel to `yields`.
    pub yields_q30: Vec<u64>,
}

impl SampleStats {
    fn new(sample: &str, index: Vec<String>) -> Self {
        SampleStats {
            sample: sample.to_string(),
            index,
            reads: 0,
            yields: Vec::new(),
            yields_q30: Vec::new(),
        }
    }

    fn add_metrics(&mut self, metrics: &[ReadMetric]) {
        for m in metrics {
            self.yields.push(m.total_yield);
            self.yields_q30.push(m.yield_q30);
        }
    }

    /// Percentage of bases at or above Q30.
    pub fn q30(&self) -> f64 {
        q30_percent(&self.yields, &self.yields_q30)
    }
}

/// Raw counts for one lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneStats {
    /// Lane number.
    pub lane: u32,
    /// Clusters passing filter.
    pub clusters_pf: u64,
    /// Bases in the lane.
    pub total_yield: u64,
    /// Demultiplexed samples, not counting undetermined reads.
    pub sample_count: usize,
    /// Samples in order of first appearance.
    pub samples: Vec<SampleStats>,
}

impl LaneStats {
    fn sample_mut(
        &mut self,
        sample: &str,
        index: impl FnOnce() -> Vec<String>,
    ) -> &mut SampleStats {
        let pos = match self.samples.iter().position(|s| s.sample == sample) {
            Some(pos) => pos,
            None => {
                self.samples.push(SampleStats::new(sample, index()));
                self.samples.len() - 1
            }
        };
        &mut self.samples[pos]
    }

    fn from_conversion(result: &ConversionResult) -> Self {
        let mut lane = LaneStats {
            lane: result.lane_number,
            clusters_pf: result.total_clusters_pf,
            total_yield: result.total_yield,
            sample_count: result.demux_results.len(),
            samples: Vec::new(),
        };
        for demux in &result.demux_results {
            let index = || {
                if demux.index_metrics.is_empty() {
                    vec![UNDETERMINED.to_string()]
                } else {
                    demux
                        .index_metrics
                        .iter()
                        .map(|i| i.index_sequence.clone())
                        .collect()
                }
            };
            // a sample listed twice keeps the later read count and both sets of yields
            let sample = lane.sample_mut(&demux.sample_id, index);
            sample.reads = demux.number_reads;
            sample.add_metrics(&demux.read_metrics);
        }
        if let Some(undetermined) = &result.undetermined {
            let sample = lane.sample_mut(UNDETERMINED, || vec![UNDETERMINED.to_string()]);
            sample.reads = undetermined.number_reads;
            sample.add_metrics(&undetermined.read_metrics);
        }
        lane
    }

    /// Reads over all samples, undetermined included.
    pub fn reads(&self) -> u64 {
        self.samples.iter().map(|s| s.reads).sum()
    }

    /// Percentage of bases at or above Q30 over all samples.
    pub fn q30(&self) -> f64 {
        let yields = self.samples.iter().flat_map(|s| s.yields.iter().copied()).collect_vec();
        let q30 = self.samples.iter().flat_map(|s| s.yields_q30.iter().copied()).collect_vec();
        q30_percent(&yields, &q30)
    }
}

/// Extract per-lane counts, in file order.
pub fn lane_stats(stats: &StatsJson) -> Vec<LaneStats> {
    stats
        .conversion_results
        .iter()
        .map(LaneStats::from_conversion)
        .collect()
}

/// Fold every lane into a single lane `1`, summing reads and concatenating
/// yields of samples with the same id.
pub fn fold_lanes(lanes: &[LaneStats]) -> LaneStats {
    let mut folded = LaneStats {
        lane: 1,
        clusters_pf: lanes.iter().map(|l| l.clusters_pf).sum(),
        total_yield: lanes.iter().map(|l| l.total_yield).sum(),
        sample_count: lanes.first().map_or(0, |l| l.sample_count),
        samples: Vec::new(),
    };
    for sample in lanes.iter().flat_map(|l| &l.samples) {
        let agg = folded.sample_mut(&sample.sample, || sample.index.clone());
        agg.reads += sample.reads;
        agg.yields.extend(&sample.yields);
        agg.yields_q30.extend(&sample.yields_q30);
    }
    folded
}

/// One row of a formatted lane table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRow {
    /// Sample id.
    pub sample: String,
    /// Index sequences joined with `, `.
    pub index: String,
    /// Reads with thousands separators.
    pub reads: String,
    /// Percentage of bases at or above Q30, two decimals.
    pub q30: String,
}

/// A formatted lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneTable {
    /// Lane number.
    pub lane: u32,
    /// Demultiplexed samples.
    pub sample_count: usize,
    /// Clusters passing filter.
    pub clusters_pf: String,
    /// Bases.
    pub total_yield: String,
    /// Reads over all samples.
    pub reads: String,
    /// Percentage of bases at or above Q30 over all samples.
    pub q30: String,
    /// One row per sample.
    pub samples: Vec<SampleRow>,
}

impl From<&LaneStats> for LaneTable {
    fn from(lane: &LaneStats) -> Self {
        LaneTable {
            lane: lane.lane,
            sample_count: lane.sample_count,
            clusters_pf: lane.clusters_pf.separate_with_commas(),
            total_yield: lane.total_yield.separate_with_commas(),
            reads: lane.reads().separate_with_commas(),
            q30: format_percent(lane.q30()),
            samples: lane
                .samples
                .iter()
                .map(|s| SampleRow {
                    sample: s.sample.clone(),
                    index: s.index.join(", "),
                    reads: s.reads.separate_with_commas(),
                    q30: format_percent(s.q30()),
                })
                .collect(),
        }
    }
}

/// Per-lane totals of a lane-less run, taken before the lanes are folded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneSummaryRow {
    /// Lane number.
    pub lane: u32,
    /// Reads with thousands separators.
    pub reads: String,
    /// Percentage of bases at or above Q30, two decimals.
    pub q30: String,
}

/// An unknown barcode seen often enough to be worth reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndeterminedBarcode {
    /// Lane the barcode was counted in.
    pub lane: Option<u32>,
    /// Barcode sequence.
    pub barcode: String,
    /// Read count.
    pub count: u64,
    /// Read count with thousands separators.
    pub reads: String,
}

/// Barcodes with more than [`MIN_UNDETERMINED_COUNT`] reads, most frequent first.
pub fn top_undetermined(unknown: &[UnknownBarcodes]) -> Vec<UndeterminedBarcode> {
    unknown
        .iter()
        .flat_map(|lane| {
            lane.barcodes
                .iter()
                .filter(|(_, count)| **count > MIN_UNDETERMINED_COUNT)
                .map(move |(barcode, &count)| UndeterminedBarcode {
                    lane: lane.lane,
                    barcode: barcode.clone(),
                    count,
                    reads: count.separate_with_commas(),
                })
        })
        .sorted_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.lane.cmp(&b.lane))
                .then_with(|| a.barcode.cmp(&b.barcode))
        })
        .collect()
}

/// Everything reported about a finished bcl2fastq job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSummary {
    /// Instrument class the stats were aggregated for.
    pub instrument: InstrumentClass,
    /// The `Stats.json` that was read.
    pub stats_file: PathBuf,
    /// The sample sheet bcl2fastq ran with.
    pub sample_sheet_file: PathBuf,
    /// Contents of the sample sheet, empty when it could not be read.
    pub sample_sheet: String,
    /// Per-lane totals, only for lane-less instruments.
    pub lane_sum: Vec<LaneSummaryRow>,
    /// Lane tables; a lane-less run has a single lane `1`.
    pub lanes: Vec<LaneTable>,
    /// Frequent unknown barcodes.
    pub undetermined: Vec<UndeterminedBarcode>,
    /// Submission tags of the run.
    #[serde(default)]
    pub submissions: Vec<String>,
}

/// Summarize a `Stats.json` file.
pub fn summarize(
    stats_file: &Path,
    instrument: InstrumentClass,
    sample_sheet_file: &Path,
) -> Result<StatsSummary> {
    let stats = StatsJson::from_path(stats_file)?;
    let lanes = lane_stats(&stats);

    let (lane_sum, lanes) = if instrument.has_lanes() {
        (Vec::new(), lanes)
    } else {
        let lane_sum = lanes
            .iter()
            .map(|l| LaneSummaryRow {
                lane: l.lane,
                reads: l.reads().separate_with_commas(),
                q30: format_percent(l.q30()),
            })
            .collect();
        (lane_sum, vec![fold_lanes(&lanes)])
    };

    // the sheet is a convenience for readers, a missing one is not an error
    let sample_sheet = std::fs::read_to_string(sample_sheet_file).unwrap_or_default();

    let summary = StatsSummary {
        instrument,
        stats_file: stats_file.to_path_buf(),
        sample_sheet_file: sample_sheet_file.to_path_buf(),
        sample_sheet,
        lane_sum,
        lanes: lanes.iter().map(LaneTable::from).collect(),
        undetermined: top_undetermined(&stats.unknown_barcodes),
        submissions: Vec::new(),
    };
    info!(
        "summarized {}: {} lane(s), {} frequent unknown barcode(s)",
        stats_file.display(),
        summary.lanes.len(),
        summary.undetermined.len()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row<'a>(table: &'a LaneTable, sample: &str) -> &'a SampleRow {
        table.samples.iter().find(|s| s.sample == sample).unwrap()
    }

    #[test]
    fn test_q30_percent() {
        assert_eq!(format_percent(q30_percent(&[600, 400], &[540, 360])), "90.00");
        assert_eq!(q30_percent(&[], &[]), 0.0);
        assert_eq!(q30_percent(&[0, 0], &[0, 0]), 0.0);
    }

    #[test]
    fn test_summarize_hiseq() -> Result<()> {
        let summary = summarize(
            Path::new("test/hiseq_stats.json"),
            InstrumentClass::Hiseq,
            Path::new("../sample_sheet/test/hiseq_lanes.csv"),
        )?;
        assert!(summary.lane_sum.is_empty());
        assert_eq!(summary.lanes.len(), 2);
        assert!(summary.sample_sheet.starts_with("[Header]"));

        let lane1 = &summary.lanes[0];
        assert_eq!(lane1.lane, 1);
        assert_eq!(lane1.sample_count, 2);
        assert_eq!(lane1.clusters_pf, "5,000,000");
        assert_eq!(lane1.reads, "5,000,000");
        assert_eq!(lane1.q30, "80.00");
        assert_eq!(
            row(lane1, "MDT1_SI_GA_A11_1"),
            &SampleRow {
                sample: "MDT1_SI_GA_A11_1".to_string(),
                index: "GTTTCGCT".to_string(),
                reads: "3,000,000".to_string(),
                q30: "90.00".to_string(),
            }
        );
        // zero yield reports 0 rather than NaN
        let undetermined = row(lane1, UNDETERMINED);
        assert_eq!(undetermined.index, UNDETERMINED);
        assert_eq!(undetermined.q30, "0.00");

        let lane2 = &summary.lanes[1];
        assert_eq!(row(lane2, "MDT1_SI_GA_A11_1").q30, "50.00");
        assert_eq!(lane2.samples.len(), 1);
        Ok(())
    }

    #[test]
    fn test_undetermined_threshold() -> Result<()> {
        let stats = StatsJson::from_path(Path::new("test/hiseq_stats.json"))?;
        let barcodes = top_undetermined(&stats.unknown_barcodes);
        let got: Vec<(&str, Option<u32>, &str)> = barcodes
            .iter()
            .map(|b| (b.barcode.as_str(), b.lane, b.reads.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![
                ("GGGGGGGG", Some(1), "2,500,000"),
                ("TTTTTTTT", Some(2), "1,200,000"),
                ("AAAAAAAA", Some(1), "1,000,001"),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_repeated_sample_in_lane() -> Result<()> {
        let stats: StatsJson = serde_json::from_str(
            r#"{"ConversionResults": [{"LaneNumber": 1, "TotalClustersPF": 10, "Yield": 10,
                "DemuxResults": [
                  {"SampleId": "s", "NumberReads": 4, "ReadMetrics": [{"Yield": 10, "YieldQ30": 10}]},
                  {"SampleId": "s", "NumberReads": 6, "ReadMetrics": [{"Yield": 10, "YieldQ30": 0}]}
                ]}]}"#,
        )?;
        let lanes = lane_stats(&stats);
        let s = &lanes[0].samples[0];
        assert_eq!(lanes[0].samples.len(), 1);
        assert_eq!(s.reads, 6);
        assert_eq!(s.yields, vec![10, 10]);
        assert_eq!(s.index, vec![UNDETERMINED.to_string()]);
        assert_eq!(format_percent(s.q30()), "50.00");
        Ok(())
    }

    #[test]
    fn test_summarize_nextseq_folds_lanes() -> Result<()> {
        let summary = summarize(
            Path::new("test/nextseq_stats.json"),
            InstrumentClass::Nextseq,
            Path::new("test/no_such_sheet.csv"),
        )?;
        assert_eq!(summary.sample_sheet, "");
        assert_eq!(
            summary.lane_sum,
            vec![
                LaneSummaryRow {
                    lane: 1,
                    reads: "300".to_string(),
                    q30: format_percent(100.0 * 39500.0 / 45000.0),
                },
                LaneSummaryRow {
                    lane: 2,
                    reads: "330".to_string(),
                    q30: format_percent(100.0 * 43000.0 / 49500.0),
                },
            ]
        );

        assert_eq!(summary.lanes.len(), 1);
        let lane = &summary.lanes[0];
        assert_eq!(lane.lane, 1);
        assert_eq!(lane.reads, "630");
        let names: Vec<&str> = lane.samples.iter().map(|s| s.sample.as_str()).collect();
        assert_eq!(names, vec!["lib_a", "lib_c", UNDETERMINED]);
        assert_eq!(row(lane, "lib_a").reads, "250");
        assert_eq!(row(lane, "lib_a").q30, "89.33");
        assert_eq!(row(lane, "lib_a").index, "TAAGGCGA+CTCTCTAT");
        assert_eq!(row(lane, "lib_c").reads, "340");
        assert_eq!(row(lane, "lib_c").q30, "92.16");
        assert_eq!(row(lane, UNDETERMINED).reads, "40");
        assert!(summary.undetermined.is_empty());
        Ok(())
    }

    #[test]
    fn test_stats_path() {
        assert_eq!(
            stats_path(Path::new("/out/run")),
            PathBuf::from("/out/run/Stats/Stats.json")
        );
    }
}
