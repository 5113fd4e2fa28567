//! Group samples into bcl2fastq jobs by base mask.
//!
//! bcl2fastq takes one `--use-bases-mask` per lane, so samples whose index
//! lengths differ cannot share a job. Each distinct mask signature becomes one
//! [`JobSpec`] holding the lanes and samples that use it.

use crate::run_info::{ReadInfo, RunInfo};
use anyhow::{ensure, Result};
use itertools::Itertools;
use log::{info, warn};
use sample_sheet::{InstrumentClass, SampleRow, SampleSheet};
use std::collections::BTreeMap;

/// Mask of a single read for one sample.
fn read_mask(read: &ReadInfo, index: Option<&str>) -> Result<String> {
    if !read.is_index {
        return Ok(format!("y{}", read.cycles));
    }
    let len = index.map_or(0, |i| i.trim().len() as u32);
    ensure!(
        len <= read.cycles,
        "index {} is longer than index read {} ({} cycles)",
        index.unwrap_or_default(),
        read.number,
        read.cycles
    );
    Ok(match len {
        0 => format!("n{}", read.cycles),
        len if len == read.cycles => format!("i{len}"),
        len => format!("i{len}n{}", read.cycles - len),
    })
}

/// The mask signature of one sample, e.g. `y26,i8,y134`. The first index
/// read is matched against `index`, the second against `index2`.
pub fn sample_mask(row: &SampleRow, run_info: &RunInfo) -> Result<String> {
    let mut indexes = [row.index.as_str(), row.index2.as_str()].into_iter();
    let masks = run_info
        .reads
        .iter()
        .map(|read| {
            let index = if read.is_index { indexes.next() } else { None };
            read_mask(read, index)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(masks.join(","))
}

/// One bcl2fastq invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub signature: String,
    /// `--use-bases-mask` values in lane order.
    pub masks: Vec<String>,
    pub samples: Vec<SampleRow>,
}

impl JobSpec {
    /// Directory and sample sheet suffix used when a run needs several jobs.
    pub fn output_suffix(&self) -> String {
        self.signature.replace(',', "_")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPlan {
    pub instrument: InstrumentClass,
    /// Ordered by signature.
    pub jobs: Vec<JobSpec>,
}

impl JobPlan {
    /// Whether each job needs its own sample sheet and output directory.
    pub fn is_split(&self) -> bool {
        self.jobs.len() > 1
    }
}

#[derive(Default)]
struct Group {
    lanes: Vec<u32>,
    samples: Vec<SampleRow>,
}

/// Partition the `[Data]` rows of a validated sheet into jobs.
pub fn partition(sheet: &SampleSheet, run_info: &RunInfo) -> Result<JobPlan> {
    let instrument = sheet.instrument();
    let mut groups: BTreeMap<String, Group> = BTreeMap::new();

    for row in sheet.data.rows() {
        let signature = sample_mask(row, run_info)?;
        let group = groups.entry(signature).or_default();
        if instrument.has_lanes() {
            let lane = row.lane_number();
            ensure!(
                lane.is_some(),
                "sample {} has a non-numeric lane '{}'",
                row.sample_id,
                row.lane.as_deref().unwrap_or_default()
            );
            if let (Some(lane), Some(count)) = (lane, run_info.lane_count) {
                if lane > count {
                    warn!(
                        "sample {} is in lane {lane} but {} has {count} lanes",
                        row.sample_id, run_info.run_id
                    );
                }
            }
            group.lanes.extend(lane);
        }
        group.samples.push(row.clone());
    }

    let jobs: Vec<JobSpec> = groups
        .into_iter()
        .map(|(signature, group)| {
            let masks = if instrument.has_lanes() {
                group
                    .lanes
                    .iter()
                    .sorted()
                    .dedup()
                    .map(|lane| format!("{lane}:{signature}"))
                    .collect()
            } else {
                vec![signature.clone()]
            };
            JobSpec {
                signature,
                masks,
                samples: group.samples,
            }
        })
        .collect();

    if jobs.len() > 1 {
        info!(
            "{} contains samples with different masks and will require {} bcl2fastq jobs",
            run_info.run_id,
            jobs.len()
        );
    }
    Ok(JobPlan { instrument, jobs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn sheet(data: &str) -> SampleSheet {
        SampleSheet::parse_str(&format!("[Data]\n{data}"), Path::new("partition::tests")).unwrap()
    }

    fn hiseq_run() -> RunInfo {
        RunInfo::from_path("test/RunInfo_hiseq.xml").unwrap()
    }

    #[test]
    fn test_single_mask_over_two_lanes() {
        let sheet = sheet(
            "Lane,Sample_ID,index,Sample_Project\n\
             1,MDT1_SI_GA_A11_1,GTTTCGCT,bambahmukku\n\
             1,MDT1_SI_GA_A11_2,ACGACTAC,bambahmukku\n\
             2,MDT1_SI_GA_A11_1,GTTTCGCT,bambahmukku\n\
             2,MDT1_SI_GA_A11_2,ACGACTAC,bambahmukku\n",
        );
        let plan = partition(&sheet, &hiseq_run()).unwrap();
        assert_eq!(plan.instrument, InstrumentClass::Hiseq);
        assert!(!plan.is_split());
        let masks: BTreeMap<_, _> = plan
            .jobs
            .iter()
            .map(|j| (j.signature.as_str(), j.masks.clone()))
            .collect();
        assert_eq!(
            masks,
            BTreeMap::from([(
                "y26,i8,y134",
                vec!["1:y26,i8,y134".to_string(), "2:y26,i8,y134".to_string()]
            )])
        );
        assert_eq!(plan.jobs[0].samples.len(), 4);
    }

    #[test]
    fn test_mixed_index_lengths_split() {
        let sheet = sheet(
            "Lane,Sample_ID,index,Sample_Project\n\
             2,short,ACGTAC,p\n\
             1,long,ACGTACGT,p\n",
        );
        let plan = partition(&sheet, &hiseq_run()).unwrap();
        assert!(plan.is_split());
        let jobs: Vec<(&str, Vec<String>, String)> = plan
            .jobs
            .iter()
            .map(|j| (j.signature.as_str(), j.masks.clone(), j.output_suffix()))
            .collect();
        assert_eq!(
            jobs,
            vec![
                (
                    "y26,i6n2,y134",
                    vec!["2:y26,i6n2,y134".to_string()],
                    "y26_i6n2_y134".to_string()
                ),
                (
                    "y26,i8,y134",
                    vec!["1:y26,i8,y134".to_string()],
                    "y26_i8_y134".to_string()
                ),
            ]
        );
        assert_eq!(plan.jobs[0].samples[0].sample_id, "short");
    }

    #[test]
    fn test_lane_less_dual_index() {
        let run = RunInfo::from_path("test/RunInfo_nextseq.xml").unwrap();
        let sheet = sheet(
            "Sample_ID,index,index2,Sample_Project\n\
             lib_a,TAAGGCGA,CTCTCTAT,smith\n\
             lib_b,CGTACTAG,CTCTCTAT,smith\n\
             lib_c,AGGCAGAA,,jones\n",
        );
        let plan = partition(&sheet, &run).unwrap();
        assert_eq!(plan.instrument, InstrumentClass::Nextseq);
        let masks: Vec<_> = plan.jobs.iter().map(|j| j.masks.clone()).collect();
        assert_eq!(
            masks,
            vec![vec!["y75,i8,i8,y75".to_string()], vec!["y75,i8,n8,y75".to_string()]]
        );
        assert_eq!(plan.jobs[0].samples.len(), 2);
    }

    #[test]
    fn test_no_index_masks_whole_read() {
        let row = SampleRow {
            sample_id: "x".to_string(),
            ..Default::default()
        };
        assert_eq!(sample_mask(&row, &hiseq_run()).unwrap(), "y26,n8,y134");
    }

    #[test]
    fn test_index_longer_than_read_fails() {
        let row = SampleRow {
            sample_id: "x".to_string(),
            index: "ACGTACGTAC".to_string(),
            ..Default::default()
        };
        assert!(sample_mask(&row, &hiseq_run()).is_err());
    }
}
