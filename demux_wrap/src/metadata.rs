//! Run metadata records for the sequencing database.
//!
//! Records are posted in dependency order: the run, its reads and lanes, then
//! samples, which refer to their lane by the id the sink handed back.

use anyhow::{Context, Result};
use basemask::RunInfo;
use sample_sheet::SampleSheet;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum Record {
    Run {
        run_id: String,
        flowcell: String,
        instrument: String,
    },
    Read {
        run: u64,
        number: u32,
        cycles: u32,
        indexed: bool,
    },
    Lane {
        run: u64,
        number: u32,
    },
    Sample {
        lane: u64,
        name: String,
        description: String,
        index1: String,
        index2: String,
    },
}

/// Accepts records and returns the id assigned to each.
pub trait MetadataSink {
    fn post(&mut self, record: &Record) -> Result<u64>;
}

/// Post the run, its reads, lanes and samples. Returns the run id.
pub fn load_run(sink: &mut dyn MetadataSink, run_info: &RunInfo, sheet: &SampleSheet) -> Result<u64> {
    let run = sink
        .post(&Record::Run {
            run_id: run_info.run_id.clone(),
            flowcell: run_info.flowcell.clone(),
            instrument: run_info.instrument.clone(),
        })
        .with_context(|| format!("posting run {}", run_info.run_id))?;

    for read in &run_info.reads {
        sink.post(&Record::Read {
            run,
            number: read.number,
            cycles: read.cycles,
            indexed: read.is_index,
        })?;
    }

    let lane_numbers = if sheet.instrument().has_lanes() {
        sheet.data.lanes()
    } else {
        vec![1]
    };
    let mut lane_ids = HashMap::new();
    for number in lane_numbers {
        let id = sink.post(&Record::Lane { run, number })?;
        lane_ids.insert(number, id);
    }

    for row in sheet.data.rows() {
        let number = row.lane_number().unwrap_or(1);
        let lane = *lane_ids
            .get(&number)
            .with_context(|| format!("sample {} refers to unknown lane {number}", row.sample_id))?;
        sink.post(&Record::Sample {
            lane,
            name: row.sample_name.clone(),
            description: row.description.clone(),
            index1: row.index.clone(),
            index2: row.index2.clone(),
        })?;
    }
    Ok(run)
}
