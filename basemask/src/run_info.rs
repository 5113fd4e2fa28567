//! The subset of `RunInfo.xml` needed to derive base masks.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

pub const RUN_INFO_XML: &str = "RunInfo.xml";

#[derive(Debug, Deserialize)]
struct RunInfoXml {
    #[serde(rename = "Run")]
    run: RunXml,
}

#[derive(Debug, Deserialize)]
struct RunXml {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Flowcell", default)]
    flowcell: String,
    #[serde(rename = "Instrument", default)]
    instrument: String,
    #[serde(rename = "Reads")]
    reads: ReadsXml,
    #[serde(rename = "FlowcellLayout")]
    layout: Option<FlowcellLayoutXml>,
}

#[derive(Debug, Deserialize)]
struct ReadsXml {
    #[serde(rename = "Read", default)]
    reads: Vec<ReadXml>,
}

#[derive(Debug, Deserialize)]
struct ReadXml {
    #[serde(rename = "Number")]
    number: u32,
    #[serde(rename = "NumCycles")]
    num_cycles: u32,
    #[serde(rename = "IsIndexedRead")]
    is_indexed_read: String,
}

#[derive(Debug, Deserialize)]
struct FlowcellLayoutXml {
    #[serde(rename = "LaneCount")]
    lane_count: u32,
}

/// One sequencing read as configured on the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadInfo {
    pub number: u32,
    pub cycles: u32,
    pub is_index: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInfo {
    pub run_id: String,
    pub flowcell: String,
    pub instrument: String,
    pub lane_count: Option<u32>,
    /// Reads sorted by read number.
    pub reads: Vec<ReadInfo>,
}

impl RunInfo {
    pub fn from_path(path: impl AsRef<Path>) -> Result<RunInfo> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
        RunInfo::from_xml(&text).with_context(|| format!("Error reading {}", path.display()))
    }

    pub fn from_xml(text: &str) -> Result<RunInfo> {
        let xml: RunInfoXml = serde_xml_rs::from_str(text)?;
        let run = xml.run;
        let mut reads: Vec<ReadInfo> = run
            .reads
            .reads
            .into_iter()
            .map(|r| ReadInfo {
                number: r.number,
                cycles: r.num_cycles,
                is_index: r.is_indexed_read.trim().eq_ignore_ascii_case("Y"),
            })
            .collect();
        reads.sort_by_key(|r| r.number);
        Ok(RunInfo {
            run_id: run.id,
            flowcell: run.flowcell,
            instrument: run.instrument,
            lane_count: run.layout.map(|l| l.lane_count),
            reads,
        })
    }

    pub fn index_reads(&self) -> impl Iterator<Item = &ReadInfo> {
        self.reads.iter().filter(|r| r.is_index)
    }
}
