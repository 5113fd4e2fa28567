//! bcl2fastq command construction and execution.

use crate::run_log::RunLog;
use anyhow::{Context, Result};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use shell_escape::escape;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

const MASK_SWITCH: &str = "--use-bases-mask";

/// bcl2fastq options we set. TOML keys match the long switch names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Bcl2fastqOptions {
    /// Threads for processing demultiplexed data.
    pub processing_threads: u32,
    /// Minimum match rate that triggers adapter masking or trimming.
    pub adapter_stringency: f64,
    pub barcode_mismatches: u32,
    pub create_fastq_for_index_reads: bool,
    pub ignore_missing_bcls: bool,
    pub ignore_missing_filter: bool,
    pub ignore_missing_positions: bool,
    pub minimum_trimmed_read_length: u32,
    /// Reads shorter than this after trimming are masked.
    pub mask_short_adapter_reads: u32,
    /// Tile selection regex, passed through unchanged.
    pub tiles: Option<String>,
    pub with_failed_reads: bool,
    pub write_fastq_reverse_complement: bool,
    pub no_bgzf_compression: bool,
    pub no_lane_splitting: bool,
    pub find_adapters_with_sliding_window: bool,
    /// gzip level, 1 to 9.
    pub fastq_compression_level: u32,
}

impl Default for Bcl2fastqOptions {
    fn default() -> Self {
        Bcl2fastqOptions {
            processing_threads: 8,
            adapter_stringency: 0.9,
            barcode_mismatches: 0,
            create_fastq_for_index_reads: false,
            ignore_missing_bcls: false,
            ignore_missing_filter: false,
            ignore_missing_positions: false,
            minimum_trimmed_read_length: 0,
            mask_short_adapter_reads: 22,
            tiles: None,
            with_failed_reads: false,
            write_fastq_reverse_complement: false,
            no_bgzf_compression: false,
            no_lane_splitting: false,
            find_adapters_with_sliding_window: false,
            fastq_compression_level: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchValue {
    /// Only the switch is emitted, and only when set.
    Flag(bool),
    Value(String),
}

/// A long command line switch and its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Switch {
    pub name: &'static str,
    pub value: SwitchValue,
}

fn flag(name: &'static str, on: bool) -> Switch {
    Switch {
        name,
        value: SwitchValue::Flag(on),
    }
}

fn value(name: &'static str, value: impl ToString) -> Switch {
    Switch {
        name,
        value: SwitchValue::Value(value.to_string()),
    }
}

impl Bcl2fastqOptions {
    pub fn switches(&self) -> Vec<Switch> {
        let mut switches = vec![
            value("--processing-threads", self.processing_threads),
            value("--adapter-stringency", self.adapter_stringency),
            value("--barcode-mismatches", self.barcode_mismatches),
            flag(
                "--create-fastq-for-index-reads",
                self.create_fastq_for_index_reads,
            ),
            flag("--ignore-missing-bcls", self.ignore_missing_bcls),
            flag("--ignore-missing-filter", self.ignore_missing_filter),
            flag("--ignore-missing-positions", self.ignore_missing_positions),
            value(
                "--minimum-trimmed-read-length",
                self.minimum_trimmed_read_length,
            ),
            value("--mask-short-adapter-reads", self.mask_short_adapter_reads),
            flag("--with-failed-reads", self.with_failed_reads),
            flag(
                "--write-fastq-reverse-complement",
                self.write_fastq_reverse_complement,
            ),
            flag("--no-bgzf-compression", self.no_bgzf_compression),
            flag("--no-lane-splitting", self.no_lane_splitting),
            flag(
                "--find-adapters-with-sliding-window",
                self.find_adapters_with_sliding_window,
            ),
            value("--fastq-compression-level", self.fastq_compression_level),
        ];
        if let Some(tiles) = &self.tiles {
            switches.push(value("--tiles", tiles));
        }
        switches
    }
}

/// Inputs and outputs of one bcl2fastq job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    pub runfolder_dir: PathBuf,
    pub output_dir: PathBuf,
    pub sample_sheet: PathBuf,
}

impl JobPaths {
    fn switches(&self) -> Vec<Switch> {
        vec![
            value("--runfolder-dir", self.runfolder_dir.display()),
            value("--output-dir", self.output_dir.display()),
            value("--sample-sheet", self.sample_sheet.display()),
        ]
    }
}

/// Render a command line: one `--use-bases-mask` per mask in the order given,
/// then every switch sorted by name. Values are shell-quoted when needed.
pub fn render_command(
    exe: &str,
    masks: &[String],
    switches: impl IntoIterator<Item = Switch>,
) -> String {
    let mut parts = vec![exe.to_string()];
    for mask in masks {
        parts.push(MASK_SWITCH.to_string());
        parts.push(mask.clone());
    }
    for switch in switches.into_iter().sorted_by_key(|s| s.name) {
        match switch.value {
            SwitchValue::Flag(true) => parts.push(switch.name.to_string()),
            SwitchValue::Flag(false) => {}
            SwitchValue::Value(v) => {
                parts.push(switch.name.to_string());
                parts.push(escape(v.into()).into_owned());
            }
        }
    }
    parts.join(" ")
}

pub fn build_command(
    exe: &str,
    options: &Bcl2fastqOptions,
    paths: &JobPaths,
    masks: &[String],
) -> String {
    render_command(
        exe,
        masks,
        options.switches().into_iter().chain(paths.switches()),
    )
}

/// How a bcl2fastq invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub success: bool,
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub message: String,
}

impl ToolOutcome {
    fn classify(code: Option<i32>, run: &str, log_path: &Path, stderr: &str) -> Self {
        let success = code == Some(0);
        let message = if success {
            format!(
                "run {run} completed successfully\nsee logs here: {}\n",
                log_path.display()
            )
        } else {
            format!(
                "run {run} failed\nsee logs here: {}\n{stderr}\n",
                log_path.display()
            )
        };
        ToolOutcome {
            success,
            code,
            message,
        }
    }
}

/// Runs a rendered command line.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &str, log: &RunLog) -> Result<ToolOutcome>;
}

/// Runs the command through `sh -c`, appending its standard error to the run log.
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str, log: &RunLog) -> Result<ToolOutcome> {
        log.info("***** START bcl2fastq *****");
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Running {command}"))?;
        log.append_raw(&output.stderr);
        log.info("***** END bcl2fastq *****");
        Ok(ToolOutcome::classify(
            output.status.code(),
            log.run(),
            log.path(),
            &String::from_utf8_lossy(&output.stderr),
        ))
    }
}
