//! Processing of a single run folder: sample sheet, job partitioning,
//! bcl2fastq, stats and notifications.

use crate::bcl2fastq::{build_command, CommandRunner, JobPaths, ToolOutcome};
use crate::config::Config;
use crate::metadata::{load_run, MetadataSink};
use crate::notify::{Notification, Notifier};
use crate::run_log::RunLog;
use crate::run_state::{Marker, RunStateStore};
use crate::TOOL_FAILED_EXIT_CODE;
use anyhow::{Context, Result};
use basemask::{partition, JobPlan, RunInfo, RUN_INFO_XML};
use chrono::{DateTime, Local};
use demux_stats::{stats_path, summarize};
use sample_sheet::{
    derived_sheet_path, find_sample_sheet, normalize_sheet_file, validate, SampleRow, SampleSheet,
};
use std::path::{Path, PathBuf};

/// A bcl2fastq invocation with everything resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedJob {
    pub signature: String,
    pub sample_sheet: PathBuf,
    pub output_dir: PathBuf,
    pub command: String,
    pub samples: Vec<SampleRow>,
}

impl PlannedJob {
    /// Whether this job runs on a sheet derived from the run's sheet.
    fn uses_derived_sheet(&self, run_sheet: &Path) -> bool {
        self.sample_sheet != run_sheet
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub command: String,
    /// `None` in dry-run mode.
    pub outcome: Option<ToolOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run: String,
    pub log_path: PathBuf,
    pub dry_run: bool,
    pub jobs: Vec<JobResult>,
}

impl RunReport {
    /// True when no job failed. Dry runs always succeed.
    pub fn all_succeeded(&self) -> bool {
        self.jobs
            .iter()
            .all(|j| j.outcome.as_ref().map_or(true, |o| o.success))
    }

    pub fn exit_code(&self) -> u8 {
        if self.all_succeeded() {
            0
        } else {
            TOOL_FAILED_EXIT_CODE
        }
    }
}

pub fn run_name(run_dir: &Path) -> Result<String> {
    run_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} is not a run folder", run_dir.display()))
}

/// One job per mask signature. A single job uses the run's sheet and output
/// directory; several each get a derived sheet and an output subdirectory.
fn plan_jobs(
    run_dir: &Path,
    run: &str,
    sheet_path: &Path,
    plan: &JobPlan,
    config: &Config,
) -> Vec<PlannedJob> {
    let run_output = config.run_output_dir(run);
    plan.jobs
        .iter()
        .map(|job| {
            let (sample_sheet, output_dir) = if plan.is_split() {
                let suffix = job.output_suffix();
                (
                    derived_sheet_path(sheet_path, &suffix),
                    run_output.join(&suffix),
                )
            } else {
                (sheet_path.to_path_buf(), run_output.clone())
            };
            let paths = JobPaths {
                runfolder_dir: run_dir.to_path_buf(),
                output_dir,
                sample_sheet,
            };
            PlannedJob {
                signature: job.signature.clone(),
                command: build_command(&config.bcl2fastq_exe, &config.bcl2fastq, &paths, &job.masks),
                sample_sheet: paths.sample_sheet,
                output_dir: paths.output_dir,
                samples: job.samples.clone(),
            }
        })
        .collect()
}

/// The jobs a run would get, without touching the run folder.
pub fn plan_commands(run_dir: &Path, config: &Config) -> Result<Vec<PlannedJob>> {
    let run = run_name(run_dir)?;
    let sheet_path = find_sample_sheet(run_dir);
    let (_, sheet) = validate(SampleSheet::parse(&sheet_path)?)?;
    let run_info = RunInfo::from_path(run_dir.join(RUN_INFO_XML))?;
    let plan = partition(&sheet, &run_info)?;
    Ok(plan_jobs(run_dir, &run, &sheet_path, &plan, config))
}

/// Collaborators of [`process_run`].
pub struct RunServices<'a> {
    pub store: &'a dyn RunStateStore,
    pub notifier: &'a dyn Notifier,
    pub runner: &'a dyn CommandRunner,
    pub metadata: Option<&'a mut dyn MetadataSink>,
}

fn notify(log: &RunLog, notifier: &dyn Notifier, notification: Notification) {
    if let Err(err) = notifier.send(&notification) {
        log.warn(format!("failed to send '{}': {err:#}", notification.subject));
    }
}

/// Run every bcl2fastq job of `run_dir`.
///
/// Errors leave the run markers untouched so that the run is picked up again
/// on the next cycle. Tool failures do not error: they are reported and the
/// run is marked processed but not complete.
pub fn process_run(
    run_dir: &Path,
    config: &Config,
    services: RunServices<'_>,
    now: DateTime<Local>,
) -> Result<RunReport> {
    let run = run_name(run_dir)?;
    let log = RunLog::open(&config.log_dir, &run)?;
    let result = process_run_with_log(run_dir, &run, config, services, &log, now);
    if let Err(err) = &result {
        log.warn(format!("processing failed: {err:#}"));
    }
    result
}

fn process_run_with_log(
    run_dir: &Path,
    run: &str,
    config: &Config,
    services: RunServices<'_>,
    log: &RunLog,
    now: DateTime<Local>,
) -> Result<RunReport> {
    let RunServices {
        store,
        notifier,
        runner,
        metadata,
    } = services;
    log.info(format!("processing {}", run_dir.display()));

    let sheet_path = find_sample_sheet(run_dir);
    log.info(format!("using sample sheet {}", sheet_path.display()));
    let normalized = normalize_sheet_file(&sheet_path, now)?;
    for warning in normalized.sheet.warnings() {
        log.warn(warning);
    }
    if let Some(backup) = &normalized.backup {
        log.warn(format!(
            "sample sheet corrected, original saved as {}",
            backup.display()
        ));
    }
    let sheet = normalized.sheet;

    let run_info = RunInfo::from_path(run_dir.join(RUN_INFO_XML))?;
    let plan = partition(&sheet, &run_info)?;
    let jobs = plan_jobs(run_dir, run, &sheet_path, &plan, config);
    log.info(format!(
        "{} job(s) for instrument class {}",
        jobs.len(),
        plan.instrument
    ));

    let mut results = Vec::with_capacity(jobs.len());
    for job in &jobs {
        if job.uses_derived_sheet(&sheet_path) {
            sheet.write_subset(&job.samples, &job.sample_sheet)?;
            std::fs::create_dir_all(&job.output_dir)
                .with_context(|| job.output_dir.display().to_string())?;
        }
        log.info(&job.command);

        if config.dry_run {
            log.info("dry run, bcl2fastq not started");
            results.push(JobResult {
                command: job.command.clone(),
                outcome: None,
            });
            continue;
        }

        let outcome = runner.run(&job.command, log)?;
        if outcome.success {
            log.info(&outcome.message);
            let mut summary = summarize(
                &stats_path(&job.output_dir),
                plan.instrument,
                &job.sample_sheet,
            )
            .with_context(|| format!("summarizing {run}, see {}", log.path().display()))?;
            summary.submissions = sheet.submissions();
            let notification =
                Notification::new(&config.email, format!("Run Complete: {run}"), &outcome.message)
                    .for_run(run)
                    .with_summary(summary);
            notify(log, notifier, notification);
        } else {
            log.warn(&outcome.message);
            let notification =
                Notification::new(&config.email, format!("Run Failed: {run}"), &outcome.message)
                    .for_run(run);
            notify(log, notifier, notification);
        }
        results.push(JobResult {
            command: job.command.clone(),
            outcome: Some(outcome),
        });
    }

    let report = RunReport {
        run: run.to_string(),
        log_path: log.path().to_path_buf(),
        dry_run: config.dry_run,
        jobs: results,
    };
    if report.dry_run {
        return Ok(report);
    }

    if report.all_succeeded() {
        if let Some(sink) = metadata {
            let id = load_run(sink, &run_info, &sheet)
                .with_context(|| format!("loading metadata for {run}"))?;
            log.info(format!("metadata loaded as run {id}"));
        }
    }

    store.set_marker(run_dir, Marker::Processed)?;
    if report.all_succeeded() {
        store.set_marker(run_dir, Marker::Complete)?;
        log.info("run complete");
    } else {
        log.warn("run processed with failures");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::tests::FakeSink;
    use crate::notify::tests::RecordingNotifier;
    use crate::run_state::FsMarkerStore;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    const HISEQ_RUN: &str = "171101_D00365_1013_AHYYTWBCXY";
    const NEXTSEQ_RUN: &str = "180214_NB501677_0231_AHWK7BGXX3";

    struct FakeRunner {
        code: i32,
        commands: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        fn new(code: i32) -> Self {
            FakeRunner {
                code,
                commands: Mutex::new(Vec::new()),
            }
        }

        fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    impl CommandRunner for FakeRunner {
        fn run(&self, command: &str, log: &RunLog) -> Result<ToolOutcome> {
            self.commands.lock().unwrap().push(command.to_string());
            Ok(ToolOutcome {
                success: self.code == 0,
                code: Some(self.code),
                message: format!("run {} exited {}", log.run(), self.code),
            })
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        config: Config,
        run_dir: PathBuf,
    }

    fn fixture(run: &str, run_info: &str, sheet: &str) -> Result<Fixture> {
        let dir = tempfile::tempdir()?;
        let run_dir = dir.path().join("runs").join(run);
        std::fs::create_dir_all(&run_dir)?;
        std::fs::copy(run_info, run_dir.join(RUN_INFO_XML))?;
        std::fs::copy(sheet, run_dir.join("SampleSheet.csv"))?;
        let config = Config {
            source_dir: dir.path().join("runs"),
            output_dir: dir.path().join("fastq"),
            log_dir: dir.path().join("logs"),
            ..Config::default()
        };
        Ok(Fixture {
            _dir: dir,
            config,
            run_dir,
        })
    }

    fn place_stats(output_dir: &Path, stats: &str) -> Result<()> {
        let path = stats_path(output_dir);
        std::fs::create_dir_all(path.parent().unwrap())?;
        std::fs::copy(stats, path)?;
        Ok(())
    }

    #[test]
    fn test_single_job_run() -> Result<()> {
        let fx = fixture(
            HISEQ_RUN,
            "../basemask/test/RunInfo_hiseq.xml",
            "../sample_sheet/test/hiseq_lanes.csv",
        )?;
        place_stats(
            &fx.config.run_output_dir(HISEQ_RUN),
            "../demux_stats/test/hiseq_stats.json",
        )?;
        let store = FsMarkerStore::new(&fx.config.marker_prefix);
        let notifier = RecordingNotifier::default();
        let runner = FakeRunner::new(0);
        let mut sink = FakeSink::default();

        let report = process_run(
            &fx.run_dir,
            &fx.config,
            RunServices {
                store: &store,
                notifier: &notifier,
                runner: &runner,
                metadata: Some(&mut sink),
            },
            Local::now(),
        )?;
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.jobs.len(), 1);

        let commands = runner.commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].starts_with(
            "bcl2fastq --use-bases-mask 1:y26,i8,y134 --use-bases-mask 2:y26,i8,y134 "
        ));
        assert!(commands[0].contains(&format!(
            "--sample-sheet {}",
            fx.run_dir.join("SampleSheet.csv").display()
        )));

        let sent = notifier.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, format!("Run Complete: {HISEQ_RUN}"));
        let summary = sent[0].summary.as_ref().unwrap();
        assert_eq!(summary.lanes.len(), 2);
        assert_eq!(summary.submissions, vec!["sub-1234"]);

        assert!(store.has_marker(&fx.run_dir, Marker::Processed));
        assert!(store.has_marker(&fx.run_dir, Marker::Complete));
        assert!(!sink.records.is_empty());
        assert!(report.log_path.exists());
        Ok(())
    }

    #[test]
    fn test_split_run() -> Result<()> {
        let fx = fixture(
            NEXTSEQ_RUN,
            "../basemask/test/RunInfo_nextseq.xml",
            "../sample_sheet/test/nextseq_no_lane.csv",
        )?;
        let planned = plan_commands(&fx.run_dir, &fx.config)?;
        let signatures: Vec<&str> = planned.iter().map(|j| j.signature.as_str()).collect();
        assert_eq!(signatures, vec!["y75,i8,i8,y75", "y75,i8,n8,y75"]);
        for job in &planned {
            place_stats(&job.output_dir, "../demux_stats/test/nextseq_stats.json")?;
        }
        // planning alone writes nothing into the run folder
        assert!(!planned[0].sample_sheet.exists());

        let store = FsMarkerStore::new(&fx.config.marker_prefix);
        let notifier = RecordingNotifier::default();
        let runner = FakeRunner::new(0);
        let report = process_run(
            &fx.run_dir,
            &fx.config,
            RunServices {
                store: &store,
                notifier: &notifier,
                runner: &runner,
                metadata: None,
            },
            Local::now(),
        )?;
        assert_eq!(report.exit_code(), 0);
        assert_eq!(
            runner.commands(),
            planned.iter().map(|j| j.command.clone()).collect::<Vec<_>>()
        );

        assert_eq!(
            planned[1].output_dir,
            fx.config.run_output_dir(NEXTSEQ_RUN).join("y75_i8_n8_y75")
        );
        let derived = SampleSheet::parse(&planned[1].sample_sheet)?;
        let ids: Vec<&str> = derived.data.rows().iter().map(|r| r.sample_id.as_str()).collect();
        assert_eq!(ids, vec!["lib_c"]);

        let sent = notifier.take();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[0].summary.as_ref().unwrap().submissions,
            vec!["sub-1111", "sub-2222"]
        );
        assert!(store.has_marker(&fx.run_dir, Marker::Complete));
        Ok(())
    }

    #[test]
    fn test_tool_failure() -> Result<()> {
        let fx = fixture(
            HISEQ_RUN,
            "../basemask/test/RunInfo_hiseq.xml",
            "../sample_sheet/test/hiseq_lanes.csv",
        )?;
        let store = FsMarkerStore::new(&fx.config.marker_prefix);
        let notifier = RecordingNotifier::default();
        let runner = FakeRunner::new(1);
        let report = process_run(
            &fx.run_dir,
            &fx.config,
            RunServices {
                store: &store,
                notifier: &notifier,
                runner: &runner,
                metadata: None,
            },
            Local::now(),
        )?;
        assert_eq!(report.exit_code(), TOOL_FAILED_EXIT_CODE);
        let sent = notifier.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, format!("Run Failed: {HISEQ_RUN}"));
        assert!(sent[0].summary.is_none());
        assert!(store.has_marker(&fx.run_dir, Marker::Processed));
        assert!(!store.has_marker(&fx.run_dir, Marker::Complete));
        Ok(())
    }

    #[test]
    fn test_missing_stats_leaves_run_unmarked() -> Result<()> {
        let fx = fixture(
            HISEQ_RUN,
            "../basemask/test/RunInfo_hiseq.xml",
            "../sample_sheet/test/hiseq_lanes.csv",
        )?;
        let store = FsMarkerStore::new(&fx.config.marker_prefix);
        let result = process_run(
            &fx.run_dir,
            &fx.config,
            RunServices {
                store: &store,
                notifier: &RecordingNotifier::default(),
                runner: &FakeRunner::new(0),
                metadata: None,
            },
            Local::now(),
        );
        assert!(result.is_err());
        assert!(!store.has_marker(&fx.run_dir, Marker::Processed));
        Ok(())
    }

    #[test]
    fn test_dry_run() -> Result<()> {
        let mut fx = fixture(
            HISEQ_RUN,
            "../basemask/test/RunInfo_hiseq.xml",
            "../sample_sheet/test/hiseq_lanes.csv",
        )?;
        fx.config.dry_run = true;
        let store = FsMarkerStore::new(&fx.config.marker_prefix);
        let runner = FakeRunner::new(0);
        let report = process_run(
            &fx.run_dir,
            &fx.config,
            RunServices {
                store: &store,
                notifier: &RecordingNotifier::default(),
                runner: &runner,
                metadata: None,
            },
            Local::now(),
        )?;
        assert!(runner.commands().is_empty());
        assert!(report.jobs[0].outcome.is_none());
        assert_eq!(report.exit_code(), 0);
        assert!(!store.has_marker(&fx.run_dir, Marker::Processed));
        let log = std::fs::read_to_string(&report.log_path)?;
        assert!(log.contains("--use-bases-mask 1:y26,i8,y134"));
        Ok(())
    }
}
