//! The outer scheduling loop.
//!
//! Each cycle launches up to `proc_num` eligible runs as `process-run` child
//! processes on a fixed thread pool, waits for all of them, then reports runs
//! that never completed.

use crate::config::Config;
use crate::discovery::{find_eligible_runs, find_incomplete_runs, DiscoveryRules, RunDirectory};
use crate::notify::{run_failure_message, Notification, Notifier};
use crate::run_log::RunLog;
use crate::run_state::{Marker, RunStateStore};
use crate::TOOL_FAILED_EXIT_CODE;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use itertools::Itertools;
use log::{error, info, warn};
use rayon::prelude::*;
use shell_escape::escape;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// How a `process-run` child ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchResult {
    pub run: String,
    pub command: String,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

pub trait JobLauncher: Send + Sync {
    fn launch(&self, run: &RunDirectory) -> Result<LaunchResult>;
}

/// Runs `<exe> [--config <path>] process-run --run-dir <run>`.
pub struct SubprocessLauncher {
    exe: PathBuf,
    config_path: Option<PathBuf>,
}

impl SubprocessLauncher {
    pub fn new(exe: PathBuf, config_path: Option<PathBuf>) -> Self {
        SubprocessLauncher { exe, config_path }
    }

    /// Launch children from the running executable.
    pub fn current_exe(config_path: Option<PathBuf>) -> Result<Self> {
        let exe = std::env::current_exe().context("locating the runner executable")?;
        Ok(SubprocessLauncher::new(exe, config_path))
    }

    fn args(&self, run_dir: &Path) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(config) = &self.config_path {
            args.push("--config".to_string());
            args.push(config.display().to_string());
        }
        args.push("process-run".to_string());
        args.push("--run-dir".to_string());
        args.push(run_dir.display().to_string());
        args
    }
}

impl JobLauncher for SubprocessLauncher {
    fn launch(&self, run: &RunDirectory) -> Result<LaunchResult> {
        let args = self.args(&run.path);
        let command = std::iter::once(self.exe.display().to_string())
            .chain(args.iter().cloned())
            .map(|a| escape(a.into()).into_owned())
            .join(" ");
        info!("launching {command}");
        let output = Command::new(&self.exe)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Running {command}"))?;
        Ok(LaunchResult {
            run: run.name.clone(),
            command,
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

pub struct Scheduler {
    config: Config,
    rules: DiscoveryRules,
    store: Box<dyn RunStateStore>,
    notifier: Box<dyn Notifier>,
    launcher: Box<dyn JobLauncher>,
    pool: rayon::ThreadPool,
}

impl Scheduler {
    pub fn new(
        config: Config,
        store: Box<dyn RunStateStore>,
        notifier: Box<dyn Notifier>,
        launcher: Box<dyn JobLauncher>,
    ) -> Result<Self> {
        let rules = DiscoveryRules::from_config(&config)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.proc_num)
            .build()?;
        Ok(Scheduler {
            config,
            rules,
            store,
            notifier,
            launcher,
            pool,
        })
    }

    fn send(&self, notification: Notification) {
        if let Err(err) = self.notifier.send(&notification) {
            error!("failed to send '{}': {err:#}", notification.subject);
        }
    }

    /// Report queued runs that have not completed, once per run. A run whose
    /// marker cannot be written is logged and left for the next cycle.
    pub fn notify_incomplete(&self, now: DateTime<Local>) -> Vec<RunDirectory> {
        let runs: Vec<RunDirectory> =
            find_incomplete_runs(&self.config.source_dir, &self.rules, &*self.store, now)
                .into_iter()
                .filter(
                    |run| match self.store.set_marker(&run.path, Marker::IncompleteNotified) {
                        Ok(()) => true,
                        Err(err) => {
                            error!("cannot mark {} as reported: {err:#}", run.name);
                            false
                        }
                    },
                )
                .collect();
        if runs.is_empty() {
            return runs;
        }
        let message = format!(
            "The following runs failed to complete {} or more days ago:\n\n{}",
            self.config.incomplete_after_days,
            runs.iter().map(|r| r.path.display()).join("\n")
        );
        self.send(Notification::new(
            &self.config.email,
            "Incomplete Runs",
            message,
        ));
        runs
    }

    /// Launch eligible runs, at most `proc_num` of them, and wait for all.
    pub fn process_runs(&self, now: DateTime<Local>) -> Vec<(RunDirectory, Result<LaunchResult>)> {
        let eligible = find_eligible_runs(&self.config.source_dir, &self.rules, &*self.store, now);
        if eligible.len() > self.config.proc_num {
            info!(
                "{} eligible runs, {} deferred to the next cycle",
                eligible.len(),
                eligible.len() - self.config.proc_num
            );
        }
        let selected: Vec<RunDirectory> =
            eligible.into_iter().take(self.config.proc_num).collect();

        let results: Vec<(RunDirectory, Result<LaunchResult>)> = self.pool.install(|| {
            selected
                .into_par_iter()
                .map(|run| {
                    let result = self.launcher.launch(&run);
                    (run, result)
                })
                .collect()
        });

        for (run, result) in &results {
            self.report(run, result);
        }
        results
    }

    fn report(&self, run: &RunDirectory, result: &Result<LaunchResult>) {
        let log_path = RunLog::path_for(&self.config.log_dir, &run.name);
        match result {
            Ok(launch) if launch.code == Some(0) => info!("{} finished", run.name),
            // bcl2fastq failures were already reported by the child
            Ok(launch) if launch.code == Some(i32::from(TOOL_FAILED_EXIT_CODE)) => {
                warn!("{} finished with bcl2fastq failures", run.name)
            }
            Ok(launch) => {
                error!("{} failed with code {:?}", run.name, launch.code);
                let message = run_failure_message(
                    &run.name,
                    &launch.command,
                    launch.code,
                    &launch.stdout,
                    &launch.stderr,
                    &log_path,
                );
                self.send(
                    Notification::new(&self.config.email, format!("Run Failed: {}", run.name), message)
                        .for_run(&run.name),
                );
            }
            Err(err) => {
                error!("{} could not be launched: {err:#}", run.name);
                let message = format!(
                    "Run Failed: {}\n{err:#}\nsee log: {}\n",
                    run.name,
                    log_path.display()
                );
                self.send(
                    Notification::new(&self.config.email, format!("Run Failed: {}", run.name), message)
                        .for_run(&run.name),
                );
            }
        }
    }

    pub fn cycle(&self, now: DateTime<Local>) {
        self.process_runs(now);
        self.notify_incomplete(now);
    }

    /// Cycle forever. Failures of single runs are logged and reported, and the
    /// loop goes on.
    pub fn watch(&self) -> ! {
        info!(
            "watching {} every {}s with {} worker(s)",
            self.config.source_dir.display(),
            self.config.frequency_secs,
            self.config.proc_num
        );
        loop {
            self.cycle(Local::now());
            std::thread::sleep(Duration::from_secs(self.config.frequency_secs));
        }
    }
}
