//! demux_runner
#![deny(missing_docs)]

use anyhow::Result;
use chrono::Local;
use clap::{self, Parser};
use demux_wrap::bcl2fastq::ShellRunner;
use demux_wrap::config::Config;
use demux_wrap::logger::init_log;
use demux_wrap::notify::LogNotifier;
use demux_wrap::pipeline::{plan_commands, process_run, RunServices};
use demux_wrap::run_state::FsMarkerStore;
use demux_wrap::scheduler::{Scheduler, SubprocessLauncher};
use demux_wrap::utils::print_error_chain;
use demux_wrap::IntoExitCode;
use std::path::PathBuf;
use std::process::ExitCode;

const CMD: &str = "demux_runner";

/// Run bcl2fastq on sequencing runs as the instruments finish them
#[derive(Parser, Debug)]
#[clap(name = CMD, version)]
struct DemuxRunner {
    #[clap(subcommand)]
    subcmd: SubCommand,

    /// TOML configuration file; compiled-in defaults when omitted
    #[clap(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
enum SubCommand {
    /// Watch the source directory and process runs as they become ready
    #[clap(name = "watch")]
    Watch,

    /// Process a single run folder
    #[clap(name = "process-run")]
    ProcessRun {
        /// Run folder written by the instrument
        #[clap(long)]
        run_dir: PathBuf,

        /// Log the bcl2fastq commands without running them
        #[clap(long)]
        dry_run: bool,
    },

    /// Print the bcl2fastq commands a run would use
    #[clap(name = "command")]
    Command {
        /// Run folder written by the instrument
        #[clap(long)]
        run_dir: PathBuf,
    },
}

fn inner_main() -> Result<ExitCode> {
    let opts = DemuxRunner::parse();
    let mut config = Config::load(opts.config.as_deref())?;
    match opts.subcmd {
        SubCommand::Watch => init_log(config.scheduler_log.as_deref())?,
        _ => init_log(None)?,
    }
    config.warn_non_defaults();

    match opts.subcmd {
        SubCommand::Watch => {
            let scheduler = Scheduler::new(
                config.clone(),
                Box::new(FsMarkerStore::new(&config.marker_prefix)),
                Box::new(LogNotifier),
                Box::new(SubprocessLauncher::current_exe(opts.config)?),
            )?;
            scheduler.watch()
        }
        SubCommand::ProcessRun { run_dir, dry_run } => {
            config.dry_run |= dry_run;
            let report = process_run(
                &run_dir,
                &config,
                RunServices {
                    store: &FsMarkerStore::new(&config.marker_prefix),
                    notifier: &LogNotifier,
                    runner: &ShellRunner,
                    metadata: None,
                },
                Local::now(),
            )?;
            Ok(report.into_exit_code())
        }
        SubCommand::Command { run_dir } => {
            for job in plan_commands(&run_dir, &config)? {
                println!("{}", job.command);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    match inner_main() {
        Ok(exit_code) => exit_code,
        Err(err) => {
            print_error_chain(&err);
            ExitCode::FAILURE
        }
    }
}
