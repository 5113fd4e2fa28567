//! Runner configuration: an optional TOML file over compiled-in defaults,
//! with a few environment overrides.

use crate::bcl2fastq::Bcl2fastqOptions;
use anyhow::{ensure, Context, Result};
use chrono::{DateTime, Local, NaiveDate, TimeZone};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Parallelism budget: runs processed per scheduling cycle.
pub const PROC_NUM_ENV: &str = "DEMUX_PROC_NUM";
/// Seconds between scheduling cycles.
pub const FREQUENCY_ENV: &str = "DEMUX_FREQUENCY";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmailConfig {
    pub from: String,
    pub to: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory the instruments write run folders into.
    pub source_dir: PathBuf,
    /// bcl2fastq output goes to `<output_dir>/<run>`.
    pub output_dir: PathBuf,
    /// Per-run logs.
    pub log_dir: PathBuf,
    /// Log of the scheduler itself, in addition to stderr.
    pub scheduler_log: Option<PathBuf>,
    pub proc_num: usize,
    pub frequency_secs: u64,
    /// Runs last modified longer ago than this are not picked up.
    pub days_to_search: i64,
    /// A queued run that has not completed after this long is reported.
    pub incomplete_after_days: i64,
    /// Runs modified before this date (`YYYY-MM-DD`) are never considered.
    pub search_after: String,
    /// Files that must exist in a run folder before it is processed.
    pub required_files: Vec<String>,
    pub marker_prefix: String,
    /// Log bcl2fastq commands instead of running them.
    pub dry_run: bool,
    pub bcl2fastq_exe: String,
    pub email: EmailConfig,
    pub bcl2fastq: Bcl2fastqOptions,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            source_dir: PathBuf::from("/seq/runs"),
            output_dir: PathBuf::from("/seq/fastq"),
            log_dir: PathBuf::from("/seq/logs"),
            scheduler_log: None,
            proc_num: 2,
            frequency_secs: 60,
            days_to_search: 7,
            incomplete_after_days: 2,
            search_after: "2017-01-15".to_string(),
            required_files: vec![
                "InterOp/QMetricsOut.bin".to_string(),
                "InterOp/TileMetricsOut.bin".to_string(),
                "RunInfo.xml".to_string(),
                "RTAComplete.txt".to_string(),
            ],
            marker_prefix: "demux".to_string(),
            dry_run: false,
            bcl2fastq_exe: "bcl2fastq".to_string(),
            email: EmailConfig::default(),
            bcl2fastq: Bcl2fastqOptions::default(),
        }
    }
}

macro_rules! push_non_default {
    ($out:expr, $config:expr, $default:expr, $($field:ident).+) => {
        if $default.$($field).+ != $config.$($field).+ {
            $out.push(format!(
                "{} = {:?}",
                stringify!($($field).+),
                $config.$($field).+
            ));
        }
    };
}

impl Config {
    /// Read `path` if given, otherwise use the defaults; then apply
    /// environment overrides. Nothing is logged here since the logger is
    /// configured from the result.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match path {
            Some(path) => {
                let text =
                    std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
                Config::from_toml(&text).with_context(|| path.display().to_string())?
            }
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.check()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Config> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `DEMUX_PROC_NUM` and `DEMUX_FREQUENCY` as returned by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup(PROC_NUM_ENV) {
            self.proc_num = v
                .trim()
                .parse()
                .with_context(|| format!("{PROC_NUM_ENV}={v} is not a number"))?;
        }
        if let Some(v) = lookup(FREQUENCY_ENV) {
            self.frequency_secs = v
                .trim()
                .parse()
                .with_context(|| format!("{FREQUENCY_ENV}={v} is not a number"))?;
        }
        Ok(())
    }

    pub fn check(&self) -> Result<()> {
        ensure!(self.proc_num > 0, "proc_num must be at least 1");
        ensure!(
            (1..=9).contains(&self.bcl2fastq.fastq_compression_level),
            "bcl2fastq fastq-compression-level must be between 1 and 9, not {}",
            self.bcl2fastq.fastq_compression_level
        );
        ensure!(
            !self.marker_prefix.is_empty(),
            "marker_prefix must not be empty"
        );
        self.search_after()?;
        Ok(())
    }

    /// Tunables that differ from their defaults, as `name = value`.
    pub fn non_defaults(&self) -> Vec<String> {
        let default = Config::default();
        let mut out = Vec::new();
        push_non_default!(out, self, default, proc_num);
        push_non_default!(out, self, default, frequency_secs);
        push_non_default!(out, self, default, days_to_search);
        push_non_default!(out, self, default, incomplete_after_days);
        push_non_default!(out, self, default, search_after);
        push_non_default!(out, self, default, required_files);
        push_non_default!(out, self, default, dry_run);
        push_non_default!(out, self, default, bcl2fastq.barcode_mismatches);
        push_non_default!(out, self, default, bcl2fastq.adapter_stringency);
        push_non_default!(out, self, default, bcl2fastq.tiles);
        out
    }

    /// Call once the logger is up.
    pub fn warn_non_defaults(&self) {
        for setting in self.non_defaults() {
            warn!("using non-default {setting}");
        }
    }

    /// Start of local day `search_after`.
    pub fn search_after(&self) -> Result<DateTime<Local>> {
        let date = NaiveDate::parse_from_str(&self.search_after, "%Y-%m-%d")
            .with_context(|| format!("search_after '{}' is not YYYY-MM-DD", self.search_after))?;
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .with_context(|| format!("search_after '{}'", self.search_after))?;
        Local
            .from_local_datetime(&midnight)
            .earliest()
            .with_context(|| format!("search_after '{}' does not exist locally", self.search_after))
    }

    /// bcl2fastq output directory of `run`.
    pub fn run_output_dir(&self, run: &str) -> PathBuf {
        self.output_dir.join(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_toml_keeps_defaults() -> Result<()> {
        let config = Config::from_toml(
            r#"
            source_dir = "/data/illumina"
            proc_num = 4

            [email]
            from = "seq@example.org"
            to = ["core@example.org"]

            [bcl2fastq]
            processing-threads = 16
            no-lane-splitting = true
            tiles = "s_1"
            "#,
        )?;
        assert_eq!(config.source_dir, PathBuf::from("/data/illumina"));
        assert_eq!(config.proc_num, 4);
        assert_eq!(config.days_to_search, 7);
        assert_eq!(config.email.to, vec!["core@example.org"]);
        assert_eq!(config.bcl2fastq.processing_threads, 16);
        assert!(config.bcl2fastq.no_lane_splitting);
        assert_eq!(config.bcl2fastq.tiles.as_deref(), Some("s_1"));
        assert_eq!(config.bcl2fastq.mask_short_adapter_reads, 22);
        config.check()
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(Config::from_toml("proc_nmu = 3").is_err());
        assert!(Config::from_toml("[bcl2fastq]\nthreads = 3").is_err());
    }

    #[test]
    fn test_env_overrides() -> Result<()> {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            PROC_NUM_ENV => Some("5".to_string()),
            FREQUENCY_ENV => Some(" 300 ".to_string()),
            _ => None,
        })?;
        assert_eq!(config.proc_num, 5);
        assert_eq!(config.frequency_secs, 300);

        let mut config = Config::default();
        assert!(config
            .apply_env(|key| (key == PROC_NUM_ENV).then(|| "two".to_string()))
            .is_err());
        Ok(())
    }

    #[test]
    fn test_check() -> Result<()> {
        let config = Config::default();
        config.check()?;
        assert_eq!(
            config.search_after()?.date_naive(),
            NaiveDate::from_ymd_opt(2017, 1, 15).unwrap()
        );

        let bad = [
            Config {
                proc_num: 0,
                ..Config::default()
            },
            Config {
                search_after: "Jan 15 2017".to_string(),
                ..Config::default()
            },
            Config {
                bcl2fastq: Bcl2fastqOptions {
                    fastq_compression_level: 10,
                    ..Default::default()
                },
                ..Config::default()
            },
        ];
        for config in bad {
            assert!(config.check().is_err());
        }
        Ok(())
    }

    #[test]
    fn test_load_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("demux.toml");
        std::fs::write(&path, "log_dir = \"/tmp/demux-logs\"\ndry_run = true\n")?;
        let config = Config::load(Some(&path))?;
        assert_eq!(config.log_dir, PathBuf::from("/tmp/demux-logs"));
        assert!(config.dry_run);
        assert!(Config::load(Some(&dir.path().join("missing.toml"))).is_err());
        Ok(())
    }

    #[test]
    fn test_non_defaults() -> Result<()> {
        assert!(Config::default().non_defaults().is_empty());

        let mut config = Config::from_toml(
            "log_dir = \"/tmp/demux-logs\"\ndry_run = true\n[bcl2fastq]\ntiles = \"s_1\"\n",
        )?;
        config.apply_env(|key| (key == PROC_NUM_ENV).then(|| "3".to_string()))?;
        assert_eq!(
            config.non_defaults(),
            vec![
                "proc_num = 3",
                "dry_run = true",
                "bcl2fastq.tiles = Some(\"s_1\")",
            ]
        );
        Ok(())
    }
}
