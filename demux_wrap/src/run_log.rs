//! Per-run log file.
//!
//! Each run gets `<log_dir>/<run>.log`, opened in append mode so that a run
//! that is retried keeps its history. Lines are also forwarded to the process
//! logger tagged with the run name.

use anyhow::{Context, Result};
use chrono::Local;
use log::{info, warn};
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

pub struct RunLog {
    run: String,
    path: PathBuf,
    file: Mutex<File>,
}

impl RunLog {
    /// Path of the log for `run` under `log_dir`.
    pub fn path_for(log_dir: &Path, run: &str) -> PathBuf {
        log_dir.join(format!("{run}.log"))
    }

    pub fn open(log_dir: &Path, run: &str) -> Result<RunLog> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("creating log directory {}", log_dir.display()))?;
        let path = RunLog::path_for(log_dir, run);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| path.display().to_string())?;
        Ok(RunLog {
            run: run.to_string(),
            path,
            file: Mutex::new(file),
        })
    }

    pub fn run(&self) -> &str {
        &self.run
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_bytes(&self, bytes: &[u8]) {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = file.write_all(bytes) {
            warn!("failed to write to {}: {err}", self.path.display());
        }
    }

    fn line(&self, level: &str, msg: &dyn Display) {
        let line = format!(
            "{} [{level}] {msg}\n",
            Local::now().format("%Y-%m-%dT%H:%M:%S")
        );
        self.write_bytes(line.as_bytes());
    }

    pub fn info(&self, msg: impl Display) {
        info!("[{}] {msg}", self.run);
        self.line("INFO", &msg);
    }

    pub fn warn(&self, msg: impl Display) {
        warn!("[{}] {msg}", self.run);
        self.line("WARN", &msg);
    }

    /// Append tool output verbatim, followed by a blank line.
    pub fn append_raw(&self, bytes: &[u8]) {
        self.write_bytes(bytes);
        self.write_bytes(b"\n\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_run_log_appends() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let log_dir = dir.path().join("logs");
        {
            let log = RunLog::open(&log_dir, "171101_D00365_1013_AHYYTWBCXY")?;
            log.info("first");
            log.append_raw(b"bcl2fastq stderr");
        }
        let log = RunLog::open(&log_dir, "171101_D00365_1013_AHYYTWBCXY")?;
        log.warn("second");
        assert_eq!(
            log.path(),
            log_dir.join("171101_D00365_1013_AHYYTWBCXY.log")
        );

        let text = std::fs::read_to_string(log.path())?;
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].ends_with("[INFO] first"));
        assert_eq!(lines[1], "bcl2fastq stderr");
        assert_eq!(lines[2], "");
        assert!(lines[3].ends_with("[WARN] second"));
        Ok(())
    }
}
