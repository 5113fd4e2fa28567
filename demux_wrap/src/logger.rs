// Process logger

use anyhow::{Context, Result};
use chrono::Local;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Log filter, e.g. `debug` or `demux_wrap=debug`.
pub const LOG_LEVEL_ENV: &str = "DEMUX_LOG_LEVEL";

/// Writes to stderr and a log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

pub fn init_log(log_file: Option<&Path>) -> Result<()> {
    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Info);
    if let Ok(filters) = std::env::var(LOG_LEVEL_ENV) {
        builder.parse_filters(&filters);
    }
    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening scheduler log {}", path.display()))?;
        builder.target(Target::Pipe(Box::new(Tee { file })));
    }
    builder.try_init()?;
    Ok(())
}
