// Warning groups (as of rust 1.55)
#![deny(
    future_incompatible,
    nonstandard_style,
    rust_2018_compatibility,
    rust_2021_compatibility,
    rust_2018_idioms,
    unused
)]

pub mod bcl2fastq;
pub mod config;
pub mod discovery;
pub mod logger;
pub mod metadata;
pub mod notify;
pub mod pipeline;
pub mod run_log;
pub mod run_state;
pub mod scheduler;
pub mod utils;

use std::process::ExitCode;

/// Exit code of `process-run` when bcl2fastq itself failed. The scheduler
/// skips its own notification for this code because the child already sent
/// one. Both sides must agree on the value and nothing else enforces it; a
/// structured result from the child would remove this coupling.
pub const TOOL_FAILED_EXIT_CODE: u8 = 9;

/// Convert something to an ExitCode.
pub trait IntoExitCode {
    fn into_exit_code(self) -> ExitCode;
}

impl IntoExitCode for pipeline::RunReport {
    fn into_exit_code(self) -> ExitCode {
        ExitCode::from(self.exit_code())
    }
}
