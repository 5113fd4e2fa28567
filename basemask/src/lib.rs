//! Base masks for bcl2fastq, derived from `RunInfo.xml` and the sample indexes.
// Warning groups (as of rust 1.55)
#![deny(
    future_incompatible,
    nonstandard_style,
    rust_2018_compatibility,
    rust_2021_compatibility,
    rust_2018_idioms,
    unused
)]

mod partition;
mod run_info;

pub use partition::{partition, sample_mask, JobPlan, JobSpec};
pub use run_info::{ReadInfo, RunInfo, RUN_INFO_XML};
