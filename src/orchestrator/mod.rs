//! Application-level orchestration utilities.
//!
//! This module owns pipeline lifecycle control (step sequencing, timeouts,
//! interruption) and post-run processing such as report building and exports.
//! CLI layers call into this module to keep responsibilities separated.

mod controller;
mod post_process;

pub(crate) use controller::run_pipeline;
pub(crate) use post_process::process_pipeline_completion;
