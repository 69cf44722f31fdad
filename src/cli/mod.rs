//! Command-line interface for council.
//!
//! Provides commands for running analyses, comparing prompt templates and
//! inspecting saved run logs.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
