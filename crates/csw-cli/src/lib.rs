//! CSW Harvester CLI - Command-line interface for the CSW harvester
//!
//! This crate provides the CLI application that ties the harvesting session
//! and the CSW client together.

pub mod config;
pub mod output;
pub mod snapshot;
pub mod targets;

pub use config::{Command, Config, DisplayMode, HarvestArgs};
pub use output::{format_record_line, CliReporter};
pub use snapshot::{apply_record, load_snapshot, save_snapshot};
pub use targets::{resolve_targets, HarvestTarget};
