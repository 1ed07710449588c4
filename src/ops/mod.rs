//! High-level operations.
//!
//! This module contains the implementation of the tbx2depfile commands.

pub mod build_info;
pub mod export;
pub mod read_distribution;

pub use build_info::{apply as apply_build_info, BuildInfo, BuildInfoError, GlobalLibraries};
pub use export::{ExportFormat, TargetSummary, SUMMARY_FILE};
pub use read_distribution::{
    post_process, read_distribution, read_module_path_sconscripts, ReadError, ScriptsRead,
};
