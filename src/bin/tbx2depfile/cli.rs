//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Read a tbx distribution's SConscripts and describe its targets
#[derive(Parser)]
#[command(name = "tbx2depfile")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Configuration file (defaults to tbxtools.toml in the distribution)
    #[arg(long, global = true, env = "TBXTOOLS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read every module and write the target summary
    Read(ReadArgs),

    /// Print the order modules are processed in
    Order(OrderArgs),

    /// Load modules and their requirements, and print what was loaded
    Deps(DepsArgs),
}

#[derive(Args)]
pub struct ReadArgs {
    /// Root of the distribution
    pub module_path: PathBuf,

    /// YAML file with build information the scripts do not state
    #[arg(long)]
    pub build_info: Option<PathBuf>,

    /// Where to write the summary (defaults to scons_targets.yml)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Write the summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct OrderArgs {
    /// Root of the distribution
    pub module_path: PathBuf,
}

#[derive(Args)]
pub struct DepsArgs {
    /// Root of the distribution
    pub module_path: PathBuf,

    /// Modules to load
    #[arg(required = true)]
    pub modules: Vec<String>,

    /// Treat a missing hard requirement of this name as optional
    #[arg(long = "ignore-missing", value_name = "NAME")]
    pub ignore_missing: Vec<String>,
}
