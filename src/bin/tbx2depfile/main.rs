//! tbx2depfile - extract the module and target model of a tbx distribution

use std::io::IsTerminal;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

/// Log filter covering the library and this binary.
fn log_directive(verbose: bool) -> &'static str {
    if verbose {
        "tbxtools=debug,tbx2depfile=debug"
    } else {
        "tbxtools=info,tbx2depfile=info"
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_directive(cli.verbose)))
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let global = commands::GlobalArgs {
        config: cli.config,
        color: !cli.no_color && std::io::stderr().is_terminal(),
    };

    match cli.command {
        Commands::Read(args) => commands::read::execute(args, &global),
        Commands::Order(args) => commands::order::execute(args, &global),
        Commands::Deps(args) => commands::deps::execute(args, &global),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directive_covers_binary() {
        assert!(log_directive(false).contains("tbx2depfile=info"));
        assert!(log_directive(true).contains("tbx2depfile=debug"));
        assert!(EnvFilter::try_new(log_directive(true)).is_ok());
    }
}
