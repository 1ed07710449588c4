//! `tbx2depfile deps` command

use anyhow::{Context, Result};

use super::GlobalArgs;
use crate::cli::DepsArgs;
use tbxtools::core::Distribution;

pub fn execute(args: DepsArgs, global: &GlobalArgs) -> Result<()> {
    let config = global.config_for(&args.module_path)?;

    let mut dist = Distribution::new(&args.module_path, args.ignore_missing, config.layout)
        .context("failed to open distribution")?;
    dist.request_modules(&args.modules)?;

    let width = dist.modules().map(|m| m.name.len()).max().unwrap_or(0);
    for module in dist.modules() {
        let marker = if dist.requested().contains(&module.name) { "*" } else { " " };
        println!("{} {:<width$}  {}", marker, module.name, module.path, width = width);
        if !module.dependencies.is_empty() {
            let deps: Vec<&str> = module.dependencies.iter().map(String::as_str).collect();
            println!("    requires: {}", deps.join(", "));
        }
    }

    Ok(())
}
