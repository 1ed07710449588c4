//! `tbx2depfile read` command

use std::path::PathBuf;

use anyhow::{anyhow, Result};

use super::GlobalArgs;
use crate::cli::ReadArgs;
use tbxtools::ops::{apply_build_info, read_distribution, BuildInfo, ExportFormat, TargetSummary, SUMMARY_FILE};
use tbxtools::util::diagnostic::emit;

pub fn execute(args: ReadArgs, global: &GlobalArgs) -> Result<()> {
    let config = global.config_for(&args.module_path)?;

    tracing::info!("Reading TBX distribution");
    let mut dist = read_distribution(&args.module_path, &config).map_err(|err| {
        emit(&err.to_diagnostic(), global.color);
        anyhow!("could not read distribution {}", args.module_path.display())
    })?;

    let info = BuildInfo::load(args.build_info.as_deref())?;
    let globals = apply_build_info(&info, &mut dist, &config.layout).map_err(|err| {
        emit(&err.to_diagnostic(), global.color);
        anyhow!("could not apply build info")
    })?;
    tracing::info!(
        "Read {} targets in {} modules",
        dist.targets().len(),
        dist.modules.len()
    );
    if !globals.optional.is_empty() {
        tracing::debug!(
            "Optional for every target: {}",
            globals.optional.iter().cloned().collect::<Vec<_>>().join(", ")
        );
    }

    let (format, default_name) = if args.json {
        (ExportFormat::Json, "scons_targets.json")
    } else {
        (ExportFormat::Yaml, SUMMARY_FILE)
    };
    let output = args.output.unwrap_or_else(|| PathBuf::from(default_name));
    TargetSummary::from_distribution(&dist).write(&output, format)?;

    Ok(())
}
