//! `tbx2depfile order` command

use anyhow::Result;

use super::GlobalArgs;
use crate::cli::OrderArgs;
use tbxtools::resolver;

pub fn execute(args: OrderArgs, global: &GlobalArgs) -> Result<()> {
    let config = global.config_for(&args.module_path)?;
    let resolved = resolver::resolve(&args.module_path, &config.layout)?;

    for name in resolved.processing_order() {
        println!("{}", name);
    }

    Ok(())
}
