//! Command implementations

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use tbxtools::util::Config;

pub mod deps;
pub mod order;
pub mod read;

/// Options shared by every command.
pub struct GlobalArgs {
    pub config: Option<PathBuf>,
    pub color: bool,
}

impl GlobalArgs {
    /// Check the distribution root and load its configuration.
    pub fn config_for(&self, module_path: &Path) -> Result<Config> {
        if !module_path.is_dir() {
            bail!("Module path {} must be a directory", module_path.display());
        }
        Config::discover(self.config.as_deref(), module_path)
    }
}
