//! Configuration file support.
//!
//! An optional `tbxtools.toml` in the distribution root (or a file given
//! with `--config`) overrides the built-in knowledge about the legacy
//! distribution layout. Every field defaults to the values the legacy
//! build scripts assume, so most distributions need no file at all.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Name of the per-distribution config file.
pub const CONFIG_FILE: &str = "tbxtools.toml";

/// tbxtools configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Module layout and dependency graph settings
    pub layout: LayoutConfig,

    /// Post-processing filters applied after all scripts have run
    pub filters: FilterConfig,
}

/// Where modules live and how their dependencies are wired.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Secondary repository directories searched for modules besides the root
    pub repositories: Vec<String>,

    /// Module every other module implicitly depends on
    pub root_module: String,

    /// Extra `(from, to)` edges forced into the dependency graph
    pub corrective_edges: Vec<(String, String)>,

    /// Dependency names that stand for a different module
    pub module_aliases: BTreeMap<String, String>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        LayoutConfig {
            repositories: vec!["cctbx_project".to_string()],
            root_module: "libtbx".to_string(),
            corrective_edges: vec![("scitbx".to_string(), "omptbx".to_string())],
            module_aliases: [("boost", "boost_adaptbx"), ("annlib", "annlib_adaptbx")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl LayoutConfig {
    /// Repository directories to search, the distribution root first.
    pub fn search_roots(&self) -> Vec<String> {
        let mut roots = vec![".".to_string()];
        roots.extend(self.repositories.iter().cloned());
        roots
    }
}

/// Filters for the extracted target model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Third-party targets that are supplied externally, not built
    pub removed_targets: BTreeSet<String>,

    /// Modules not supported by the target build
    pub removed_modules: BTreeSet<String>,

    /// Link library whose presence marks a target as CUDA code
    pub cuda_marker_library: String,

    /// Link library of the extension-binding layer
    pub extension_library: String,

    /// Libraries linked implicitly by every target
    pub implied_libraries: BTreeSet<String>,

    /// Link flags that carry no information for the model
    pub ignored_link_flags: BTreeSet<String>,

    /// External libraries targets are allowed to link against
    pub expected_external_libraries: BTreeSet<String>,
}

fn string_set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            removed_targets: string_set(&[
                "boost_thread",
                "boost_system",
                "boost_python",
                "boost_chrono",
                "boost_numpy",
                "boost_filesystem",
                "libboost_filesystem",
            ]),
            removed_modules: string_set(&["clipper", "clipper_adaptbx", "fftw3tbx"]),
            cuda_marker_library: "cufft".to_string(),
            extension_library: "boost_python".to_string(),
            implied_libraries: string_set(&["boost_thread", "boost_system", "m"]),
            ignored_link_flags: string_set(&["-fopenmp", "-shared", "-rdynamic"]),
            expected_external_libraries: string_set(&[
                "tiff",
                "boost_python",
                "GL",
                "GLU",
                "hdf5",
                "boost_numpy",
                "png",
                "hdf5_hl",
                "gtest",
                "gtest_main",
                "boost_filesystem",
                "dl",
            ]),
        }
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config: {}", path.display()))
    }

    /// Load an explicit config file, or `tbxtools.toml` from the
    /// distribution root when present, or the defaults.
    pub fn discover(explicit: Option<&Path>, dist_root: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let candidate = dist_root.join(CONFIG_FILE);
        if candidate.is_file() {
            tracing::debug!("Using config {}", candidate.display());
            return Self::load(&candidate);
        }
        Ok(Self::default())
    }
}
