//! Request-driven loading of a distribution's modules.
//!
//! Unlike the full read, this only touches the modules that were asked
//! for and whatever their manifests pull in. Requirements are followed
//! recursively; a module whose hard requirements cannot be met is rolled
//! back out of the distribution before the error is returned.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use thiserror::Error;

use crate::core::module::{DependencyKind, Module};
use crate::util::config::LayoutConfig;
use crate::util::fs::{posix_join, posix_normpath};

/// Failure to resolve the modules a distribution needs.
#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("Cannot find module {name} (required by {required_by})")]
    ModuleNotFound { name: String, required_by: String },

    #[error("Could not find requested module {0}")]
    RequestedModuleNotFound(String),

    #[error("failed to read {}: {source}", .path.display())]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", .path.display())]
    ManifestParse { path: PathBuf, message: String },
}

/// A distribution whose modules are loaded on demand.
#[derive(Debug)]
pub struct Distribution {
    path: PathBuf,
    layout: LayoutConfig,
    modules: IndexMap<String, Module>,
    requested: BTreeSet<String>,
    ignore_missing: BTreeSet<String>,
}

impl Distribution {
    /// Open the distribution rooted at `path`, loading the root module.
    ///
    /// Hard requirements named in `ignore_missing` are treated as optional.
    pub fn new(
        path: &Path,
        ignore_missing: impl IntoIterator<Item = String>,
        layout: LayoutConfig,
    ) -> Result<Self, DependencyError> {
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let mut dist = Distribution {
            path,
            layout,
            modules: IndexMap::new(),
            requested: BTreeSet::new(),
            ignore_missing: ignore_missing.into_iter().collect(),
        };
        let root = dist.layout.root_module.clone();
        if dist.load_module(&root)?.is_none() {
            tracing::warn!(
                "Could not find {} in distribution; This is allowed but probably not intentional",
                root
            );
        }
        Ok(dist)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Search the repositories for a directory called `name`.
    fn find_module_dir(&self, name: &str) -> Option<String> {
        self.layout
            .search_roots()
            .into_iter()
            .find(|repo| self.path.join(repo).join(name).is_dir())
            .map(|repo| posix_normpath(&posix_join(&repo, name)))
    }

    /// Load a module and, recursively, its dependencies.
    ///
    /// Returns `Ok(None)` if no directory for `name` exists.
    pub fn load_module(&mut self, name: &str) -> Result<Option<&Module>, DependencyError> {
        if self.load(name)? {
            Ok(self.modules.get(name))
        } else {
            Ok(None)
        }
    }

    fn load(&mut self, name: &str) -> Result<bool, DependencyError> {
        if self.modules.contains_key(name) {
            return Ok(true);
        }
        let Some(module_path) = self.find_module_dir(name) else {
            return Ok(false);
        };
        let mut module = Module::open(name, &module_path, &self.path, &self.layout.module_aliases)?;

        for kind in [DependencyKind::Build, DependencyKind::Use] {
            let overlap: BTreeSet<String> = module
                .config
                .dependencies(kind)
                .intersection(&self.ignore_missing)
                .cloned()
                .collect();
            if overlap.is_empty() {
                continue;
            }
            tracing::debug!(
                "Module {}: Making dependenc{} {} optional",
                name,
                if overlap.len() == 1 { "y" } else { "ies" },
                overlap
                    .iter()
                    .map(|x| format!("'{}'", x))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            module.config.dependencies_mut(kind).retain(|d| !overlap.contains(d));
            module.config.optional_modules.extend(overlap);
        }

        // Inserted before the dependencies load so that cycles terminate
        self.modules.insert(name.to_string(), module);
        if let Err(err) = self.load_dependencies_for(name) {
            self.unlink(name);
            return Err(err);
        }
        Ok(true)
    }

    fn load_dependencies_for(&mut self, name: &str) -> Result<(), DependencyError> {
        let root = self.layout.root_module.clone();
        if name != root && self.modules.contains_key(&root) {
            self.link(name, &root);
        }

        let Some(config) = self.modules.get(name).map(|m| m.config.clone()) else {
            return Ok(());
        };
        for dep in config.hard_requirements() {
            tracing::debug!("Loading dependency for {}: {}", name, dep);
            if !self.load(&dep)? {
                return Err(DependencyError::ModuleNotFound {
                    name: dep,
                    required_by: name.to_string(),
                });
            }
            self.link(name, &dep);
        }

        for dep in &config.optional_modules {
            tracing::debug!("Optionally loading dependency for {}: {}", name, dep);
            match self.load(dep) {
                Ok(true) => {
                    tracing::debug!("  found");
                    self.link(name, dep);
                }
                Ok(false) => tracing::debug!("  ...not found"),
                Err(DependencyError::ModuleNotFound { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn link(&mut self, from: &str, to: &str) {
        if let Some(module) = self.modules.get_mut(from) {
            module.dependencies.insert(to.to_string());
        }
        if let Some(module) = self.modules.get_mut(to) {
            module.dependents.insert(from.to_string());
        }
    }

    /// Take a failed module back out, along with every edge naming it.
    fn unlink(&mut self, name: &str) {
        self.modules.shift_remove(name);
        for module in self.modules.values_mut() {
            module.dependents.remove(name);
            module.dependencies.remove(name);
        }
    }

    /// Load modules and mark them as explicitly requested.
    pub fn request_modules<I, S>(&mut self, names: I) -> Result<(), DependencyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
        self.requested.extend(names.iter().cloned());
        for name in &names {
            if !self.load(name)? {
                return Err(DependencyError::RequestedModuleNotFound(name.clone()));
            }
        }
        Ok(())
    }

    pub fn requested(&self) -> &BTreeSet<String> {
        &self.requested
    }

    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    /// Loaded modules mapped to the loaded modules each depends on.
    pub fn dependency_map(&self) -> BTreeMap<&str, &BTreeSet<String>> {
        self.modules
            .values()
            .map(|m| (m.name.as_str(), &m.dependencies))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::DistFixture;

    fn open(fixture: &DistFixture, ignore: &[&str]) -> Distribution {
        Distribution::new(
            fixture.path(),
            ignore.iter().map(|s| s.to_string()),
            LayoutConfig::default(),
        )
        .unwrap()
    }

    fn standard() -> DistFixture {
        DistFixture::new()
            .module("libtbx", None)
            .module(
                "root_module",
                Some("{'modules_required_for_build': ['repo_module']}"),
            )
            .module("cctbx_project/repo_module", None)
    }

    #[test]
    fn test_loads_module_from_secondary_repository() {
        let fixture = standard();
        let mut dist = open(&fixture, &[]);
        assert!(dist.contains("libtbx"));
        dist.request_modules(["root_module"]).unwrap();
        assert!(dist.contains("repo_module"));
        assert_eq!(dist.get("repo_module").unwrap().path, "cctbx_project/repo_module");

        let repo = dist.get("repo_module").unwrap();
        assert!(repo.dependents.contains("root_module"));
        assert!(repo.dependencies.contains("libtbx"));
        assert!(dist.requested().contains("root_module"));
    }

    #[test]
    fn test_missing_requested_module_is_an_error() {
        let fixture = standard();
        let mut dist = open(&fixture, &[]);
        let err = dist.request_modules(["notapackage"]).unwrap_err();
        assert!(matches!(err, DependencyError::RequestedModuleNotFound(ref n) if n == "notapackage"));
    }

    #[test]
    fn test_failed_dependency_rolls_back_module() {
        let fixture = standard().module(
            "broken",
            Some("{'modules_required_for_build': ['bad_dep']}"),
        );
        let mut dist = open(&fixture, &[]);
        let err = dist.request_modules(["broken"]).unwrap_err();
        assert!(matches!(
            err,
            DependencyError::ModuleNotFound { ref name, ref required_by }
                if name == "bad_dep" && required_by == "broken"
        ));
        assert!(!dist.contains("broken"));
        assert!(!dist.get("libtbx").unwrap().dependents.contains("broken"));
    }

    #[test]
    fn test_optional_dependency_is_loaded() {
        let fixture = standard().module(
            "optional_user",
            Some("{'optional_modules': ['repo_module', 'not_there']}"),
        );
        let mut dist = open(&fixture, &[]);
        dist.request_modules(["optional_user"]).unwrap();
        assert!(dist.contains("repo_module"));
        assert!(!dist.contains("not_there"));

        let required: Vec<_> = dist.get("optional_user").unwrap().required.iter().cloned().collect();
        assert_eq!(required, vec!["not_there", "repo_module"]);
    }

    #[test]
    fn test_manifest_round_trip_required_set() {
        let fixture = standard()
            .module(
                "m",
                Some("{'modules_required_for_build': ['x'], 'optional_modules': ['y']}"),
            )
            .module("x", None)
            .module("y", None);
        let mut dist = open(&fixture, &[]);
        dist.request_modules(["m"]).unwrap();
        let module = dist.get("m").unwrap();
        let required: Vec<_> = module.required.iter().cloned().collect();
        assert_eq!(required, vec!["x", "y"]);
        assert!(module.dependencies.contains("y"));
    }

    #[test]
    fn test_ignore_missing_demotes_requirement() {
        let fixture = standard().module(
            "broken",
            Some("{'modules_required_for_use': ['bad_dep', 'repo_module']}"),
        );
        let mut dist = open(&fixture, &["bad_dep"]);
        dist.request_modules(["broken"]).unwrap();
        let module = dist.get("broken").unwrap();
        assert!(module.config.optional_modules.contains("bad_dep"));
        assert!(!module.config.modules_required_for_use.contains("bad_dep"));
        assert!(module.dependencies.contains("repo_module"));
    }

    #[test]
    fn test_dependency_cycle_terminates() {
        let fixture = DistFixture::new()
            .module("libtbx", None)
            .module("a", Some("{'modules_required_for_build': ['b']}"))
            .module("b", Some("{'modules_required_for_use': ['a']}"));
        let mut dist = open(&fixture, &[]);
        dist.request_modules(["a"]).unwrap();
        assert!(dist.get("a").unwrap().dependents.contains("b"));
        assert!(dist.get("b").unwrap().dependents.contains("a"));
    }
}
