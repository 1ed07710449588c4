//! Modules of a distribution and their `libtbx_config` manifests.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::core::distribution::DependencyError;
use crate::core::target::Target;
use crate::script::{literal_eval, Value};

/// Name of the per-module dependency manifest.
pub const MANIFEST_NAME: &str = "libtbx_config";
/// Name of the per-module build script.
pub const SCONSCRIPT_NAME: &str = "SConscript";
/// Name of the per-module generation script.
pub const REFRESH_NAME: &str = "libtbx_refresh.py";

/// How strongly a module requires one of its dependencies.
///
/// Ordered strongest first, so `min()` picks the strongest declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DependencyKind {
    Build,
    Use,
    Optional,
}

impl DependencyKind {
    /// Manifest key declaring this kind of dependency.
    pub fn manifest_key(&self) -> &'static str {
        match self {
            DependencyKind::Build => "modules_required_for_build",
            DependencyKind::Use => "modules_required_for_use",
            DependencyKind::Optional => "optional_modules",
        }
    }
}

/// Parsed contents of a module's `libtbx_config`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleConfig {
    pub modules_required_for_build: BTreeSet<String>,
    pub modules_required_for_use: BTreeSet<String>,
    pub optional_modules: BTreeSet<String>,
    pub exclude_from_binary_bundle: BTreeSet<String>,
    /// Extra paths (other than `.`) holding `command_line` directories
    pub extra_command_line_locations: BTreeSet<String>,
}

impl ModuleConfig {
    /// Read a manifest file. Unknown keys are logged and ignored.
    pub fn read(path: &Path, module: &str) -> Result<Self, DependencyError> {
        let text = std::fs::read_to_string(path).map_err(|source| DependencyError::ManifestRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, module).map_err(|message| DependencyError::ManifestParse {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Parse manifest text: a literal dict of lists of module names.
    pub fn parse(text: &str, module: &str) -> Result<Self, String> {
        let value = literal_eval(text).map_err(|e| e.to_string())?;
        let Value::Dict(entries) = &value else {
            return Err(format!("expected a dict, found {}", value.type_name()));
        };
        let mut config = ModuleConfig::default();
        for (key, value) in entries.borrow().iter() {
            let key = key.to_value().display();
            let slot = match key.as_str() {
                "modules_required_for_build" => &mut config.modules_required_for_build,
                "modules_required_for_use" => &mut config.modules_required_for_use,
                "optional_modules" => &mut config.optional_modules,
                "exclude_from_binary_bundle" => &mut config.exclude_from_binary_bundle,
                "extra_command_line_locations" => &mut config.extra_command_line_locations,
                other => {
                    tracing::warn!("Unknown libtbx_config key {} in module {}", other, module);
                    continue;
                }
            };
            *slot = string_set(value).ok_or_else(|| format!("`{}` must be a list of names", key))?;
        }
        Ok(config)
    }

    pub fn dependencies(&self, kind: DependencyKind) -> &BTreeSet<String> {
        match kind {
            DependencyKind::Build => &self.modules_required_for_build,
            DependencyKind::Use => &self.modules_required_for_use,
            DependencyKind::Optional => &self.optional_modules,
        }
    }

    pub fn dependencies_mut(&mut self, kind: DependencyKind) -> &mut BTreeSet<String> {
        match kind {
            DependencyKind::Build => &mut self.modules_required_for_build,
            DependencyKind::Use => &mut self.modules_required_for_use,
            DependencyKind::Optional => &mut self.optional_modules,
        }
    }

    /// The strongest kind under which `dependency` is declared.
    pub fn kind_of(&self, dependency: &str) -> Option<DependencyKind> {
        [DependencyKind::Build, DependencyKind::Use, DependencyKind::Optional]
            .into_iter()
            .find(|kind| self.dependencies(*kind).contains(dependency))
    }

    /// Build and use requirements; missing ones are fatal.
    pub fn hard_requirements(&self) -> BTreeSet<String> {
        self.modules_required_for_build
            .union(&self.modules_required_for_use)
            .cloned()
            .collect()
    }

    /// Every declared dependency, with `aliases` applied.
    pub fn required(&self, aliases: &BTreeMap<String, String>) -> BTreeSet<String> {
        self.modules_required_for_build
            .iter()
            .chain(&self.modules_required_for_use)
            .chain(&self.optional_modules)
            .map(|name| aliases.get(name).unwrap_or(name).clone())
            .collect()
    }

    /// Like [`ModuleConfig::kind_of`], also matching a dependency that was
    /// declared through an alias.
    pub fn kind_of_aliased(
        &self,
        dependency: &str,
        aliases: &BTreeMap<String, String>,
    ) -> Option<DependencyKind> {
        let direct = self.kind_of(dependency);
        let via_alias = aliases
            .iter()
            .filter(|(_, target)| target.as_str() == dependency)
            .filter_map(|(alias, _)| self.kind_of(alias))
            .min();
        match (direct, via_alias) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

fn string_set(value: &Value) -> Option<BTreeSet<String>> {
    match value {
        Value::List(items) => items.borrow().iter().map(|v| v.as_str().map(str::to_string)).collect(),
        Value::Tuple(items) => items.iter().map(|v| v.as_str().map(str::to_string)).collect(),
        Value::Str(s) => Some(BTreeSet::from([s.to_string()])),
        _ => None,
    }
}

/// A module: one directory of the distribution.
#[derive(Debug, Clone)]
pub struct Module {
    /// Basename of the module directory
    pub name: String,
    /// Location relative to the distribution root, `/`-separated
    pub path: String,
    /// The distribution root
    pub root: PathBuf,
    pub config: ModuleConfig,
    /// Names of every module this one needs, aliases applied
    pub required: BTreeSet<String>,
    pub targets: Vec<Target>,
    /// Paths produced by the refresh step
    pub generated_sources: Vec<String>,
    pub include_paths: BTreeSet<String>,
    /// Loaded modules this one depends on
    pub dependencies: BTreeSet<String>,
    /// Loaded modules that depend on this one
    pub dependents: BTreeSet<String>,
}

impl Module {
    /// Open the module at `path` under `root`, reading its manifest if any.
    pub fn open(
        name: &str,
        path: &str,
        root: &Path,
        aliases: &BTreeMap<String, String>,
    ) -> Result<Self, DependencyError> {
        let mut module = Module {
            name: name.to_string(),
            path: path.to_string(),
            root: root.to_path_buf(),
            config: ModuleConfig::default(),
            required: BTreeSet::new(),
            targets: Vec::new(),
            generated_sources: Vec::new(),
            include_paths: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
        };
        if module.has_config() {
            module.config = ModuleConfig::read(&module.dir().join(MANIFEST_NAME), name)?;
            module.required = module.config.required(aliases);
        }
        Ok(module)
    }

    /// Absolute directory of the module.
    pub fn dir(&self) -> PathBuf {
        self.root.join(&self.path)
    }

    pub fn has_sconscript(&self) -> bool {
        self.dir().join(SCONSCRIPT_NAME).is_file()
    }

    pub fn has_config(&self) -> bool {
        self.dir().join(MANIFEST_NAME).is_file()
    }

    pub fn has_refresh(&self) -> bool {
        self.dir().join(REFRESH_NAME).is_file()
    }

    /// Whether anything marks this directory as a real module.
    pub fn looks_like_module(&self) -> bool {
        self.has_sconscript()
            || self.has_config()
            || self.has_refresh()
            || !self.targets.is_empty()
            || self.dir().join("command_line").is_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_manifest_with_trailing_commas() {
        let config = ModuleConfig::parse(
            "{\n  'modules_required_for_build': ['boost', 'scitbx',],\n  'optional_modules': ['annlib'],\n}\n",
            "cctbx",
        )
        .unwrap();
        assert_eq!(config.kind_of("scitbx"), Some(DependencyKind::Build));
        assert_eq!(config.kind_of("annlib"), Some(DependencyKind::Optional));
        assert_eq!(config.kind_of("missing"), None);

        let aliases = crate::util::config::LayoutConfig::default().module_aliases;
        let required: Vec<_> = config.required(&aliases).into_iter().collect();
        assert_eq!(required, vec!["annlib_adaptbx", "boost_adaptbx", "scitbx"]);
        assert_eq!(
            config.kind_of_aliased("boost_adaptbx", &aliases),
            Some(DependencyKind::Build)
        );
    }

    #[test]
    fn test_strongest_declaration_wins() {
        let config = ModuleConfig::parse(
            "{'modules_required_for_use': ['x'], 'optional_modules': ['x'], 'modules_required_for_build': ['x']}",
            "m",
        )
        .unwrap();
        assert_eq!(config.kind_of("x"), Some(DependencyKind::Build));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let config = ModuleConfig::parse("{'python_paths': ['x'], 'optional_modules': []}", "m").unwrap();
        assert_eq!(config, ModuleConfig::default());
    }

    #[test]
    fn test_non_list_value_is_rejected() {
        assert!(ModuleConfig::parse("{'optional_modules': 3}", "m").is_err());
        assert!(ModuleConfig::parse("['x']", "m").is_err());
    }

    #[test]
    fn test_looks_like_module() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("empty")).unwrap();
        std::fs::create_dir_all(tmp.path().join("tool/command_line")).unwrap();
        let aliases = BTreeMap::new();

        let empty = Module::open("empty", "empty", tmp.path(), &aliases).unwrap();
        assert!(!empty.looks_like_module());
        let tool = Module::open("tool", "tool", tmp.path(), &aliases).unwrap();
        assert!(tool.looks_like_module());
    }
}
