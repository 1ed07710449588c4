//! Build information the build scripts do not state.
//!
//! Some facts about a distribution are only visible when it is actually
//! built: which files the refresh step generates, libraries a target links
//! through a side channel, include paths and definitions. A YAML file
//! supplies them and [`apply`] merges them into a read distribution.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{SharedSource, TargetLookupError, TbxDistribution};
use crate::util::config::LayoutConfig;
use crate::util::diagnostic::{suggestions, Diagnostic};
use crate::util::fs::{posix_join, posix_normpath, posix_relpath};

/// The build info used when no file is given.
pub const DEFAULT_BUILD_INFO: &str = include_str!("../build_info.yaml");

/// Key standing for every target in `optional_dependencies` and
/// `required_optional_external`.
const ALL: &str = "all";

#[derive(Debug, Error)]
pub enum BuildInfoError {
    #[error("failed to read build info {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse build info {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("build info `{section}` names target {name}: {source}")]
    UnknownTarget {
        section: &'static str,
        name: String,
        #[source]
        source: TargetLookupError,
    },

    #[error("Unknown scons-repository sources: {}", format_sources(.0))]
    UnknownSources(Vec<(String, String)>),

    #[error("Could not find missing source {target}:{file}")]
    MissingSource { target: String, file: String },
}

fn format_sources(sources: &[(String, String)]) -> String {
    sources
        .iter()
        .map(|(target, source)| format!("{} ({})", source, target))
        .collect::<Vec<_>>()
        .join(", ")
}

impl BuildInfoError {
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            BuildInfoError::UnknownSources(sources) => {
                Diagnostic::error("build scripts use repository sources that do not exist")
                    .with_items("missing", sources.iter().map(|(target, source)| format!("{} (for {})", source, target)))
                    .with_suggestion(suggestions::BUILD_INFO)
            }
            BuildInfoError::MissingSource { target, file } => Diagnostic::error(self.to_string())
                .with_context(format!("{} is not on disk and is not a shared object or generated file", file))
                .with_context(format!("used by target {}", target))
                .with_suggestion(suggestions::BUILD_INFO),
            BuildInfoError::Read { path, .. } => Diagnostic::error(self.to_string()).with_location(path),
            other => Diagnostic::error(other.to_string()),
        }
    }
}

/// One name or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Names {
    One(String),
    Many(Vec<String>),
}

impl Names {
    pub fn as_slice(&self) -> &[String] {
        match self {
            Names::One(name) => std::slice::from_ref(name),
            Names::Many(names) => names,
        }
    }
}

/// Contents of a build info file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildInfo {
    /// Files each module's refresh step generates
    pub libtbx_refresh: IndexMap<String, Vec<String>>,
    /// Generated files not belonging to a single module
    pub other_generated: Vec<String>,
    /// Libraries a target links that its build script does not show
    pub dependencies: IndexMap<String, Names>,
    pub optional_dependencies: IndexMap<String, Names>,
    /// Optional libraries a target or module cannot do without
    pub required_optional_external: IndexMap<String, Names>,
    pub target_includes: IndexMap<String, Names>,
    pub definitions: IndexMap<String, Names>,
}

impl BuildInfo {
    /// Load a build info file, or the built-in default.
    pub fn load(path: Option<&Path>) -> Result<Self, BuildInfoError> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| BuildInfoError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::parse(&text, &path.display().to_string())
            }
            None => Self::parse(DEFAULT_BUILD_INFO, "<default>"),
        }
    }

    pub fn parse(text: &str, origin: &str) -> Result<Self, BuildInfoError> {
        if text.trim().is_empty() {
            return Ok(BuildInfo::default());
        }
        serde_yaml::from_str(text).map_err(|source| BuildInfoError::Parse {
            origin: origin.to_string(),
            source,
        })
    }
}

/// Libraries whose handling applies to the whole distribution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalLibraries {
    /// Linked if available, by every target that does not list them itself
    pub optional: BTreeSet<String>,
    /// Optional in general, but a target asking for one needs it
    pub required_optional: BTreeSet<String>,
}

fn extend_logged(set: &mut BTreeSet<String>, values: &[String], target: &str, list: &str) {
    tracing::debug!("Adding {} to {}'s [{}]", values.join(", "), target, list);
    let already: Vec<&str> = values
        .iter()
        .filter(|v| set.contains(*v))
        .map(String::as_str)
        .collect();
    if !already.is_empty() {
        tracing::debug!("  ... although {} are already on target.{}", already.join(", "), list);
    }
    set.extend(values.iter().cloned());
}

/// Merge `info` into a read and filtered distribution.
pub fn apply(
    info: &BuildInfo,
    dist: &mut TbxDistribution,
    layout: &LayoutConfig,
) -> Result<GlobalLibraries, BuildInfoError> {
    for (module, files) in &info.libtbx_refresh {
        match dist.modules.get_mut(module) {
            Some(module) => module.generated_sources.extend(files.iter().cloned()),
            None => tracing::warn!("No module {}; ignoring its refresh outputs", module),
        }
    }
    dist.other_generated = info.other_generated.clone();

    resolve_lookup_sources(dist, layout)?;
    resolve_missing_sources(dist)?;

    for target in dist.targets().iter() {
        if target.sources.is_empty() && target.shared_sources.is_empty() {
            tracing::warn!(
                "Target {}:{} has no non-generated sources",
                target.origin_path,
                target.name
            );
        }
    }

    for (name, deps) in &info.dependencies {
        let mut targets = dist.targets_mut();
        let target = targets
            .get_mut(name)
            .map_err(|source| BuildInfoError::UnknownTarget {
                section: "dependencies",
                name: name.clone(),
                source,
            })?;
        extend_logged(&mut target.extra_libs, deps.as_slice(), name, "extra_libs");
    }

    let mut globals = GlobalLibraries::default();
    for (name, deps) in &info.optional_dependencies {
        if name == ALL {
            tracing::debug!(
                "Expanding global optional dependency list with: {}",
                deps.as_slice().join(", ")
            );
            globals.optional.extend(deps.as_slice().iter().cloned());
            continue;
        }
        let mut targets = dist.targets_mut();
        match targets.get_mut(name) {
            Ok(target) => {
                extend_logged(&mut target.extra_libs, deps.as_slice(), name, "extra_libs");
                extend_logged(&mut target.optional_extra_libs, deps.as_slice(), name, "optional_extra_libs");
            }
            Err(_) => tracing::warn!("No target {}; ignoring optional dependencies", name),
        }
    }

    for (name, deps) in &info.required_optional_external {
        if name == ALL {
            tracing::debug!(
                "Expanding global required optional dependency list with: {}",
                deps.as_slice().join(", ")
            );
            globals.required_optional.extend(deps.as_slice().iter().cloned());
        } else if let Some(module) = dist.modules.get_mut(name) {
            tracing::warn!(
                "Module {} has 'required_optional_external'; setting all targets within module.",
                name
            );
            for target in &mut module.targets {
                let target_name = target.name.clone();
                extend_logged(&mut target.required_optional, deps.as_slice(), &target_name, "required_optional");
            }
        } else {
            let mut targets = dist.targets_mut();
            match targets.get_mut(name) {
                Ok(target) => {
                    extend_logged(&mut target.required_optional, deps.as_slice(), name, "required_optional")
                }
                Err(_) => tracing::warn!("No target/module named {}; ignoring required optionals", name),
            }
        }
    }

    for (name, includes) in &info.target_includes {
        let includes = includes.as_slice().iter().cloned();
        if dist.targets().contains_name(name) {
            let mut targets = dist.targets_mut();
            if let Ok(target) = targets.get_mut(name) {
                target.include_paths.extend(includes);
            }
        } else if let Some(module) = dist.modules.get_mut(name) {
            module.include_paths.extend(includes);
        } else {
            tracing::warn!(
                "No target/module named {} found; ignoring extra include paths",
                name
            );
        }
    }

    for (name, definitions) in &info.definitions {
        let mut targets = dist.targets_mut();
        match targets.get_mut(name) {
            Ok(target) => target.definitions.extend(definitions.as_slice().iter().cloned()),
            Err(_) => tracing::warn!(
                "No target {}. Cannot add definitions {}",
                name,
                definitions.as_slice().join(", ")
            ),
        }
    }

    Ok(globals)
}

/// Rewrite `#`-prefixed sources, which SCons looks up across the
/// repositories, into generated files or paths relative to the target.
fn resolve_lookup_sources(dist: &mut TbxDistribution, layout: &LayoutConfig) -> Result<(), BuildInfoError> {
    let generated = dist.all_generated();
    let root = dist.module_path.clone();
    let roots = layout.search_roots();
    let mut unknown = Vec::new();

    for target in dist.targets_mut().iter_mut() {
        let lookups: Vec<String> = target
            .sources
            .iter()
            .filter(|s| s.starts_with('#'))
            .cloned()
            .collect();
        for source in lookups {
            let stripped = &source[1..];
            if generated.contains(stripped) {
                target.sources.retain(|s| *s != source);
                target.generated_sources.insert(stripped.to_string());
                continue;
            }
            let found = roots
                .iter()
                .map(|repo| posix_normpath(&posix_join(repo, stripped)))
                .find(|candidate| root.join(candidate).is_file());
            match found {
                Some(candidate) => {
                    target.sources.retain(|s| *s != source);
                    target.sources.push(posix_relpath(&candidate, &target.origin_path));
                }
                None => {
                    tracing::error!(
                        "Unknown {} from {}: {}",
                        target.name,
                        target.origin_path,
                        source
                    );
                    unknown.push((target.name.clone(), source));
                }
            }
        }
    }

    if unknown.is_empty() {
        Ok(())
    } else {
        Err(BuildInfoError::UnknownSources(unknown))
    }
}

/// Sources that are not on disk are shared objects built elsewhere or
/// files produced by a generation step.
fn resolve_missing_sources(dist: &mut TbxDistribution) -> Result<(), BuildInfoError> {
    let generated = dist.all_generated();
    let root = dist.module_path.clone();
    let module_paths: HashMap<String, String> = dist
        .modules
        .values()
        .map(|m| (m.name.clone(), m.path.clone()))
        .collect();
    let shared_objects: HashMap<String, SharedSource> = dist
        .targets()
        .iter()
        .flat_map(|t| t.shared_sources.iter())
        .map(|s| (s.name.clone(), s.clone()))
        .collect();

    for target in dist.targets_mut().iter_mut() {
        for source in target.sources.clone() {
            if root.join(&target.origin_path).join(&source).is_file() {
                continue;
            }
            if let Some(shared) = shared_objects.get(&source) {
                tracing::debug!("Found source {} in shared object list", source);
                target.sources.retain(|s| *s != source);
                target.shared_sources.push(shared.clone());
                continue;
            }
            let module_path = module_paths
                .get(&target.module)
                .map(String::as_str)
                .unwrap_or(".");
            let within = posix_relpath(&target.origin_path, module_path);
            let genpath = posix_normpath(&posix_join(&posix_join(&target.module, &within), &source));
            if !generated.contains(&genpath) {
                return Err(BuildInfoError::MissingSource {
                    target: target.name.clone(),
                    file: source,
                });
            }
            target.sources.retain(|s| *s != source);
            target.generated_sources.insert(genpath);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Module, Target, TargetId, TargetKind};
    use crate::test_support::DistFixture;

    fn dist_with(fixture: &DistFixture, modules: &[(&str, &str)]) -> TbxDistribution {
        let mut map = IndexMap::new();
        for (name, path) in modules {
            let module = Module::open(name, path, fixture.path(), &Default::default()).unwrap();
            map.insert(name.to_string(), module);
        }
        TbxDistribution::new(fixture.path(), map)
    }

    fn add(dist: &mut TbxDistribution, module: &str, origin: &str, name: &str, sources: &[&str]) -> TargetId {
        let id = dist.next_target_id();
        let mut target = Target::new(
            id,
            TargetKind::Shared,
            &format!("#/lib/{}", name),
            sources.iter().map(|s| s.to_string()).collect(),
            Vec::new(),
        );
        target.origin_path = origin.to_string();
        target.prefix = "lib".into();
        assert!(dist.add_target(module, target));
        id
    }

    #[test]
    fn test_default_build_info_parses() {
        let info = BuildInfo::load(None).unwrap();
        assert!(!info.libtbx_refresh.is_empty());
        assert!(info.optional_dependencies.contains_key(ALL));
    }

    #[test]
    fn test_single_name_or_list() {
        let info = BuildInfo::parse(
            "dependencies:\n  a: png\n  b: [GL, GLU]\ndefinitions:\n  a: FOO=1\n",
            "test",
        )
        .unwrap();
        assert_eq!(info.dependencies["a"].as_slice(), ["png".to_string()]);
        assert_eq!(info.dependencies["b"].as_slice().len(), 2);
        assert_eq!(info.definitions["a"], Names::One("FOO=1".into()));
    }

    #[test]
    fn test_lookup_sources_resolved() {
        let fixture = DistFixture::new()
            .file("cctbx_project/scitbx/SConscript", "")
            .file("cctbx_project/scitbx/array/a.cpp", "")
            .file("cctbx_project/scitbx/lbfgs/b.cpp", "");
        let mut dist = dist_with(&fixture, &[("scitbx", "cctbx_project/scitbx")]);
        let id = add(
            &mut dist,
            "scitbx",
            "cctbx_project/scitbx/array",
            "scitbx_lib",
            &["a.cpp", "#scitbx/lbfgs/b.cpp", "#scitbx/generated.cpp"],
        );
        let info = BuildInfo {
            other_generated: vec!["scitbx/generated.cpp".into()],
            ..BuildInfo::default()
        };
        apply(&info, &mut dist, &LayoutConfig::default()).unwrap();

        let target = dist.targets().find(id).unwrap();
        assert_eq!(target.sources, vec!["a.cpp", "../lbfgs/b.cpp"]);
        assert!(target.generated_sources.contains("scitbx/generated.cpp"));
    }

    #[test]
    fn test_unknown_lookup_source_is_fatal() {
        let fixture = DistFixture::new().file("m/SConscript", "");
        let mut dist = dist_with(&fixture, &[("m", "m")]);
        add(&mut dist, "m", "m", "lib_m", &["#nowhere/x.cpp"]);
        let err = apply(&BuildInfo::default(), &mut dist, &LayoutConfig::default()).unwrap_err();
        assert!(matches!(err, BuildInfoError::UnknownSources(ref s) if s[0].1 == "#nowhere/x.cpp"));
    }

    #[test]
    fn test_missing_sources_become_generated_or_shared() {
        let fixture = DistFixture::new()
            .file("cctbx_project/cctbx/SConscript", "")
            .file("cctbx_project/cctbx/wrap_a.cpp", "")
            .file("cctbx_project/cctbx/sub/real.cpp", "");
        let mut dist = dist_with(&fixture, &[("cctbx", "cctbx_project/cctbx")]);
        let object = add(&mut dist, "cctbx", "cctbx_project/cctbx", "shared_wrap_", &["wrap_a.cpp"]);
        let shared = SharedSource {
            name: "wrap_".into(),
            prefix: "wrap_".into(),
            sources: vec!["wrap_a.cpp".into()],
            origin_path: "cctbx_project/cctbx".into(),
            target: object,
        };
        let first = add(&mut dist, "cctbx", "cctbx_project/cctbx/sub", "cctbx_first", &["real.cpp"]);
        dist.targets_mut().find_mut(first).unwrap().shared_sources.push(shared);
        let id = add(
            &mut dist,
            "cctbx",
            "cctbx_project/cctbx/sub",
            "cctbx_sub",
            &["real.cpp", "gen.cpp", "wrap_"],
        );

        let info = BuildInfo {
            libtbx_refresh: [("cctbx".to_string(), vec!["cctbx/sub/gen.cpp".to_string()])]
                .into_iter()
                .collect(),
            ..BuildInfo::default()
        };
        apply(&info, &mut dist, &LayoutConfig::default()).unwrap();

        let target = dist.targets().find(id).unwrap();
        assert_eq!(target.sources, vec!["real.cpp"]);
        assert!(target.generated_sources.contains("cctbx/sub/gen.cpp"));
        assert_eq!(target.shared_sources.len(), 1);
        assert_eq!(target.shared_sources[0].target, object);
        assert!(dist.modules["cctbx"].generated_sources.contains(&"cctbx/sub/gen.cpp".to_string()));
    }

    #[test]
    fn test_missing_source_is_fatal() {
        let fixture = DistFixture::new().file("m/SConscript", "");
        let mut dist = dist_with(&fixture, &[("m", "m")]);
        add(&mut dist, "m", "m", "lib_m", &["gone.cpp"]);
        let err = apply(&BuildInfo::default(), &mut dist, &LayoutConfig::default()).unwrap_err();
        assert_eq!(err.to_string(), "Could not find missing source lib_m:gone.cpp");
    }

    #[test]
    fn test_dependency_sections_applied() {
        let fixture = DistFixture::new()
            .file("m/SConscript", "")
            .file("m/a.cpp", "")
            .file("m/b.cpp", "");
        let mut dist = dist_with(&fixture, &[("m", "m")]);
        let a = add(&mut dist, "m", "m", "alpha", &["a.cpp"]);
        let b = add(&mut dist, "m", "m", "beta", &["b.cpp"]);
        let info = BuildInfo::parse(
            r#"
dependencies:
  alpha: [png]
optional_dependencies:
  all: [hdf5]
  beta: tiff
required_optional_external:
  all: GL
  m: [GLU]
target_includes:
  alpha: include/extra
  m: [module/include]
definitions:
  beta: [USE_TIFF]
  missing: [IGNORED]
"#,
            "test",
        )
        .unwrap();
        let globals = apply(&info, &mut dist, &LayoutConfig::default()).unwrap();

        assert_eq!(globals.optional, BTreeSet::from(["hdf5".to_string()]));
        assert_eq!(globals.required_optional, BTreeSet::from(["GL".to_string()]));
        let alpha = dist.targets().find(a).unwrap();
        let beta = dist.targets().find(b).unwrap();
        assert!(alpha.extra_libs.contains("png"));
        assert!(alpha.include_paths.contains("include/extra"));
        assert!(alpha.required_optional.contains("GLU"));
        assert!(beta.extra_libs.contains("tiff"));
        assert!(beta.optional_extra_libs.contains("tiff"));
        assert!(beta.definitions.contains("USE_TIFF"));
        assert!(dist.modules["m"].include_paths.contains("module/include"));
    }

    #[test]
    fn test_forced_dependency_on_unknown_target_is_fatal() {
        let fixture = DistFixture::new().file("m/SConscript", "");
        let mut dist = dist_with(&fixture, &[("m", "m")]);
        let info = BuildInfo::parse("dependencies:\n  ghost: [png]\n", "test").unwrap();
        let err = apply(&info, &mut dist, &LayoutConfig::default()).unwrap_err();
        assert!(matches!(err, BuildInfoError::UnknownTarget { ref name, .. } if name == "ghost"));
    }
}
