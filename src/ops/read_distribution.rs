//! Reading a whole distribution: every build script, then the filtering
//! passes that turn the raw recording into a consistent target model.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::rc::Rc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::core::{TargetId, TargetKind, TbxDistribution};
use crate::emulator::intercept::SystemProbe;
use crate::emulator::{Emulator, ModuleOutcome, RealSystem};
use crate::resolver::{self, GraphError};
use crate::script::ScriptError;
use crate::util::config::{Config, FilterConfig};
use crate::util::diagnostic::{suggestions, Diagnostic, UnexpectedLibraryError};
use crate::util::fs::posix_normpath;

/// A distribution read that cannot produce a consistent model.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("failed to parse build script of module {module}: {source}")]
    Script {
        module: String,
        #[source]
        source: ScriptError,
    },

    #[error("Module name not enough to disambiguate duplicate targets named {name}")]
    AmbiguousDuplicate { name: String, modules: Vec<String> },

    #[error("Deduplication failed: target name {0} is still used more than once")]
    DeduplicationFailed(String),

    #[error("Target {target} is not owned by any module")]
    Orphan { target: String },

    #[error("{kind} target {target} has prefix `{prefix}`, expected `{expected}`")]
    Prefix {
        target: String,
        kind: TargetKind,
        prefix: String,
        expected: &'static str,
    },

    #[error(transparent)]
    UnexpectedLibraries(#[from] UnexpectedLibraryError),
}

impl ReadError {
    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            ReadError::Graph(err) => err.to_diagnostic(),
            ReadError::Script { module, source } => {
                let mut diag = Diagnostic::error(self.to_string())
                    .with_context(format!("module: {}", module))
                    .with_suggestion(suggestions::VERBOSE);
                if let Some(script) = source.script() {
                    diag = diag.with_location(script);
                }
                diag
            }
            ReadError::AmbiguousDuplicate { modules, .. } => Diagnostic::error(self.to_string())
                .with_items("declared in module", modules)
                .with_context("a module declares more than one target of this name"),
            ReadError::UnexpectedLibraries(err) => {
                let mut diag = Diagnostic::error(err.to_string());
                for (library, targets) in &err.sources {
                    diag = diag.with_context(format!("{} linked by: {}", library, targets.join(", ")));
                }
                diag.with_suggestion(suggestions::EXPECTED_LIBRARIES)
            }
            other => Diagnostic::error(other.to_string()),
        }
    }
}

/// Result of running every build script, before filtering.
#[derive(Debug)]
pub struct ScriptsRead {
    pub dist: TbxDistribution,
    /// How each module with a build script ended, in processing order
    pub outcomes: IndexMap<String, ModuleOutcome>,
}

impl ScriptsRead {
    /// Modules whose script could not be fully parsed.
    pub fn skipped(&self) -> impl Iterator<Item = (&str, &ModuleOutcome)> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| !matches!(outcome, ModuleOutcome::Parsed | ModuleOutcome::NoScript))
            .map(|(name, outcome)| (name.as_str(), outcome))
    }
}

/// Parse every module's build script, dependencies first.
pub fn read_module_path_sconscripts(module_path: &Path, config: &Config) -> Result<ScriptsRead, ReadError> {
    read_with_probe(module_path, config, Rc::new(RealSystem))
}

pub fn read_with_probe(
    module_path: &Path,
    config: &Config,
    probe: Rc<dyn SystemProbe>,
) -> Result<ScriptsRead, ReadError> {
    let module_path = std::path::absolute(module_path).unwrap_or_else(|_| module_path.to_path_buf());
    let resolved = resolver::resolve(&module_path, &config.layout)?;
    let order = resolved.processing_order();
    tracing::debug!("Dependency processing order: {}", order.join(", "));

    let dist = TbxDistribution::new(&module_path, resolved.modules);
    let mut emulator = Emulator::new(dist, config.layout.clone(), config.filters.clone(), probe);
    let mut outcomes = IndexMap::new();
    for name in order {
        let has_script = emulator
            .distribution()
            .modules
            .get(&name)
            .is_some_and(|m| m.has_sconscript());
        if !has_script {
            continue;
        }
        let outcome = emulator.parse_module(&name).map_err(|source| ReadError::Script {
            module: name.clone(),
            source,
        })?;
        outcomes.insert(name, outcome);
    }
    let dist = emulator.into_distribution();

    tracing::info!("Found modules:");
    let width = dist.modules.keys().map(String::len).max().unwrap_or(0);
    let mut names: Vec<&String> = dist.modules.keys().collect();
    names.sort();
    for name in names {
        let module = &dist.modules[name];
        if module.looks_like_module() {
            tracing::info!("  {:<width$}  {}", module.name, module.path, width = width);
        }
    }
    tracing::info!("Processing of SConscripts done.");
    tracing::info!("{} Targets recognised", dist.targets().len());

    Ok(ScriptsRead { dist, outcomes })
}

/// Read a distribution and filter it into its final target model.
pub fn read_distribution(module_path: &Path, config: &Config) -> Result<TbxDistribution, ReadError> {
    let read = read_module_path_sconscripts(module_path, config)?;
    let mut dist = read.dist;
    post_process(&mut dist, &config.filters)?;
    Ok(dist)
}

/// The filtering passes, in order. Each pass sees the result of the last.
pub fn post_process(dist: &mut TbxDistribution, filters: &FilterConfig) -> Result<(), ReadError> {
    remove_external_targets(dist, filters);
    remove_unsupported_modules(dist, filters);
    remove_cuda_targets(dist, filters);
    deduplicate_target_names(dist)?;
    classify_extension_modules(dist, filters);
    check_target_invariants(dist)?;
    move_module_named_targets(dist);
    drop_non_modules(dist);
    check_external_libraries(dist, filters)?;
    Ok(())
}

fn remove_external_targets(dist: &mut TbxDistribution, filters: &FilterConfig) {
    let doomed: Vec<TargetId> = dist
        .targets()
        .iter()
        .filter(|t| filters.removed_targets.contains(&t.name))
        .map(|t| {
            tracing::info!("Removing target {} (in {})", t.name, t.module);
            t.id
        })
        .collect();
    dist.targets_mut().remove_all(doomed);
}

fn remove_unsupported_modules(dist: &mut TbxDistribution, filters: &FilterConfig) {
    for name in &filters.removed_modules {
        if let Some(module) = dist.remove_module(name) {
            tracing::info!("Removing module {} ({} targets)", name, module.targets.len());
        }
    }
}

fn remove_cuda_targets(dist: &mut TbxDistribution, filters: &FilterConfig) {
    let cuda: Vec<TargetId> = dist
        .targets()
        .iter()
        .filter(|t| t.kind == TargetKind::CudaLib || t.extra_libs.contains(&filters.cuda_marker_library))
        .map(|t| t.id)
        .collect();
    for id in cuda {
        let Some(target) = dist.targets_mut().remove(id) else {
            continue;
        };
        tracing::info!("Removing CUDA target {}", target.name);
        let link_name = target.link_name();
        for dependent in dist.targets_mut().iter_mut() {
            if dependent.extra_libs.remove(&link_name) {
                tracing::debug!("- removing {} from {}", link_name, dependent.name);
            }
        }
    }
}

/// Rename targets sharing a name to `<name>_<module>`.
fn deduplicate_target_names(dist: &mut TbxDistribution) -> Result<(), ReadError> {
    let mut by_name: BTreeMap<String, Vec<(TargetId, String)>> = BTreeMap::new();
    for target in dist.targets().iter() {
        by_name
            .entry(target.name.clone())
            .or_default()
            .push((target.id, target.module.clone()));
    }

    for (name, duplicates) in by_name.into_iter().filter(|(_, d)| d.len() > 1) {
        let modules: BTreeSet<&String> = duplicates.iter().map(|(_, m)| m).collect();
        if modules.len() < duplicates.len() {
            return Err(ReadError::AmbiguousDuplicate {
                name,
                modules: duplicates.into_iter().map(|(_, m)| m).collect(),
            });
        }
        for (id, module) in &duplicates {
            if let Some(target) = dist.targets_mut().find_mut(*id) {
                target.name = format!("{}_{}", name, module);
                tracing::info!("Renaming target {} to {}", name, target.name);
            }
        }
    }

    let mut seen = BTreeSet::new();
    for target in dist.targets().iter() {
        if !seen.insert(target.name.as_str()) {
            return Err(ReadError::DeduplicationFailed(target.name.clone()));
        }
    }
    Ok(())
}

fn classify_extension_modules(dist: &mut TbxDistribution, filters: &FilterConfig) {
    for target in dist.targets_mut().iter_mut() {
        if target.extra_libs.contains(&filters.extension_library)
            && target.prefix.is_empty()
            && target.kind != TargetKind::Object
        {
            target.kind = TargetKind::Module;
        }
    }
}

fn check_target_invariants(dist: &TbxDistribution) -> Result<(), ReadError> {
    for target in dist.targets().iter() {
        if target.module.is_empty() || !dist.modules.contains_key(&target.module) {
            return Err(ReadError::Orphan {
                target: target.name.clone(),
            });
        }
        let expected = match target.kind {
            TargetKind::Shared | TargetKind::Static => "lib",
            TargetKind::Module => "",
            _ => continue,
        };
        if target.prefix != expected {
            return Err(ReadError::Prefix {
                target: target.name.clone(),
                kind: target.kind,
                prefix: target.prefix.clone(),
                expected,
            });
        }
    }
    Ok(())
}

/// A target named after a module belongs in that module's root directory.
fn move_module_named_targets(dist: &mut TbxDistribution) {
    let violating: Vec<(TargetId, String, String)> = dist
        .targets()
        .iter()
        .filter_map(|t| {
            let module = dist.modules.get(&t.name)?;
            (posix_normpath(&t.origin_path) != posix_normpath(&module.path))
                .then(|| (t.id, t.name.clone(), t.module.clone()))
        })
        .collect();
    for (id, name, from) in violating {
        tracing::info!("Moving module-named target {} to module {} from {}", name, name, from);
        let path = dist.modules[&name].path.clone();
        let mut targets = dist.targets_mut();
        if targets.move_to(id, &name) {
            if let Some(target) = targets.find_mut(id) {
                target.origin_path = path;
            }
        }
    }
}

fn drop_non_modules(dist: &mut TbxDistribution) {
    let doomed: Vec<String> = dist
        .modules
        .values()
        .filter(|m| !m.looks_like_module())
        .map(|m| m.name.clone())
        .collect();
    for name in doomed {
        dist.remove_module(&name);
        tracing::debug!("Removing module {} because no targets", name);
    }
}

fn check_external_libraries(dist: &TbxDistribution, filters: &FilterConfig) -> Result<(), ReadError> {
    let targets = dist.targets();
    let all_libs: BTreeSet<&str> = targets
        .iter()
        .flat_map(|t| t.extra_libs.iter().map(String::as_str))
        .collect();
    let names: BTreeSet<&str> = targets.iter().map(|t| t.name.as_str()).collect();
    let external: Vec<&str> = all_libs.difference(&names).copied().collect();
    tracing::info!(
        "All linked libraries: {}",
        all_libs.iter().copied().collect::<Vec<_>>().join(", ")
    );
    tracing::info!("All external (w/o universal): {}", external.join(", "));
    tracing::info!("{} Targets remaining", targets.len());

    let unexpected: Vec<&str> = external
        .into_iter()
        .filter(|lib| !filters.expected_external_libraries.contains(*lib))
        .collect();
    if unexpected.is_empty() {
        return Ok(());
    }
    let mut sources = Vec::new();
    for lib in &unexpected {
        let from: Vec<String> = targets
            .iter()
            .filter(|t| t.extra_libs.contains(*lib))
            .map(|t| t.name.clone())
            .collect();
        tracing::error!("Got unexpected extra lib: {} from: {}", lib, from.join(", "));
        sources.push((lib.to_string(), from));
    }
    Err(UnexpectedLibraryError {
        libraries: unexpected.into_iter().map(str::to_string).collect(),
        sources,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Module, Target};
    use crate::test_support::DistFixture;

    /// A distribution with one module per name, each module directory
    /// holding a build script so it survives the final module filter.
    fn dist_with(fixture: &DistFixture, modules: &[&str]) -> TbxDistribution {
        let mut map = IndexMap::new();
        for name in modules {
            let module = Module::open(name, name, fixture.path(), &Default::default()).unwrap();
            map.insert(name.to_string(), module);
        }
        TbxDistribution::new(fixture.path(), map)
    }

    fn add(dist: &mut TbxDistribution, module: &str, kind: TargetKind, name: &str, libs: &[&str]) -> TargetId {
        let id = dist.next_target_id();
        let mut target = Target::new(id, kind, &format!("#/lib/{}", name), vec!["a.cpp".into()], Vec::new());
        target.prefix = match kind {
            TargetKind::Shared | TargetKind::Static => "lib".into(),
            _ => String::new(),
        };
        target.origin_path = module.to_string();
        target.extra_libs = libs.iter().map(|s| s.to_string()).collect();
        assert!(dist.add_target(module, target));
        id
    }

    fn scripted(modules: &[&str]) -> DistFixture {
        let mut fixture = DistFixture::new();
        for name in modules {
            fixture = fixture.file(&format!("{}/SConscript", name), "");
        }
        fixture
    }

    #[test]
    fn test_external_and_cuda_targets_are_removed() {
        let fixture = scripted(&["scitbx", "cudatbx"]);
        let mut dist = dist_with(&fixture, &["scitbx", "cudatbx"]);
        add(&mut dist, "scitbx", TargetKind::Shared, "boost_python", &[]);
        add(&mut dist, "cudatbx", TargetKind::CudaLib, "cuda_kernels", &[]);
        add(&mut dist, "cudatbx", TargetKind::Shared, "fft_gpu", &["cufft"]);
        let user = add(&mut dist, "scitbx", TargetKind::Shared, "scitbx_lib", &["cuda_kernels", "fft_gpu"]);

        post_process(&mut dist, &FilterConfig::default()).unwrap();

        let names: Vec<&str> = dist.targets().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["scitbx_lib"]);
        assert!(dist.targets().find(user).unwrap().extra_libs.is_empty());
    }

    #[test]
    fn test_unsupported_modules_are_removed() {
        let fixture = scripted(&["clipper", "iotbx"]);
        let mut dist = dist_with(&fixture, &["clipper", "iotbx"]);
        add(&mut dist, "clipper", TargetKind::Shared, "clipper_core", &[]);
        post_process(&mut dist, &FilterConfig::default()).unwrap();
        assert!(!dist.modules.contains_key("clipper"));
        assert!(dist.targets().is_empty());
    }

    #[test]
    fn test_duplicates_renamed_by_module() {
        let fixture = scripted(&["a", "b"]);
        let mut dist = dist_with(&fixture, &["a", "b"]);
        add(&mut dist, "a", TargetKind::Program, "tool", &[]);
        add(&mut dist, "b", TargetKind::Program, "tool", &[]);
        post_process(&mut dist, &FilterConfig::default()).unwrap();

        let mut names: Vec<String> = dist.targets().iter().map(|t| t.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["tool_a", "tool_b"]);
        assert!(dist.targets().iter().all(|t| t.filename == "tool"));
    }

    #[test]
    fn test_deduplication_is_idempotent() {
        let fixture = scripted(&["dxtbx", "xfel"]);
        let mut dist = dist_with(&fixture, &["dxtbx", "xfel"]);
        add(&mut dist, "dxtbx", TargetKind::Shared, "utils", &[]);
        add(&mut dist, "xfel", TargetKind::Shared, "utils", &[]);
        add(&mut dist, "xfel", TargetKind::Program, "xfel.merge", &[]);

        let names = |dist: &TbxDistribution| -> BTreeSet<String> {
            dist.targets().iter().map(|t| t.name.clone()).collect()
        };
        deduplicate_target_names(&mut dist).unwrap();
        let once = names(&dist);
        deduplicate_target_names(&mut dist).unwrap();
        assert_eq!(names(&dist), once);
        assert!(once.contains("utils_dxtbx") && once.contains("utils_xfel"));
    }

    #[test]
    fn test_duplicates_within_one_module_are_fatal() {
        let fixture = scripted(&["a"]);
        let mut dist = dist_with(&fixture, &["a"]);
        add(&mut dist, "a", TargetKind::Program, "tool", &[]);
        add(&mut dist, "a", TargetKind::Program, "tool", &[]);
        let err = post_process(&mut dist, &FilterConfig::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Module name not enough to disambiguate duplicate targets named tool"
        );
        assert!(err.to_diagnostic().format(false).contains("declared in module a"));
    }

    #[test]
    fn test_extension_targets_become_modules() {
        let fixture = scripted(&["scitbx"]);
        let mut dist = dist_with(&fixture, &["scitbx"]);
        let ext = add(&mut dist, "scitbx", TargetKind::Program, "scitbx_ext", &["boost_python"]);
        let obj = add(&mut dist, "scitbx", TargetKind::Object, "shared_x", &["boost_python"]);
        post_process(&mut dist, &FilterConfig::default()).unwrap();
        assert_eq!(dist.targets().find(ext).unwrap().kind, TargetKind::Module);
        assert_eq!(dist.targets().find(obj).unwrap().kind, TargetKind::Object);
    }

    #[test]
    fn test_prefix_invariant_is_checked() {
        let fixture = scripted(&["m"]);
        let mut dist = dist_with(&fixture, &["m"]);
        let id = add(&mut dist, "m", TargetKind::Static, "thing", &[]);
        dist.targets_mut().find_mut(id).unwrap().prefix = String::new();
        let err = post_process(&mut dist, &FilterConfig::default()).unwrap_err();
        assert!(matches!(err, ReadError::Prefix { ref target, .. } if target == "thing"));
    }

    #[test]
    fn test_module_named_target_moves_home() {
        let fixture = scripted(&["iotbx", "ccp4io"]);
        let mut dist = dist_with(&fixture, &["iotbx", "ccp4io"]);
        let id = add(&mut dist, "iotbx", TargetKind::Static, "ccp4io", &[]);
        post_process(&mut dist, &FilterConfig::default()).unwrap();
        let target = dist.targets().find(id).unwrap();
        assert_eq!(target.module, "ccp4io");
        assert_eq!(target.origin_path, "ccp4io");
        assert!(dist.modules["iotbx"].targets.is_empty());
    }

    #[test]
    fn test_non_modules_are_dropped() {
        let fixture = scripted(&["real"]).module("docs", None);
        let mut dist = dist_with(&fixture, &["real", "docs"]);
        post_process(&mut dist, &FilterConfig::default()).unwrap();
        assert!(dist.modules.contains_key("real"));
        assert!(!dist.modules.contains_key("docs"));
    }

    #[test]
    fn test_unexpected_external_library_is_fatal() {
        let fixture = scripted(&["m"]);
        let mut dist = dist_with(&fixture, &["m"]);
        add(&mut dist, "m", TargetKind::Shared, "core", &["png", "fftw3f"]);
        add(&mut dist, "m", TargetKind::Program, "tool", &["core"]);
        let err = post_process(&mut dist, &FilterConfig::default()).unwrap_err();
        assert_eq!(err.to_string(), "Unexpected extra external libs: fftw3f");
        assert!(err.to_diagnostic().format(false).contains("fftw3f linked by: core"));
    }
}
