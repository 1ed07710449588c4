//! Finding the module directories of a distribution.

use std::path::Path;

use indexmap::IndexMap;

use crate::core::Module;
use crate::resolver::errors::GraphError;
use crate::util::config::LayoutConfig;
use crate::util::fs::{has_file_with_extension, subdirectories};

/// Directory names that are never modules.
const IGNORED_NAMES: &[&str] = &["__pycache__"];

/// Every direct subdirectory of the root and of each secondary repository
/// is a module candidate. A name found twice is settled by
/// [`Module::looks_like_module`], then by which candidate holds python
/// files; if neither decides, discovery fails.
pub fn find_modules(root: &Path, layout: &LayoutConfig) -> Result<IndexMap<String, Module>, GraphError> {
    let mut candidates: Vec<String> = subdirectories(root)
        .map_err(GraphError::Scan)?
        .into_iter()
        .filter(|name| !layout.repositories.contains(name))
        .collect();
    for repo in &layout.repositories {
        let repo_dir = root.join(repo);
        if !repo_dir.is_dir() {
            continue;
        }
        for name in subdirectories(&repo_dir).map_err(GraphError::Scan)? {
            candidates.push(format!("{}/{}", repo, name));
        }
    }

    let mut modules: IndexMap<String, Module> = IndexMap::new();
    for path in candidates {
        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
        if IGNORED_NAMES.contains(&name.as_str()) {
            continue;
        }
        let mut module = Module::open(&name, &path, root, &layout.module_aliases)?;
        if let Some(existing) = modules.get(&name) {
            module = choose_candidate(existing, module)?;
        }
        modules.insert(name, module);
    }
    Ok(modules)
}

fn choose_candidate(existing: &Module, new: Module) -> Result<Module, GraphError> {
    let pick = |test: &dyn Fn(&Module) -> bool| match (test(existing), test(&new)) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        _ => None,
    };
    let keep_existing = match pick(&Module::looks_like_module) {
        Some(choice) => Some(choice),
        None => {
            tracing::debug!(
                "Cannot disambiguate {} and {}; resorting to .py check",
                existing.path,
                new.path
            );
            pick(&|m: &Module| has_file_with_extension(&m.dir(), "py"))
        }
    };
    let Some(keep_existing) = keep_existing else {
        return Err(GraphError::AmbiguousModule {
            name: new.name.clone(),
            first: existing.path.clone(),
            second: new.path.clone(),
        });
    };
    tracing::info!(
        "Resolving module ambiguity between {} and {} = {}",
        existing.path,
        new.path,
        if keep_existing { &existing.path } else { &new.path }
    );
    Ok(if keep_existing { existing.clone() } else { new })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::DistFixture;

    #[test]
    fn test_finds_root_and_repository_modules() {
        let fixture = DistFixture::new()
            .module("libtbx", Some("{}"))
            .module("cctbx_project/scitbx", None)
            .module(".hidden", None)
            .module("__pycache__", None);
        let modules = find_modules(fixture.path(), &LayoutConfig::default()).unwrap();
        let names: Vec<&str> = modules.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["libtbx", "scitbx"]);
        assert_eq!(modules["scitbx"].path, "cctbx_project/scitbx");
    }

    #[test]
    fn test_duplicate_prefers_real_module() {
        let fixture = DistFixture::new()
            .module("dxtbx", None)
            .file("cctbx_project/dxtbx/SConscript", "");
        let modules = find_modules(fixture.path(), &LayoutConfig::default()).unwrap();
        assert_eq!(modules["dxtbx"].path, "cctbx_project/dxtbx");
    }

    #[test]
    fn test_duplicate_falls_back_to_python_files() {
        let fixture = DistFixture::new()
            .file("boost/__init__.py", "")
            .module("cctbx_project/boost", None);
        let modules = find_modules(fixture.path(), &LayoutConfig::default()).unwrap();
        assert_eq!(modules["boost"].path, "boost");
    }

    #[test]
    fn test_undecidable_duplicate_is_an_error() {
        let fixture = DistFixture::new()
            .module("dup", None)
            .module("cctbx_project/dup", None);
        let err = find_modules(fixture.path(), &LayoutConfig::default()).unwrap_err();
        assert!(matches!(err, GraphError::AmbiguousModule { ref name, .. } if name == "dup"));
    }
}
