//! Recording targets from builder calls.
//!
//! Every `env.SharedLibrary(...)`-style call snapshots the calling
//! environment, normalizes its libraries and link flags, and records a
//! [`Target`] against the module being parsed.

use std::collections::BTreeSet;
use std::path::Path;

use indexmap::IndexMap;

use crate::core::{SharedSource, Target, TargetKind};
use crate::emulator::environment::Environment;
use crate::emulator::objects::{HostObject, SharedObjectRef};
use crate::emulator::Emulator;
use crate::script::{ScriptError, Value};
use crate::util::fs::{posix_join, posix_stem, to_posix};

/// Include paths every environment carries; only the others are reported.
const COMMON_INCLUDES: &[&str] = &[
    ".",
    "DISTPATH",
    "PYTHON/INCLUDE/PATH",
    "UNDERBUILD/include",
    "DISTPATH/boost",
    "REPOSITORIES",
    "BASEDIR/include",
];

/// Sources of a builder call, split into files and shared objects.
#[derive(Debug, Default)]
pub(crate) struct Sources {
    pub files: Vec<String>,
    pub shared: Vec<SharedSource>,
}

impl Sources {
    /// Flatten a `source=` argument: strings, nested lists, and shared
    /// objects are accepted.
    pub fn collect(value: &Value) -> Result<Self, ScriptError> {
        let mut sources = Sources::default();
        sources.push(value)?;
        Ok(sources)
    }

    fn push(&mut self, value: &Value) -> Result<(), ScriptError> {
        match value {
            Value::Str(s) => self.files.push(s.to_string()),
            Value::List(items) => {
                for item in items.borrow().iter() {
                    self.push_item(item)?;
                }
            }
            Value::Tuple(items) => {
                for item in items.iter() {
                    self.push_item(item)?;
                }
            }
            // A shared object passed directly stands for its own sources
            Value::Host(_) => match HostObject::from_value(value) {
                Some(HostObject::SharedObject(obj)) => {
                    self.files.extend(obj.source.sources.iter().cloned())
                }
                _ => self.files.push(value.display()),
            },
            other => {
                return Err(ScriptError::unsupported(format!(
                    "unexpected builder source of type {}",
                    other.type_name()
                )))
            }
        }
        Ok(())
    }

    fn push_item(&mut self, item: &Value) -> Result<(), ScriptError> {
        match HostObject::from_value(item) {
            Some(HostObject::SharedObject(obj)) => {
                self.shared.push(obj.source.clone());
                Ok(())
            }
            _ => self.push(item),
        }
    }
}

/// The single output path a builder call names.
pub(crate) fn target_name(target: &Value) -> Result<String, ScriptError> {
    let name = match target {
        Value::Str(s) => s.to_string(),
        Value::List(items) => {
            let items = items.borrow();
            match items.as_slice() {
                [single] => single.display(),
                _ => {
                    return Err(ScriptError::unsupported(format!(
                        "builder target list must hold exactly one name, got {}",
                        items.len()
                    )))
                }
            }
        }
        Value::Host(host) => host.display(),
        other => {
            return Err(ScriptError::unsupported(format!(
                "unexpected builder target of type {}",
                other.type_name()
            )))
        }
    };
    Ok(rewrite_lib_target(&name))
}

/// `#libfoo/bar` is shorthand for `#/lib/foo/bar`.
pub(crate) fn rewrite_lib_target(target: &str) -> String {
    let mut parts = target.split('/');
    let first = parts.next().unwrap_or_default();
    match first.strip_prefix("#lib") {
        Some(rest) => ["#", "lib", rest]
            .into_iter()
            .chain(parts)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/"),
        None => target.to_string(),
    }
}

/// Libraries named by a `LIBS` setting, one level of nesting flattened.
pub(crate) fn flatten_libs(libs: &Value) -> Result<BTreeSet<String>, ScriptError> {
    let items = match libs {
        Value::List(items) => items.borrow().clone(),
        Value::Tuple(items) => items.to_vec(),
        single @ Value::Str(_) => vec![single.clone()],
        other => {
            return Err(ScriptError::unsupported(format!(
                "LIBS of type {}",
                other.type_name()
            )))
        }
    };
    let mut flat = BTreeSet::new();
    for lib in items {
        match lib {
            Value::Str(name) => {
                flat.insert(name.to_string());
            }
            Value::List(inner) => {
                flat.extend(inner.borrow().iter().map(Value::display));
            }
            other => {
                return Err(ScriptError::unsupported(format!(
                    "library entry {} is neither a name nor a list",
                    other.repr()
                )))
            }
        }
    }
    Ok(flat)
}

fn string_items(value: &Value) -> Vec<String> {
    match value {
        Value::List(items) => items.borrow().iter().map(Value::display).collect(),
        Value::Tuple(items) => items.iter().map(Value::display).collect(),
        Value::None => Vec::new(),
        other => vec![other.display()],
    }
}

/// Common letters at each position of the source stems. Positions that
/// differ are skipped, not terminal.
pub(crate) fn common_letters(sources: &[String]) -> String {
    let stems: Vec<Vec<char>> = sources.iter().map(|s| posix_stem(s).chars().collect()).collect();
    let shortest = stems.iter().map(Vec::len).min().unwrap_or(0);
    (0..shortest)
        .filter_map(|i| {
            let letter = stems[0][i];
            stems.iter().all(|stem| stem[i] == letter).then_some(letter)
        })
        .collect()
}

/// Parent directory of `script` relative to the distribution root, `.` at
/// the root.
pub(crate) fn origin_of(script: &Path, dist: &Path) -> String {
    let relative = script.strip_prefix(dist).unwrap_or(script);
    let origin = relative.parent().map(to_posix).unwrap_or_default();
    if origin.is_empty() {
        ".".to_string()
    } else {
        origin
    }
}

impl Emulator {
    /// Record a target declared by `env` and return its script handle.
    pub(crate) fn create_target(
        &mut self,
        env: &Environment,
        kind: TargetKind,
        target: &Value,
        source: &Value,
        overrides: IndexMap<String, Value>,
    ) -> Result<Value, ScriptError> {
        let output_name = target_name(target)?;
        let sources = Sources::collect(source)?;
        let script = self.current_script()?.to_path_buf();
        let origin_path = origin_of(&script, &self.dist_path);

        let target_env = env.clone_with(IndexMap::new());
        target_env.append(&overrides)?;

        let mut libs = flatten_libs(&target_env.get("LIBS")?)?;
        libs.retain(|lib| !self.filters.implied_libraries.contains(lib));

        let unknown_flags: Vec<String> = string_items(&target_env.get("SHLINKFLAGS")?)
            .into_iter()
            .filter(|flag| !self.filters.ignored_link_flags.contains(flag))
            .collect();
        if !unknown_flags.is_empty() {
            return Err(ScriptError::unsupported(format!(
                "Unknown link flag: {:?}",
                unknown_flags
            )));
        }

        if let Some(paths) = target_env.explicit("CPPPATH") {
            let extra: BTreeSet<String> = string_items(&paths)
                .into_iter()
                .filter(|p| !COMMON_INCLUDES.contains(&p.as_str()))
                .collect();
            if !extra.is_empty() {
                tracing::debug!("Path: {:?}", extra);
            }
        }

        let module = self
            .current_module
            .clone()
            .ok_or_else(|| ScriptError::unsupported("target declared outside of any module"))?;

        let id = self.dist.next_target_id();
        let mut recorded = Target::new(id, kind, &output_name, sources.files, sources.shared);
        recorded.origin_path = origin_path;
        recorded.extra_libs = libs;
        recorded.prefix = match kind {
            TargetKind::Shared => target_env.get("SHLIBPREFIX")?.display(),
            TargetKind::Static => target_env.get("LIBPREFIX")?.display(),
            _ => String::new(),
        };
        let name = recorded.name.clone();
        recorded.module = module.clone();
        tracing::debug!("{}", recorded);

        if !self.dist.add_target(&module, recorded) {
            return Err(ScriptError::unsupported(format!(
                "module {} is not part of the distribution",
                module
            )));
        }
        Ok(Value::host(HostObject::Target { id, kind, name }))
    }

    /// `env.SharedObject(source, target=None)`: an object compiled once and
    /// usable as a source of other targets, plus the OBJECT target that
    /// builds it.
    pub(crate) fn shared_object(
        &mut self,
        env: &Environment,
        source: &Value,
        target: Option<&Value>,
    ) -> Result<Value, ScriptError> {
        tracing::debug!("Shared object: {}", source.repr());
        let sources = Sources::collect(source)?.files;
        let script = self.current_script()?.to_path_buf();
        let origin_path = origin_of(&script, &self.dist_path);

        let (prefix, name) = match target.filter(|t| !matches!(t, Value::None)) {
            None => {
                // The secondary repository is not part of module paths
                let folder = match origin_path.split_once('/') {
                    Some((first, rest)) if self.layout.repositories.iter().any(|r| r == first) => {
                        rest.to_string()
                    }
                    _ if self.layout.repositories.contains(&origin_path) => ".".to_string(),
                    _ => origin_path.clone(),
                };
                let prefix = common_letters(&sources);
                let name = format!("#{}/{}", folder, prefix);
                (prefix, name)
            }
            Some(target) => {
                let target = target.display();
                match target.strip_suffix(".o") {
                    Some(stripped) => (posix_stem(&target).to_string(), stripped.to_string()),
                    None => {
                        return Err(ScriptError::unsupported(format!(
                            "SharedObject target {} does not end in .o",
                            target
                        )))
                    }
                }
            }
        };

        let output = if origin_path == "." {
            format!("shared_{}", prefix)
        } else {
            posix_join(&origin_path, &format!("shared_{}", prefix))
        };
        let handle = self.create_target(
            env,
            TargetKind::Object,
            &Value::str(&output),
            source,
            IndexMap::new(),
        )?;
        let Some(HostObject::Target { id, .. }) = HostObject::from_value(&handle) else {
            return Err(ScriptError::unsupported("object target was not recorded"));
        };

        Ok(Value::host(HostObject::SharedObject(SharedObjectRef {
            source: SharedSource {
                name,
                prefix,
                sources,
                origin_path,
                target: *id,
            },
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lib_targets_are_rewritten() {
        assert_eq!(rewrite_lib_target("#lib/scitbx_ext"), "#/lib/scitbx_ext");
        assert_eq!(rewrite_lib_target("#libtbx/foo"), "#/lib/tbx/foo");
        assert_eq!(rewrite_lib_target("#/lib/plain"), "#/lib/plain");
        assert_eq!(rewrite_lib_target("bin/prog"), "bin/prog");
    }

    #[test]
    fn test_target_must_name_one_output() {
        assert_eq!(target_name(&Value::string_list(["#lib/x"])).unwrap(), "#/lib/x");
        assert!(matches!(
            target_name(&Value::string_list(["a", "b"])),
            Err(ScriptError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_libs_are_flattened() {
        let libs = Value::list(vec![
            Value::str("cctbx"),
            Value::string_list(["scitbx", "omptbx"]),
        ]);
        let flat = flatten_libs(&libs).unwrap();
        assert_eq!(flat.into_iter().collect::<Vec<_>>(), vec!["cctbx", "omptbx", "scitbx"]);
        assert!(flatten_libs(&Value::list(vec![Value::Int(1)])).is_err());
    }

    #[test]
    fn test_common_letters_skip_mismatches() {
        let sources = vec!["dir/abcx.cpp".to_string(), "abdx.cpp".to_string()];
        assert_eq!(common_letters(&sources), "abx");
        assert_eq!(common_letters(&["single.cpp".to_string()]), "single");
        assert_eq!(common_letters(&[]), "");
    }

    #[test]
    fn test_origin_relative_to_root() {
        let dist = Path::new("/dist");
        assert_eq!(origin_of(Path::new("/dist/SConscript"), dist), ".");
        assert_eq!(
            origin_of(Path::new("/dist/cctbx_project/scitbx/SConscript"), dist),
            "cctbx_project/scitbx"
        );
    }

    #[test]
    fn test_sources_flatten_nested_lists() {
        let value = Value::list(vec![
            Value::str("a.cpp"),
            Value::string_list(["b.cpp", "c.cpp"]),
        ]);
        let sources = Sources::collect(&value).unwrap();
        assert_eq!(sources.files, vec!["a.cpp", "b.cpp", "c.cpp"]);
        assert!(sources.shared.is_empty());
    }
}
