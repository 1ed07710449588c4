//! Emulation of the SCons build API.
//!
//! An [`Emulator`] runs each module's `SConscript` through the script
//! interpreter with the builder entry points injected, and records every
//! declared target into a [`TbxDistribution`]. Nothing is ever compiled.

pub mod builders;
pub mod configure;
pub mod environment;
pub mod fakes;
pub mod intercept;
pub mod objects;

use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::core::{TargetKind, TbxDistribution, SCONSCRIPT_NAME};
use crate::emulator::configure::{try_compile, try_run, BuilderObject, FakeFile};
use crate::emulator::environment::{Environment, METHODS};
use crate::emulator::fakes::{
    call_library, declare_system_patches, library_attribute, match_method, str_arg, FakeContext,
    ImportRegistry,
};
use crate::emulator::intercept::{Interceptor, SystemProbe};
use crate::emulator::objects::{keyword_map, HostObject, Native};
use crate::script::value::Scope;
use crate::script::{CallArgs, Host, HostValue, Interpreter, ScriptError, ScriptModule, Value};
use crate::util::config::{FilterConfig, LayoutConfig};
use crate::util::fs::{glob_relative, posix_normpath, to_posix};

pub use intercept::RealSystem;

/// How parsing one module ended, for errors that do not stop the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOutcome {
    Parsed,
    /// The module has no build script
    NoScript,
    /// The script is outside the supported language
    SyntaxError(String),
    /// The script asked for a module path that does not exist
    MissingDist(String),
}

/// One executing build script.
#[derive(Debug)]
struct ScriptFrame {
    path: PathBuf,
    globals: Scope,
    /// Names passed with `SConscript(..., exports=...)`
    custom_exports: IndexMap<String, Value>,
}

/// Runs build scripts against the emulated build API.
#[derive(Debug)]
pub struct Emulator {
    dist_path: PathBuf,
    layout: LayoutConfig,
    roots: Vec<String>,
    filters: FilterConfig,
    probe: Rc<dyn SystemProbe>,
    registry: ImportRegistry,
    interceptor: Interceptor,
    /// Names shared with `Export`, visible to every later script
    exports: IndexMap<String, Value>,
    scripts: Vec<ScriptFrame>,
    current_module: Option<String>,
    dist: TbxDistribution,
}

impl Emulator {
    pub fn new(
        dist: TbxDistribution,
        layout: LayoutConfig,
        filters: FilterConfig,
        probe: Rc<dyn SystemProbe>,
    ) -> Self {
        let mut registry = ImportRegistry::new();
        registry.install(probe.as_ref());
        let interceptor = Interceptor::new();
        declare_system_patches(&registry, &interceptor);
        Emulator {
            dist_path: dist.module_path.clone(),
            roots: layout.search_roots(),
            layout,
            filters,
            probe,
            registry,
            interceptor,
            exports: IndexMap::new(),
            scripts: Vec::new(),
            current_module: None,
            dist,
        }
    }

    pub fn distribution(&self) -> &TbxDistribution {
        &self.dist
    }

    pub fn into_distribution(self) -> TbxDistribution {
        self.dist
    }

    /// Names exported so far.
    pub fn exports(&self) -> impl Iterator<Item = &str> {
        self.exports.keys().map(String::as_str)
    }

    fn current_script(&self) -> Result<&Path, ScriptError> {
        self.scripts
            .last()
            .map(|frame| frame.path.as_path())
            .ok_or_else(|| ScriptError::unsupported("no build script is executing"))
    }

    fn current_frame(&self) -> Result<&ScriptFrame, ScriptError> {
        self.scripts
            .last()
            .ok_or_else(|| ScriptError::unsupported("no build script is executing"))
    }

    fn context(&self) -> FakeContext<'_> {
        FakeContext {
            dist_path: &self.dist_path,
            roots: &self.roots,
            probe: self.probe.as_ref(),
            interceptor: &self.interceptor,
        }
    }

    /// Parse the `SConscript` of `module`, recording its targets.
    ///
    /// Syntax errors and missing distribution paths end this module's
    /// parse but are returned as an outcome. Anything else the emulation
    /// cannot answer is an error.
    pub fn parse_module(&mut self, module: &str) -> Result<ModuleOutcome, ScriptError> {
        let Some(dir) = self.dist.modules.get(module).map(|m| m.dir()) else {
            return Err(ScriptError::unsupported(format!("unknown module {}", module)));
        };
        self.current_module = Some(module.to_string());
        let script = dir.join(SCONSCRIPT_NAME);
        if !script.is_file() {
            tracing::debug!("No Sconscript for module {}", module);
            return Ok(ModuleOutcome::NoScript);
        }
        tracing::info!("Parsing {}", module);

        let result = match self.interceptor.enter() {
            Ok(_guard) => {
                let mut interp = Interpreter::new();
                self.parse_sconscript(&mut interp, &script, IndexMap::new())
            }
            Err(e) => Err(ScriptError::unsupported(e.to_string())),
        };
        match result {
            Ok(()) => Ok(ModuleOutcome::Parsed),
            Err(ScriptError::Syntax { source, .. }) => {
                tracing::error!("SyntaxError parsing {}: {} (ignoring)", module, source);
                Ok(ModuleOutcome::SyntaxError(source.to_string()))
            }
            Err(ScriptError::MissingDist(message)) => {
                tracing::error!("Missing SConscript dependency in {}: {}", module, message);
                Ok(ModuleOutcome::MissingDist(message))
            }
            Err(other) => Err(other),
        }
    }

    /// Run one script with the builder entry points injected. The previous
    /// script becomes current again however the run ends.
    fn parse_sconscript(
        &mut self,
        interp: &mut Interpreter,
        path: &Path,
        custom_exports: IndexMap<String, Value>,
    ) -> Result<(), ScriptError> {
        let script = ScriptModule::load(path)?;
        for native in [
            Native::Environment,
            Native::Open,
            Native::Builder,
            Native::Export,
            Native::Import,
            Native::SConscript,
            Native::Glob,
            Native::Depends,
        ] {
            script.inject(native.name(), native.value());
        }
        script.inject("ARGUMENTS", Value::dict(Default::default()));

        self.scripts.push(ScriptFrame {
            path: path.to_path_buf(),
            globals: script.globals(),
            custom_exports,
        });
        let result = script.execute(interp, self);
        self.scripts.pop();
        result
    }

    /// `SConscript(name, exports)`: run a script relative to the current one.
    pub(crate) fn sconscript_command(
        &mut self,
        interp: &mut Interpreter,
        name: &str,
        exports: Option<Value>,
    ) -> Result<(), ScriptError> {
        let parent = self
            .current_script()?
            .parent()
            .map(to_posix)
            .unwrap_or_default();
        let path = PathBuf::from(posix_normpath(&format!("{}/{}", parent, name)));
        let custom_exports = match exports {
            None | Some(Value::None) => IndexMap::new(),
            Some(value) => self.resolve_exports(&value)?,
        };
        tracing::debug!("Loading sub-sconscript {}", path.display());
        let result = self.parse_sconscript(interp, &path, custom_exports);
        if let Ok(current) = self.current_script() {
            tracing::debug!("Returning to sconscript {}", current.display());
        }
        result
    }

    /// The `exports=` argument of `SConscript`: a mapping, or names of the
    /// calling script's variables.
    fn resolve_exports(&self, value: &Value) -> Result<IndexMap<String, Value>, ScriptError> {
        let names: Vec<String> = match value {
            Value::Dict(entries) => {
                return Ok(entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.to_value().display(), v.clone()))
                    .collect())
            }
            Value::Str(s) => s.split_whitespace().map(str::to_string).collect(),
            Value::List(items) => items.borrow().iter().map(Value::display).collect(),
            Value::Tuple(items) => items.iter().map(Value::display).collect(),
            other => {
                return Err(ScriptError::type_error(format!(
                    "SConscript exports must be a dict or names, not {}",
                    other.type_name()
                )))
            }
        };
        let globals = self.current_frame()?.globals.clone();
        let globals = globals.borrow();
        names
            .into_iter()
            .map(|name| match globals.get(&name) {
                Some(value) => Ok((name, value.clone())),
                None => Err(ScriptError::name_error(&name)),
            })
            .collect()
    }

    fn export(&mut self, args: CallArgs) -> Result<Value, ScriptError> {
        let names: Vec<String> = args.positional.iter().map(Value::display).collect();
        tracing::debug!("Exporting {:?}", names);
        let globals = self.current_frame()?.globals.clone();
        for fragment in names.iter().flat_map(|name| name.split_whitespace()) {
            let value = globals
                .borrow()
                .get(fragment)
                .cloned()
                .ok_or_else(|| ScriptError::name_error(fragment))?;
            self.exports.insert(fragment.to_string(), value);
        }
        Ok(Value::None)
    }

    fn import(&mut self, args: CallArgs) -> Result<Value, ScriptError> {
        let frame = self.current_frame()?;
        let mut injected = Vec::new();
        let names: Vec<String> = args.positional.iter().map(Value::display).collect();
        for name in names.iter().flat_map(|name| name.split_whitespace()) {
            let value = frame
                .custom_exports
                .get(name)
                .or_else(|| self.exports.get(name))
                .cloned()
                .ok_or_else(|| ScriptError::key_error(format!("'{}'", name)))?;
            injected.push((name.to_string(), value));
        }
        tracing::debug!(
            "Importing {:?}",
            injected.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>()
        );
        frame.globals.borrow_mut().extend(injected);
        Ok(Value::None)
    }

    fn glob(&mut self, mut args: CallArgs) -> Result<Value, ScriptError> {
        let pattern = str_arg(&mut args, 0, "pattern", "Glob")?;
        let base = self
            .current_script()?
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let matches = glob_relative(&base, &pattern)
            .map_err(|e| ScriptError::raised("OSError", format!("{:#}", e)))?;
        Ok(Value::string_list(matches))
    }

    fn call_native(
        &mut self,
        interp: &mut Interpreter,
        native: Native,
        mut args: CallArgs,
    ) -> Result<Value, ScriptError> {
        match native {
            Native::Environment => Ok(Value::host(HostObject::Environment(Environment::new(
                keyword_map(args.keywords),
            )))),
            Native::Open => {
                let file = str_arg(&mut args, 0, "file", "open")?;
                Ok(Value::host(HostObject::File(FakeFile::new(&file))))
            }
            Native::Builder => {
                let action = args.take(0, "action").unwrap_or(Value::None);
                Ok(Value::host(HostObject::Builder(BuilderObject::new(
                    action,
                    keyword_map(args.keywords),
                ))))
            }
            Native::Export => self.export(args),
            Native::Import => self.import(args),
            Native::SConscript => {
                let name = str_arg(&mut args, 0, "name", "SConscript")?;
                let exports = args.take(1, "exports");
                self.sconscript_command(interp, &name, exports)?;
                Ok(Value::None)
            }
            Native::Glob => self.glob(args),
            Native::Depends => {
                let target = args.take(0, "target").unwrap_or(Value::None);
                let depends_on = args.take(1, "dependency").unwrap_or(Value::None);
                tracing::warn!(
                    "Got depends {}->{} but ignoring for now.",
                    target.repr(),
                    depends_on.repr()
                );
                Ok(Value::None)
            }
            library => call_library(&self.context(), library, args),
        }
    }

    fn call_environment(
        &mut self,
        interp: &mut Interpreter,
        receiver: &Rc<dyn HostValue>,
        env: &Environment,
        name: &str,
        mut args: CallArgs,
    ) -> Result<Value, ScriptError> {
        match name {
            "Append" => env.append(&keyword_map(args.keywords)).map(|_| Value::None),
            "Prepend" => env.prepend(&keyword_map(args.keywords)).map(|_| Value::None),
            "Replace" => {
                env.replace(keyword_map(args.keywords));
                Ok(Value::None)
            }
            "Configure" => Ok(Value::host(HostObject::Configure)),
            "Clone" | "Copy" => Ok(Value::host(HostObject::Environment(
                env.clone_with(keyword_map(args.keywords)),
            ))),
            "has_key" => {
                let key = str_arg(&mut args, 0, "key", name)?;
                Ok(Value::Bool(env.contains(&key)))
            }
            "Repository" => {
                let path = args.require(0, "path", name)?;
                env.append(&IndexMap::from([("REPOSITORIES".to_string(), path)]))?;
                Ok(Value::None)
            }
            "SConscript" => {
                let script = str_arg(&mut args, 0, "name", name)?;
                let exports = args.take(1, "exports");
                self.sconscript_command(interp, &script, exports)?;
                Ok(Value::None)
            }
            "SharedObject" => {
                let source = args.require(0, "source", name)?;
                let target = args.take_keyword("target");
                self.shared_object(env, &source, target.as_ref())
            }
            builder => {
                let kind = match builder {
                    "SharedLibrary" => TargetKind::Shared,
                    "StaticLibrary" => TargetKind::Static,
                    "Program" => TargetKind::Program,
                    "cudaSharedLibrary" => TargetKind::CudaLib,
                    other => {
                        return Err(ScriptError::unsupported(format!(
                            "{}.{} is not emulated",
                            receiver.type_name(),
                            other
                        )))
                    }
                };
                let target = args.require(0, "target", builder)?;
                let source = args.require(1, "source", builder)?;
                let overrides = keyword_map(std::mem::take(&mut args.keywords));
                let handle = self.create_target(env, kind, &target, &source, overrides)?;
                if kind == TargetKind::Program {
                    let path = match &target {
                        Value::List(items) => items.borrow().first().map(Value::display).unwrap_or_default(),
                        other => other.display(),
                    };
                    return Ok(Value::list(vec![Value::host(HostObject::ProgramReturn(path))]));
                }
                Ok(handle)
            }
        }
    }

    fn call_method(
        &mut self,
        interp: &mut Interpreter,
        receiver: &Rc<dyn HostValue>,
        name: &str,
        mut args: CallArgs,
    ) -> Result<Value, ScriptError> {
        let Some(object) = HostObject::of(receiver) else {
            return Err(ScriptError::type_error(format!("'{}' has no method {}", receiver.type_name(), name)));
        };
        match (object, name) {
            (HostObject::Environment(env), _) => {
                self.call_environment(interp, receiver, env, name, args)
            }
            (HostObject::Configure, "TryRun") => {
                let code = str_arg(&mut args, 0, "text", name)?;
                let (status, output) = try_run(&code, interp.current_function())?;
                Ok(Value::tuple(vec![Value::Int(status), Value::str(output)]))
            }
            (HostObject::Configure, "TryCompile") => {
                let code = str_arg(&mut args, 0, "text", name)?;
                Ok(Value::Int(try_compile(&code)?))
            }
            (HostObject::Configure, "Finish") => Ok(Value::None),
            (HostObject::Builder(builder), "add_src_builder") => {
                builder.add_src_builder(args.require(0, "builder", name)?);
                Ok(Value::None)
            }
            (HostObject::File(file), "write") => {
                file.write(&str_arg(&mut args, 0, "data", name)?);
                Ok(Value::None)
            }
            (HostObject::File(file), "read") => Ok(file.read(interp.current_function())),
            (HostObject::File(_), "close") => Ok(Value::None),
            (HostObject::ProgramReturn(path), "get_abspath") => Ok(Value::str(path)),
            (HostObject::RunResult(_), "raise_if_errors") => Ok(Value::Host(Rc::clone(receiver))),
            (HostObject::IncludeRegistry(_), "scan_boost" | "set_boost_dir_name") => {
                Ok(Value::Host(Rc::clone(receiver)))
            }
            (HostObject::IncludeRegistry(_), "append" | "prepend") => {
                let env_value = args.require(0, "env", name)?;
                let paths = args.require(1, "paths", name)?;
                let Some(HostObject::Environment(env)) = HostObject::from_value(&env_value) else {
                    return Err(ScriptError::type_error("include_registry needs an environment"));
                };
                for path in interp.iterate(self, &paths)? {
                    let setting = IndexMap::from([("CPPPATH".to_string(), Value::list(vec![path]))]);
                    if name == "append" {
                        env.append(&setting)?;
                    } else {
                        env.prepend(&setting)?;
                    }
                }
                Ok(Value::None)
            }
            (HostObject::Match { groups }, _) => match_method(groups, name, &args),
            _ => Err(ScriptError::unsupported(format!(
                "{}.{} is not emulated",
                receiver.type_name(),
                name
            ))),
        }
    }
}

fn attribute_error(obj: &Rc<dyn HostValue>, name: &str) -> ScriptError {
    ScriptError::raised(
        "AttributeError",
        format!("'{}' object has no attribute '{}'", obj.type_name(), name),
    )
}

fn setting_key(key: &Value) -> Result<String, ScriptError> {
    key.as_str()
        .map(str::to_string)
        .ok_or_else(|| ScriptError::type_error(format!("setting names must be str, not {}", key.type_name())))
}

impl Host for Emulator {
    fn import_module(&mut self, name: &str) -> Result<Value, ScriptError> {
        self.registry.import(name)
    }

    fn call(
        &mut self,
        interp: &mut Interpreter,
        callee: &Rc<dyn HostValue>,
        args: CallArgs,
    ) -> Result<Value, ScriptError> {
        match HostObject::of(callee) {
            Some(HostObject::Native(native)) => self.call_native(interp, *native, args),
            Some(HostObject::Method { receiver, name }) => {
                let (receiver, name) = (Rc::clone(receiver), name.clone());
                self.call_method(interp, &receiver, &name, args)
            }
            Some(HostObject::Mock(name)) => Ok(Value::host(HostObject::Mock(format!("{}()", name)))),
            _ => Err(ScriptError::type_error(format!(
                "'{}' object is not callable",
                callee.type_name()
            ))),
        }
    }

    fn get_attr(&mut self, obj: &Rc<dyn HostValue>, name: &str) -> Result<Value, ScriptError> {
        let Some(object) = HostObject::of(obj) else {
            return Err(attribute_error(obj, name));
        };
        let found = match (object, name) {
            (HostObject::Environment(_), _) if METHODS.contains(&name) => {
                Some(HostObject::method(obj, name))
            }
            (HostObject::Environment(env), _) => env.attribute(name),
            (HostObject::Configure, "TryRun" | "TryCompile" | "Finish")
            | (HostObject::Builder(_), "add_src_builder")
            | (HostObject::File(_), "write" | "read" | "close")
            | (HostObject::ProgramReturn(_), "get_abspath") => Some(HostObject::method(obj, name)),
            (HostObject::Builder(builder), "action") => Some(builder.action.clone()),
            (HostObject::File(file), "name") => Some(Value::str(&file.filename)),
            (HostObject::Native(native), "__name__") => Some(Value::str(native.name())),
            (HostObject::Target { name: target, .. }, "name") => Some(Value::str(target)),
            (HostObject::SharedObject(shared), "target") => {
                let target = self.dist.targets().find(shared.source.target).map(|t| {
                    Value::host(HostObject::Target {
                        id: t.id,
                        kind: t.kind,
                        name: t.name.clone(),
                    })
                });
                Some(target.unwrap_or(Value::None))
            }
            (HostObject::SharedObject(shared), "name") => Some(Value::str(&shared.source.name)),
            (HostObject::SharedObject(shared), "prefix") => Some(Value::str(&shared.source.prefix)),
            (HostObject::SharedObject(shared), "sources") => {
                Some(Value::string_list(&shared.source.sources))
            }
            _ => library_attribute(obj, object, name),
        };
        found.ok_or_else(|| attribute_error(obj, name))
    }

    fn set_attr(&mut self, obj: &Rc<dyn HostValue>, name: &str, value: Value) -> Result<(), ScriptError> {
        match HostObject::of(obj) {
            Some(HostObject::Environment(env)) => {
                env.set_attribute(name, value);
                Ok(())
            }
            _ => Err(ScriptError::unsupported(format!(
                "cannot set attribute '{}' on {}",
                name,
                obj.type_name()
            ))),
        }
    }

    fn get_item(&mut self, obj: &Rc<dyn HostValue>, key: &Value) -> Result<Value, ScriptError> {
        match HostObject::of(obj) {
            Some(HostObject::Environment(env)) => env.get(&setting_key(key)?),
            Some(HostObject::IncludeRegistry(items)) => {
                let items = items.borrow();
                let index = crate::script::builtins::normalize_index(key, items.len())?;
                Ok(items[index].clone())
            }
            _ => Err(ScriptError::type_error(format!(
                "'{}' object is not subscriptable",
                obj.type_name()
            ))),
        }
    }

    fn set_item(&mut self, obj: &Rc<dyn HostValue>, key: Value, value: Value) -> Result<(), ScriptError> {
        match HostObject::of(obj) {
            Some(HostObject::Environment(env)) => {
                env.set(&setting_key(&key)?, value);
                Ok(())
            }
            _ => Err(ScriptError::type_error(format!(
                "'{}' object does not support item assignment",
                obj.type_name()
            ))),
        }
    }

    fn contains(&mut self, obj: &Rc<dyn HostValue>, item: &Value) -> Result<bool, ScriptError> {
        match HostObject::of(obj) {
            Some(HostObject::Environment(env)) => Ok(item.as_str().is_some_and(|key| env.contains(key))),
            Some(HostObject::IncludeRegistry(items)) => Ok(items.borrow().iter().any(|v| v.equals(item))),
            Some(HostObject::SharedObject(obj)) => Ok(item
                .as_str()
                .is_some_and(|s| obj.source.sources.iter().any(|source| source == s))),
            _ => Err(ScriptError::type_error(format!(
                "argument of type '{}' is not iterable",
                obj.type_name()
            ))),
        }
    }

    fn iterate(&mut self, obj: &Rc<dyn HostValue>) -> Result<Vec<Value>, ScriptError> {
        match HostObject::of(obj) {
            Some(HostObject::SharedObject(obj)) => Ok(obj.source.sources.iter().map(|s| Value::str(s)).collect()),
            Some(HostObject::IncludeRegistry(items)) => Ok(items.borrow().clone()),
            Some(HostObject::RunResult(lines)) => Ok(lines.iter().map(|s| Value::str(s)).collect()),
            _ => Err(ScriptError::type_error(format!(
                "'{}' object is not iterable",
                obj.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Module;
    use crate::test_support::DistFixture;
    use std::collections::BTreeMap;

    fn emulator_for(fixture: &DistFixture, modules: &[(&str, &str)]) -> Emulator {
        let root = fixture.path();
        let modules = modules
            .iter()
            .map(|(name, path)| {
                let module = Module::open(name, path, root, &BTreeMap::new()).unwrap();
                (name.to_string(), module)
            })
            .collect();
        let dist = TbxDistribution::new(root, modules);
        let config = crate::util::Config::default();
        Emulator::new(dist, config.layout, config.filters, Rc::new(RealSystem))
    }

    fn parse(emulator: &mut Emulator, module: &str) -> ModuleOutcome {
        emulator.parse_module(module).unwrap()
    }

    #[test]
    fn test_shared_library_is_recorded() {
        let fixture = DistFixture::new().file(
            "cctbx_project/scitbx/SConscript",
            r##"
env = Environment(LIBS=["cctbx", ["boost_python", "m"]])
env.Append(SHLINKFLAGS=["-shared"])
env.SharedLibrary(target="#lib/scitbx_ext", source=["a.cpp", "b.cpp"])
"##,
        );
        let mut emulator = emulator_for(&fixture, &[("scitbx", "cctbx_project/scitbx")]);
        assert_eq!(parse(&mut emulator, "scitbx"), ModuleOutcome::Parsed);

        let dist = emulator.into_distribution();
        let target = dist.targets().get("scitbx_ext").unwrap();
        assert_eq!(target.kind, TargetKind::Shared);
        assert_eq!(target.prefix, "lib");
        assert_eq!(target.output_path, "#/lib");
        assert_eq!(target.origin_path, "cctbx_project/scitbx");
        assert_eq!(target.module, "scitbx");
        assert_eq!(
            target.extra_libs.iter().collect::<Vec<_>>(),
            vec!["boost_python", "cctbx"]
        );
    }

    #[test]
    fn test_clone_does_not_leak_into_parent() {
        let fixture = DistFixture::new().file(
            "mod/SConscript",
            r#"
env = Environment(LIBS=["base"])
child = env.Clone()
child.Append(LIBS=["extra"])
env.StaticLibrary(target="parent", source="p.cpp")
child.StaticLibrary(target="child", source="c.cpp")
"#,
        );
        let mut emulator = emulator_for(&fixture, &[("mod", "mod")]);
        parse(&mut emulator, "mod");
        let dist = emulator.distribution();
        let parent = dist.targets().get("parent").unwrap();
        let child = dist.targets().get("child").unwrap();
        assert_eq!(parent.extra_libs.len(), 1);
        assert!(child.extra_libs.contains("extra"));
        assert_eq!(parent.sources, vec!["p.cpp"]);
    }

    #[test]
    fn test_export_import_across_subscripts() {
        let fixture = DistFixture::new()
            .file(
                "mod/SConscript",
                r#"
env_base = Environment(LIBS=["shared"])
other = 3
Export("env_base other")
SConscript("sub/SConscript", exports={"special": "yes"})
"#,
            )
            .file(
                "mod/sub/SConscript",
                r#"
Import("env_base", "special")
assert special == "yes"
env_base.Program(target="prog", source=Glob("*.cpp"))
"#,
            )
            .file("mod/sub/main.cpp", "");
        let mut emulator = emulator_for(&fixture, &[("mod", "mod")]);
        assert_eq!(parse(&mut emulator, "mod"), ModuleOutcome::Parsed);
        assert_eq!(emulator.exports().collect::<Vec<_>>(), vec!["env_base", "other"]);

        let prog = emulator.distribution().targets().get("prog").unwrap().clone();
        assert_eq!(prog.sources, vec!["main.cpp"]);
        assert_eq!(prog.origin_path, "mod/sub");
        assert_eq!(prog.prefix, "");
        assert!(emulator.scripts.is_empty());
    }

    #[test]
    fn test_missing_import_is_an_error() {
        let fixture = DistFixture::new().file("mod/SConscript", "Import('nothing')\n");
        let mut emulator = emulator_for(&fixture, &[("mod", "mod")]);
        let err = emulator.parse_module("mod").unwrap_err();
        assert_eq!(err.catchable_kind(), Some("KeyError"));
        // The script stack unwinds on failure
        assert!(emulator.scripts.is_empty());
        assert!(!emulator.interceptor.is_active());
    }

    #[test]
    fn test_names_split_on_any_whitespace() {
        let fixture = DistFixture::new()
            .file(
                "mod/SConscript",
                "env = Environment()\nenv_etc = 1\nExport(\"env\t env_etc\")\nSConscript(\"sub/SConscript\")\n",
            )
            .file(
                "mod/sub/SConscript",
                "Import(\"env  env_etc\")\nassert env_etc == 1\nenv.Program(target=\"prog\", source=[\"main.cpp\"])\n",
            );
        let mut emulator = emulator_for(&fixture, &[("mod", "mod")]);
        assert_eq!(parse(&mut emulator, "mod"), ModuleOutcome::Parsed);
        assert_eq!(emulator.exports().collect::<Vec<_>>(), vec!["env", "env_etc"]);
        assert!(emulator.distribution().targets().get("prog").is_ok());
    }

    #[test]
    fn test_syntax_error_is_skipped() {
        let fixture = DistFixture::new().file("mod/SConscript", "class Broken:\n    pass\n");
        let mut emulator = emulator_for(&fixture, &[("mod", "mod"), ("empty", "empty")]);
        assert!(matches!(parse(&mut emulator, "mod"), ModuleOutcome::SyntaxError(_)));
        std::fs::create_dir_all(fixture.path().join("empty")).unwrap();
        assert_eq!(parse(&mut emulator, "empty"), ModuleOutcome::NoScript);
    }

    #[test]
    fn test_missing_dist_path_is_skipped() {
        let fixture = DistFixture::new().file(
            "mod/SConscript",
            "import libtbx.load_env\npath = libtbx.env.dist_path('nowhere')\n",
        );
        let mut emulator = emulator_for(&fixture, &[("mod", "mod")]);
        assert!(matches!(parse(&mut emulator, "mod"), ModuleOutcome::MissingDist(_)));
    }

    #[test]
    fn test_unknown_link_flag_is_fatal() {
        let fixture = DistFixture::new().file(
            "mod/SConscript",
            "env = Environment(SHLINKFLAGS=['-Wl,--as-needed'])\nenv.SharedLibrary(target='x', source='x.cpp')\n",
        );
        let mut emulator = emulator_for(&fixture, &[("mod", "mod")]);
        assert!(matches!(
            emulator.parse_module("mod"),
            Err(ScriptError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_shared_object_naming() {
        let fixture = DistFixture::new().file(
            "mod/SConscript",
            r##"
env = Environment()
objs = env.SharedObject(source=["wrap_a.cpp", "wrap_b.cpp"])
env.SharedLibrary(target="#lib/uses", source=["main.cpp", objs])
named = env.SharedObject(source="x.cpp", target="#lib/explicit.o")
"##,
        );
        let mut emulator = emulator_for(&fixture, &[("mod", "mod")]);
        parse(&mut emulator, "mod");
        let dist = emulator.distribution();

        let object = dist.targets().get("shared_wrap_").unwrap();
        assert_eq!(object.kind, TargetKind::Object);
        assert_eq!(object.output_path, "mod");
        let uses = dist.targets().get("uses").unwrap();
        assert_eq!(uses.sources, vec!["main.cpp"]);
        assert_eq!(uses.shared_sources.len(), 1);
        assert_eq!(uses.shared_sources[0].name, "#mod/wrap_");
        assert_eq!(uses.shared_sources[0].target, object.id);
        assert!(dist.targets().contains_name("shared_explicit"));
    }

    #[test]
    fn test_interception_only_while_parsing() {
        let fixture = DistFixture::new().file(
            "mod/SConscript",
            r#"
import os, sys
assert sys.platform == "linux2"
assert os.path.isdir("/definitely/not/here")
"#,
        );
        let mut emulator = emulator_for(&fixture, &[("mod", "mod")]);
        assert_eq!(parse(&mut emulator, "mod"), ModuleOutcome::Parsed);
        let sys = emulator.registry.get("sys").unwrap();
        assert_eq!(sys.get("platform").unwrap().display(), std::env::consts::OS);
    }

    #[test]
    fn test_configure_answers_known_probes() {
        let fixture = DistFixture::new().file(
            "mod/SConscript",
            r##"
env = Environment()
conf = env.Configure()
def enable_openmp_if_possible():
    return conf.TryRun("int main() {}", extension=".cpp")
flag, output = enable_openmp_if_possible()
assert flag == 1
assert conf.TryCompile("#include <Python.h>", extension=".c") == 1
conf.Finish()
"##,
        );
        let mut emulator = emulator_for(&fixture, &[("mod", "mod")]);
        assert_eq!(parse(&mut emulator, "mod"), ModuleOutcome::Parsed);
    }
}
