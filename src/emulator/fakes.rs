//! Synthetic stand-ins for the libraries build scripts import.
//!
//! The legacy scripts import the distribution's own configuration library
//! (`libtbx` and friends), a little of SCons itself, and `os`/`sys`. None
//! of the real code is available here, so each name resolves to a fixed,
//! deterministic answer. Calls the emulation cannot answer fail loudly
//! rather than guess.

use std::path::Path;
use std::rc::Rc;

use indexmap::IndexMap;
use regex::Regex;

use crate::emulator::intercept::{Interceptor, SystemProbe};
use crate::emulator::objects::{keyword_map, HostObject, Native};
use crate::script::value::Dict;
use crate::script::{CallArgs, Namespace, NamespaceKind, ScriptError, Value};
use crate::util::fs::{posix_join, posix_normpath, posix_relpath, posix_split};

/// Libraries accepted by `darwin_shlinkcom`.
const DARWIN_LINKED_BOOST: &[&str] = &[
    "libboost_thread.lo",
    "libboost_python.lo",
    "libboost_system.lo",
    "libboost_numpy.lo",
    "libboost_filesystem.lo",
];

/// Answers for `libtbx.utils.getenv_bool`.
const ENV_BOOLS: &[(&str, bool)] = &[("LIBTBX_CPP0X", false)];

/// Importable synthetic modules, by dotted name.
#[derive(Debug, Default)]
pub struct ImportRegistry {
    modules: IndexMap<String, Rc<Namespace>>,
}

impl ImportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_installed(&self) -> bool {
        !self.modules.is_empty()
    }

    /// Populate every synthetic module. A second call does nothing and
    /// returns false.
    pub fn install(&mut self, probe: &dyn SystemProbe) -> bool {
        if self.is_installed() {
            return false;
        }
        self.install_system(probe);
        self.install_libtbx();
        self.install_support();
        tracing::debug!("Installed {} synthetic modules", self.modules.len());
        true
    }

    /// Drop every synthetic module, so a later `install` starts afresh.
    pub fn reset(&mut self) {
        self.modules.clear();
    }

    pub fn get(&self, name: &str) -> Option<Rc<Namespace>> {
        self.modules.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Resolve `import name`. Unknown modules raise a catchable ImportError.
    pub fn import(&self, name: &str) -> Result<Value, ScriptError> {
        self.get(name).map(Value::Namespace).ok_or_else(|| {
            ScriptError::raised("ImportError", format!("No module named {}", name))
        })
    }

    /// Create `name`, attaching it to its parent module.
    fn module(&mut self, name: &str) -> Rc<Namespace> {
        if let Some(existing) = self.modules.get(name) {
            return Rc::clone(existing);
        }
        let namespace = Namespace::new(name, NamespaceKind::Module);
        namespace.set("__file__", Value::str(&format!("{}.py", name)));
        if let Some((parent, child)) = name.rsplit_once('.') {
            if let Some(parent) = self.modules.get(parent) {
                parent.set(child, Value::Namespace(Rc::clone(&namespace)));
            }
        }
        self.modules.insert(name.to_string(), Rc::clone(&namespace));
        namespace
    }

    fn install_system(&mut self, probe: &dyn SystemProbe) {
        let os = self.module("os");
        let path = self.module("os.path");
        os.set("name", Value::str(probe.os_name()));
        os.set("sep", Value::str("/"));
        os.set("pathsep", Value::str(":"));
        os.set("environ", Value::dict(Dict::new()));
        for native in [Native::Mkdir, Native::Listdir, Native::Getcwd, Native::Getenv] {
            os.set(native.name(), native.value());
        }
        path.set("sep", Value::str("/"));
        for native in [
            Native::PathJoin,
            Native::Dirname,
            Native::Basename,
            Native::Normpath,
            Native::Split,
            Native::Splitext,
            Native::Abspath,
            Native::Isabs,
            Native::Relpath,
            Native::Expanduser,
            Native::IsDir,
            Native::IsFile,
            Native::Exists,
        ] {
            path.set(native.name(), native.value());
        }

        let sys = self.module("sys");
        sys.set("platform", Value::str(probe.platform()));
        sys.set("byteorder", Value::str("little"));
        sys.set("maxsize", Value::Int(i64::MAX));
        sys.set(
            "version_info",
            Value::tuple(vec![
                Value::Int(3),
                Value::Int(8),
                Value::Int(0),
                Value::str("final"),
                Value::Int(0),
            ]),
        );

        let re = self.module("re");
        for native in [Native::ReSearch, Native::ReMatch, Native::ReSub] {
            re.set(native.name(), native.value());
        }
    }

    fn install_libtbx(&mut self) {
        let libtbx = self.module("libtbx");
        libtbx.set("manual_date_stamp", Value::Int(20090819));
        libtbx.set("group_args", Native::GroupArgs.value());
        self.module("libtbx.load_env");

        let env_config = self.module("libtbx.env_config");
        for native in [
            Native::IncludeRegistry,
            Native::IsBit64,
            Native::PythonIncludePath,
            Native::UniquePaths,
            Native::DarwinShlinkcom,
            Native::GetGccVersion,
            Native::BoostLibraryWithPythonVersion,
        ] {
            env_config.set(native.name(), native.value());
        }

        let utils = self.module("libtbx.utils");
        utils.set("getenv_bool", Native::GetenvBool.value());
        utils.set("select_matching", Native::SelectMatching.value());
        for mock in ["warn_if_unexpected_md5_hexdigest", "write_this_is_auto_generated"] {
            utils.set(mock, Value::host(HostObject::Mock(mock.to_string())));
        }
        utils.set("Sorry", Value::ExceptionType(Rc::from("RuntimeError")));

        self.module("libtbx.str_utils")
            .set("show_string", Native::ShowString.value());
        let path = self.module("libtbx.path");
        path.set("norm_join", Native::NormJoin.value());
        path.set("full_command_path", Native::FullCommandPath.value());
        self.module("libtbx.easy_run")
            .set("fully_buffered", Native::FullyBuffered.value());

        libtbx.set("env", Value::Namespace(libtbx_env()));
    }

    fn install_support(&mut self) {
        self.module("fftw3tbx").set("fftw3_h", Value::str("fftw3.h"));

        self.module("SCons");
        self.module("SCons.Action").set(
            "FunctionAction",
            Value::host(HostObject::Mock("FunctionAction".into())),
        );
        self.module("SCons.Scanner");
        self.module("SCons.Scanner.C")
            .set("CScanner", Value::host(HostObject::Mock("CScanner".into())));

        self.module("numpy")
            .set("get_include", Native::NumpyGetInclude.value());
        self.module("fable")
            .set("__path__", Value::str("DISTPATH[fable]/"));
    }
}

/// The `libtbx.env` object.
fn libtbx_env() -> Rc<Namespace> {
    let env = Namespace::new("env", NamespaceKind::Record);
    env.set("boost_version", Value::Int(107200));
    env.set("build_options", Value::Namespace(build_options()));
    env.set("build_path", Value::str("UNDERBUILD"));
    env.set("lib_path", Value::host(HostObject::UnderBuild("lib".into())));
    for native in [
        Native::UnderBuild,
        Native::UnderBase,
        Native::DistPath,
        Native::UnderDist,
        Native::FindInRepositories,
        Native::HasModule,
        Native::WriteDispatcherInBin,
    ] {
        env.set(native.name(), native.value());
    }
    env
}

/// `libtbx.env.build_options` as configured for a default Linux build.
fn build_options() -> Rc<Namespace> {
    let options = Namespace::new("build_options", NamespaceKind::Record);
    let flags = [
        ("build_boost_python_extensions", true),
        ("scan_boost", false),
        ("static_exe", false),
        ("debug_symbols", true),
        ("force_32bit", false),
        ("optimization", false),
        ("use_environment_flags", false),
        ("enable_cxx11", false),
        ("enable_openmp_if_possible", true),
        ("enable_cuda", true),
        ("enable_boost_threads", true),
        ("boost_python_no_py_signatures", false),
        ("precompile_headers", false),
        ("boost_python_bool_int_strict", true),
        ("static_libraries", false),
        ("use_conda", false),
    ];
    for (name, value) in flags {
        options.set(name, Value::Bool(value));
    }
    options.set("compiler", Value::str("default"));
    options.set("warning_level", Value::Int(0));
    // Only ever compared against "profile"
    options.set("mode", Value::str("invalid"));
    options
}

/// Declare the probe replacements active while scripts run.
pub fn declare_system_patches(registry: &ImportRegistry, interceptor: &Interceptor) {
    if let Some(os) = registry.get("os") {
        interceptor.replace(&os, "mkdir", Native::FakeMkdir.value());
        interceptor.replace(&os, "name", Value::str("posix"));
    }
    if let Some(path) = registry.get("os.path") {
        interceptor.replace(&path, "isdir", Native::FakeIsDir.value());
        interceptor.replace(&path, "isfile", Native::FakeIsFile.value());
        interceptor.replace(&path, "exists", Native::FakeExists.value());
    }
    if let Some(sys) = registry.get("sys") {
        interceptor.replace(&sys, "platform", Value::str("linux2"));
    }
}

/// What a library native may consult.
pub struct FakeContext<'a> {
    pub dist_path: &'a Path,
    pub roots: &'a [String],
    pub probe: &'a dyn SystemProbe,
    pub interceptor: &'a Interceptor,
}

pub(crate) fn str_arg(
    args: &mut CallArgs,
    index: usize,
    name: &str,
    func: &str,
) -> Result<String, ScriptError> {
    match args.require(index, name, func)? {
        Value::Str(s) => Ok(s.to_string()),
        Value::Host(host) => Ok(host.display()),
        other => Err(ScriptError::type_error(format!(
            "{}() argument '{}' must be str, not {}",
            func,
            name,
            other.type_name()
        ))),
    }
}

fn sequence(value: &Value) -> Result<Vec<Value>, ScriptError> {
    match value {
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Tuple(items) => Ok(items.to_vec()),
        other => Err(ScriptError::type_error(format!(
            "expected a sequence, not {}",
            other.type_name()
        ))),
    }
}

fn current_dir() -> String {
    std::env::current_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "/".to_string())
}

fn os_error(err: std::io::Error, path: &str) -> ScriptError {
    ScriptError::raised("OSError", format!("{}: '{}'", err, path))
}

/// `os.path.join` semantics: an absolute component restarts the path.
pub fn path_join(parts: &[String]) -> String {
    parts
        .iter()
        .fold(String::new(), |acc, part| posix_join(&acc, part))
}

fn splitext(path: &str) -> (String, String) {
    let (_, base) = posix_split(path);
    let stem_len = base.len() - base.trim_start_matches('.').len();
    match base[stem_len..].rfind('.') {
        Some(dot) => {
            let cut = path.len() - base.len() + stem_len + dot;
            (path[..cut].to_string(), path[cut..].to_string())
        }
        None => (path.to_string(), String::new()),
    }
}

fn abspath(path: &str) -> String {
    if path.starts_with('/') {
        posix_normpath(path)
    } else {
        posix_normpath(&posix_join(&current_dir(), path))
    }
}

/// Translate Python replacement syntax (`\1`, `\g<name>`) for `regex`.
fn replacement_template(repl: &str) -> String {
    let mut out = String::with_capacity(repl.len());
    let mut chars = repl.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' => match chars.peek().copied() {
                Some(d) if d.is_ascii_digit() => {
                    let mut group = String::new();
                    while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                        group.push(d);
                        chars.next();
                    }
                    out.push_str(&format!("${{{}}}", group));
                }
                Some('g') => {
                    chars.next();
                    if chars.peek() == Some(&'<') {
                        chars.next();
                        let name: String = chars.by_ref().take_while(|c| *c != '>').collect();
                        out.push_str(&format!("${{{}}}", name));
                    } else {
                        out.push_str("\\g");
                    }
                }
                Some('n') => {
                    chars.next();
                    out.push('\n');
                }
                Some('t') => {
                    chars.next();
                    out.push('\t');
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                _ => out.push('\\'),
            },
            other => out.push(other),
        }
    }
    out
}

fn compile(pattern: &str) -> Result<Regex, ScriptError> {
    Regex::new(pattern).map_err(|e| {
        ScriptError::unsupported(format!("regular expression {:?} not supported: {}", pattern, e))
    })
}

fn match_object(captures: &regex::Captures<'_>) -> Value {
    let groups = captures
        .iter()
        .map(|group| group.map(|m| m.as_str().to_string()))
        .collect();
    Value::host(HostObject::Match { groups })
}

/// Call one of the natives of the synthetic libraries.
pub fn call_library(
    ctx: &FakeContext<'_>,
    native: Native,
    mut args: CallArgs,
) -> Result<Value, ScriptError> {
    let func = native.name();
    Ok(match native {
        Native::PathJoin => {
            let parts = args
                .positional
                .iter()
                .map(|v| match v {
                    Value::Str(s) => Ok(s.to_string()),
                    Value::Host(h) => Ok(h.display()),
                    other => Err(ScriptError::type_error(format!(
                        "join() argument must be str, not {}",
                        other.type_name()
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Value::str(&path_join(&parts))
        }
        Native::Dirname => Value::str(posix_split(&str_arg(&mut args, 0, "p", func)?).0),
        Native::Basename => Value::str(posix_split(&str_arg(&mut args, 0, "p", func)?).1),
        Native::Normpath => Value::str(&posix_normpath(&str_arg(&mut args, 0, "path", func)?)),
        Native::Split => {
            let path = str_arg(&mut args, 0, "p", func)?;
            let (dir, base) = posix_split(&path);
            Value::tuple(vec![Value::str(dir), Value::str(base)])
        }
        Native::Splitext => {
            let (root, ext) = splitext(&str_arg(&mut args, 0, "p", func)?);
            Value::tuple(vec![Value::str(&root), Value::str(&ext)])
        }
        Native::Abspath => Value::str(&abspath(&str_arg(&mut args, 0, "path", func)?)),
        Native::Isabs => Value::Bool(str_arg(&mut args, 0, "s", func)?.starts_with('/')),
        Native::Relpath => {
            let path = abspath(&str_arg(&mut args, 0, "path", func)?);
            let start = match args.take(1, "start") {
                Some(Value::Str(s)) => abspath(&s),
                _ => current_dir(),
            };
            Value::str(&posix_relpath(&path, &start))
        }
        Native::Expanduser => {
            let path = str_arg(&mut args, 0, "path", func)?;
            match (path.strip_prefix('~'), std::env::var("HOME")) {
                (Some(rest), Ok(home)) if rest.is_empty() || rest.starts_with('/') => {
                    Value::str(&format!("{}{}", home, rest))
                }
                _ => Value::str(&path),
            }
        }
        Native::IsDir => Value::Bool(ctx.probe.is_dir(Path::new(&str_arg(&mut args, 0, "s", func)?))),
        Native::IsFile => Value::Bool(ctx.probe.is_file(Path::new(&str_arg(&mut args, 0, "path", func)?))),
        Native::Exists => Value::Bool(ctx.probe.exists(Path::new(&str_arg(&mut args, 0, "path", func)?))),
        Native::FakeIsDir => Value::Bool(crate::emulator::intercept::fake_isdir(&str_arg(
            &mut args, 0, "s", func,
        )?)),
        Native::FakeIsFile => {
            let path = str_arg(&mut args, 0, "path", func)?;
            let _real = ctx.interceptor.suspend();
            Value::Bool(crate::emulator::intercept::fake_isfile(
                &path,
                ctx.dist_path,
                ctx.roots,
                ctx.probe,
            ))
        }
        Native::FakeExists => {
            let path = str_arg(&mut args, 0, "path", func)?;
            tracing::debug!("EXISTS: {}", path);
            Value::Bool(ctx.probe.exists(Path::new(&path)))
        }
        Native::Mkdir => {
            let path = str_arg(&mut args, 0, "path", func)?;
            ctx.probe
                .make_dir(Path::new(&path))
                .map_err(|e| os_error(e, &path))?;
            Value::None
        }
        Native::FakeMkdir => {
            let path = str_arg(&mut args, 0, "path", func)?;
            if !crate::emulator::intercept::fake_mkdir_allowed(&path) {
                return Err(ScriptError::unsupported(format!(
                    "mkdir outside the build directory: {}",
                    path
                )));
            }
            tracing::debug!("Ignoring mkdir {}", path);
            Value::None
        }
        Native::Listdir => {
            let path = match args.take(0, "path") {
                Some(v) => v.display(),
                None => ".".to_string(),
            };
            let names = ctx
                .probe
                .list_dir(Path::new(&path))
                .map_err(|e| os_error(e, &path))?;
            Value::string_list(names)
        }
        Native::Getcwd => Value::str(&current_dir()),
        // The emulated process environment is empty
        Native::Getenv => args.take(1, "default").unwrap_or(Value::None),

        Native::GroupArgs => {
            args.expect_at_most(0, func)?;
            let record = Namespace::new("group_args", NamespaceKind::Record);
            for (key, value) in keyword_map(args.keywords) {
                record.set(key, value);
            }
            Value::Namespace(record)
        }
        Native::IsBit64 => Value::Bool(true),
        Native::PythonIncludePath => Value::str("PYTHON/INCLUDE/PATH"),
        Native::UniquePaths => {
            let paths = sequence(&args.require(0, "paths", func)?)?;
            let mut unique: Vec<Value> = Vec::new();
            for path in paths {
                if !unique.iter().any(|p| p.equals(&path)) {
                    unique.push(path);
                }
            }
            Value::list(unique)
        }
        Native::DarwinShlinkcom => {
            let lo = args.require(2, "lo", func)?.display();
            if !DARWIN_LINKED_BOOST.iter().any(|name| lo.contains(name)) {
                return Err(ScriptError::unsupported(format!(
                    "darwin_shlinkcom called for unknown library {}",
                    lo
                )));
            }
            Value::None
        }
        Native::GetGccVersion => Value::Int(50400),
        Native::BoostLibraryWithPythonVersion => args.require(0, "name", func)?,
        Native::GetenvBool => {
            let name = str_arg(&mut args, 0, "variable_name", func)?;
            let value = ENV_BOOLS
                .iter()
                .find(|(known, _)| *known == name)
                .map(|(_, value)| *value)
                .ok_or_else(|| ScriptError::unsupported(format!("Unknown getenv_bool {}", name)))?;
            Value::Bool(value)
        }
        Native::SelectMatching => {
            let key = str_arg(&mut args, 0, "key", func)?;
            let choices = sequence(&args.require(1, "choices", func)?)?;
            let default = args.take(2, "default").unwrap_or(Value::None);
            for choice in choices {
                let pair = sequence(&choice)?;
                let [pattern, value] = pair.as_slice() else {
                    return Err(ScriptError::type_error("select_matching choices must be pairs"));
                };
                if compile(&pattern.display())?.is_match(&key) {
                    return Ok(value.clone());
                }
            }
            default
        }
        Native::ShowString | Native::FullCommandPath => {
            return Err(ScriptError::raised("NotImplementedError", "Not Implemented"))
        }
        Native::NormJoin => {
            let a = str_arg(&mut args, 0, "a", func)?;
            let b = str_arg(&mut args, 1, "b", func)?;
            Value::str(&posix_normpath(&posix_join(&a, &b)))
        }
        Native::FullyBuffered => {
            let command = str_arg(&mut args, 0, "command", func)?;
            if command != "nvcc --version" {
                return Err(ScriptError::unsupported(format!(
                    "No command known; {}",
                    command
                )));
            }
            Value::host(HostObject::RunResult(vec![
                "Cuda compilation tools, release 8.0, V8.0.61".to_string(),
            ]))
        }
        Native::UnderBuild => Value::str(&posix_join("UNDERBUILD", &str_arg(&mut args, 0, "path", func)?)),
        Native::UnderBase => Value::str(&posix_join("BASEDIR", &str_arg(&mut args, 0, "path", func)?)),
        Native::UnderDist => {
            let module = str_arg(&mut args, 0, "module_name", func)?;
            let path = str_arg(&mut args, 1, "path", func)?;
            Value::str(&posix_join(&format!("DISTPATH[{}]", module), &path))
        }
        Native::DistPath => {
            let module = str_arg(&mut args, 0, "module_name", func)?;
            Value::str(&dist_path(ctx, &module)?)
        }
        Native::FindInRepositories => Value::str(&posix_join(
            "REPOSITORIES",
            &str_arg(&mut args, 0, "relative_path", func)?,
        )),
        Native::HasModule => Value::Bool(true),
        Native::WriteDispatcherInBin => {
            let source = args.require(0, "source_file", func)?.display();
            let target = args.require(1, "target_file", func)?.display();
            tracing::debug!("Called to write dispatcher {} to {}", target, source);
            Value::None
        }
        Native::IncludeRegistry => Value::host(HostObject::IncludeRegistry(Default::default())),
        Native::NumpyGetInclude => Value::str("NUMPY_INCLUDE"),

        Native::ReSearch | Native::ReMatch => {
            let pattern = str_arg(&mut args, 0, "pattern", func)?;
            let text = str_arg(&mut args, 1, "string", func)?;
            let pattern = if native == Native::ReMatch {
                format!("^(?:{})", pattern)
            } else {
                pattern
            };
            match compile(&pattern)?.captures(&text) {
                Some(captures) => match_object(&captures),
                None => Value::None,
            }
        }
        Native::ReSub => {
            let pattern = str_arg(&mut args, 0, "pattern", func)?;
            let repl = str_arg(&mut args, 1, "repl", func)?;
            let text = str_arg(&mut args, 2, "string", func)?;
            let count = match args.take(3, "count") {
                Some(Value::Int(n)) if n > 0 => n as usize,
                _ => 0,
            };
            let regex = compile(&pattern)?;
            let template = replacement_template(&repl);
            Value::str(&regex.replacen(&text, count, template.as_str()))
        }

        Native::Environment
        | Native::Open
        | Native::Builder
        | Native::Export
        | Native::Import
        | Native::SConscript
        | Native::Glob
        | Native::Depends => {
            return Err(ScriptError::unsupported(format!(
                "{} is only available to build scripts",
                func
            )))
        }
    })
}

/// `libtbx.env.dist_path(module)`: the module's real directory, looked up
/// with interception suspended.
pub fn dist_path(ctx: &FakeContext<'_>, module: &str) -> Result<String, ScriptError> {
    tracing::debug!("Asked for dist path {} under {}", module, ctx.dist_path.display());
    let _real = ctx.interceptor.suspend();
    let dist = ctx.dist_path.to_string_lossy();
    for repo in ctx.roots {
        let path = posix_normpath(&posix_join(&posix_join(&dist, repo), module));
        if ctx.probe.is_dir(Path::new(&path)) {
            tracing::debug!("  found exact {}", path);
            return Ok(path);
        }
    }
    Err(ScriptError::MissingDist(format!(
        "Could not find dist path for module {}",
        module
    )))
}

/// Attributes and methods of the library's host objects.
pub fn library_attribute(
    receiver: &Rc<dyn crate::script::HostValue>,
    object: &HostObject,
    name: &str,
) -> Option<Value> {
    match (object, name) {
        (HostObject::RunResult(lines), "stdout_lines") => Some(Value::string_list(lines)),
        (HostObject::RunResult(_), "raise_if_errors") => Some(HostObject::method(receiver, name)),
        (HostObject::IncludeRegistry(_), "scan_boost" | "set_boost_dir_name" | "append" | "prepend") => {
            Some(HostObject::method(receiver, name))
        }
        (HostObject::UnderBuild(path), "path") => Some(Value::str(path)),
        (HostObject::Match { .. }, "group" | "groups") => Some(HostObject::method(receiver, name)),
        (HostObject::Mock(parent), _) => Some(Value::host(HostObject::Mock(format!(
            "{}.{}",
            parent, name
        )))),
        _ => None,
    }
}

/// `match.group(n)` and `match.groups()`.
pub fn match_method(
    groups: &[Option<String>],
    name: &str,
    args: &CallArgs,
) -> Result<Value, ScriptError> {
    let as_value = |g: &Option<String>| g.as_deref().map(Value::str).unwrap_or(Value::None);
    match name {
        "groups" => Ok(Value::tuple(groups.iter().skip(1).map(as_value).collect())),
        _ => {
            let index = match args.positional.first() {
                None => 0,
                Some(Value::Int(i)) if *i >= 0 => *i as usize,
                Some(other) => {
                    return Err(ScriptError::raised(
                        "IndexError",
                        format!("no such group: {}", other.repr()),
                    ))
                }
            };
            groups
                .get(index)
                .map(as_value)
                .ok_or_else(|| ScriptError::raised("IndexError", "no such group"))
        }
    }
}
