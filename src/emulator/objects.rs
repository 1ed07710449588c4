//! Objects the emulator hands to build scripts.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::core::{SharedSource, TargetId, TargetKind};
use crate::emulator::configure::{BuilderObject, FakeFile};
use crate::emulator::environment::Environment;
use crate::script::{HostValue, Value};

/// Functions implemented by the emulator rather than by scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Native {
    // Injected into every SConscript
    Environment,
    Open,
    Builder,
    Export,
    Import,
    SConscript,
    Glob,
    Depends,

    // os and os.path
    PathJoin,
    Dirname,
    Basename,
    Normpath,
    Split,
    Splitext,
    Abspath,
    Isabs,
    Relpath,
    Expanduser,
    IsDir,
    IsFile,
    Exists,
    FakeIsDir,
    FakeIsFile,
    FakeExists,
    Mkdir,
    FakeMkdir,
    Listdir,
    Getcwd,
    Getenv,

    // libtbx
    GroupArgs,
    IsBit64,
    PythonIncludePath,
    UniquePaths,
    DarwinShlinkcom,
    GetGccVersion,
    BoostLibraryWithPythonVersion,
    GetenvBool,
    SelectMatching,
    ShowString,
    NormJoin,
    FullCommandPath,
    FullyBuffered,
    UnderBuild,
    UnderBase,
    DistPath,
    UnderDist,
    FindInRepositories,
    HasModule,
    WriteDispatcherInBin,
    IncludeRegistry,

    // numpy and re
    NumpyGetInclude,
    ReSearch,
    ReMatch,
    ReSub,
}

impl Native {
    pub fn name(&self) -> &'static str {
        match self {
            Native::Environment => "Environment",
            Native::Open => "open",
            Native::Builder => "Builder",
            Native::Export => "Export",
            Native::Import => "Import",
            Native::SConscript => "SConscript",
            Native::Glob => "Glob",
            Native::Depends => "Depends",
            Native::PathJoin => "join",
            Native::Dirname => "dirname",
            Native::Basename => "basename",
            Native::Normpath => "normpath",
            Native::Split => "split",
            Native::Splitext => "splitext",
            Native::Abspath => "abspath",
            Native::Isabs => "isabs",
            Native::Relpath => "relpath",
            Native::Expanduser => "expanduser",
            Native::IsDir | Native::FakeIsDir => "isdir",
            Native::IsFile | Native::FakeIsFile => "isfile",
            Native::Exists | Native::FakeExists => "exists",
            Native::Mkdir | Native::FakeMkdir => "mkdir",
            Native::Listdir => "listdir",
            Native::Getcwd => "getcwd",
            Native::Getenv => "getenv",
            Native::GroupArgs => "group_args",
            Native::IsBit64 => "is_64bit_architecture",
            Native::PythonIncludePath => "python_include_path",
            Native::UniquePaths => "unique_paths",
            Native::DarwinShlinkcom => "darwin_shlinkcom",
            Native::GetGccVersion => "get_gcc_version",
            Native::BoostLibraryWithPythonVersion => "get_boost_library_with_python_version",
            Native::GetenvBool => "getenv_bool",
            Native::SelectMatching => "select_matching",
            Native::ShowString => "show_string",
            Native::NormJoin => "norm_join",
            Native::FullCommandPath => "full_command_path",
            Native::FullyBuffered => "fully_buffered",
            Native::UnderBuild => "under_build",
            Native::UnderBase => "under_base",
            Native::DistPath => "dist_path",
            Native::UnderDist => "under_dist",
            Native::FindInRepositories => "find_in_repositories",
            Native::HasModule => "has_module",
            Native::WriteDispatcherInBin => "write_dispatcher_in_bin",
            Native::IncludeRegistry => "include_registry",
            Native::NumpyGetInclude => "get_include",
            Native::ReSearch => "search",
            Native::ReMatch => "match",
            Native::ReSub => "sub",
        }
    }

    pub fn value(self) -> Value {
        Value::host(HostObject::Native(self))
    }
}

/// A reusable compiled object returned by `env.SharedObject(...)`.
#[derive(Debug, Clone)]
pub struct SharedObjectRef {
    pub source: SharedSource,
}

/// Everything a script can hold that the interpreter does not own.
#[derive(Debug)]
pub enum HostObject {
    Native(Native),
    Environment(Environment),
    SharedObject(SharedObjectRef),
    /// The return of a library builder call
    Target { id: TargetId, kind: TargetKind, name: String },
    /// The element returned by `Program(...)`
    ProgramReturn(String),
    /// `env.Configure()`
    Configure,
    Builder(BuilderObject),
    File(FakeFile),
    /// Result of `easy_run.fully_buffered`
    RunResult(Vec<String>),
    /// An instance of `libtbx.env_config.include_registry`
    IncludeRegistry(RefCell<Vec<Value>>),
    /// A path relative to the build directory, `abs()` resolves it
    UnderBuild(String),
    /// A callable that accepts anything and returns another mock
    Mock(String),
    /// A regular-expression match
    Match { groups: Vec<Option<String>> },
    /// A method looked up on another host object
    Method { receiver: Rc<dyn HostValue>, name: String },
}

impl HostObject {
    pub fn method(receiver: &Rc<dyn HostValue>, name: &str) -> Value {
        Value::host(HostObject::Method {
            receiver: Rc::clone(receiver),
            name: name.to_string(),
        })
    }

    /// Downcast a host value produced by this emulator.
    pub fn of(value: &Rc<dyn HostValue>) -> Option<&HostObject> {
        value.as_any().downcast_ref::<HostObject>()
    }

    /// Downcast a script value holding one of our host objects.
    pub fn from_value(value: &Value) -> Option<&HostObject> {
        match value {
            Value::Host(host) => Self::of(host),
            _ => None,
        }
    }
}

impl HostValue for HostObject {
    fn type_name(&self) -> &str {
        match self {
            HostObject::Native(_) => "function",
            HostObject::Environment(_) => "SConsEnvironment",
            HostObject::SharedObject(_) => "SharedObject",
            HostObject::Target { .. } => "Target",
            HostObject::ProgramReturn(_) => "ProgramReturn",
            HostObject::Configure => "SConsConfigurationContext",
            HostObject::Builder(_) => "Builder",
            HostObject::File(_) => "file",
            HostObject::RunResult(_) => "EasyRunResult",
            HostObject::IncludeRegistry(_) => "include_registry",
            HostObject::UnderBuild(_) => "UnderBuild",
            HostObject::Mock(_) => "Mock",
            HostObject::Match { .. } => "Match",
            HostObject::Method { .. } => "method",
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn repr(&self) -> String {
        match self {
            HostObject::Native(native) => format!("<function {}>", native.name()),
            HostObject::SharedObject(obj) => format!("<SharedObject {}>", obj.source.sources.join(",")),
            HostObject::Target { kind, name, .. } => format!("<Target {} {}>", kind, name),
            HostObject::UnderBuild(path) => format!("UnderBuild('{}')", path),
            HostObject::Mock(name) => format!("<Mock name='{}'>", name),
            HostObject::File(file) => format!("<fake file '{}'>", file.filename),
            HostObject::Method { receiver, name } => {
                format!("<bound method {}.{}>", receiver.type_name(), name)
            }
            other => format!("<{} object>", other.type_name()),
        }
    }

    fn display(&self) -> String {
        match self {
            HostObject::ProgramReturn(path) => path.clone(),
            HostObject::Target { name, .. } => name.clone(),
            other => other.repr(),
        }
    }

    fn abs(&self) -> Option<Value> {
        match self {
            HostObject::UnderBuild(path) => Some(Value::str(&format!("UNDERBUILD/{}", path))),
            _ => None,
        }
    }
}

/// Keyword arguments as an ordered map.
pub fn keyword_map(keywords: Vec<(Rc<str>, Value)>) -> IndexMap<String, Value> {
    keywords
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
