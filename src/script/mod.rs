//! A small interpreter for the subset of the build-script language that
//! legacy SConscript files use.
//!
//! Scripts are parsed into an [`ast::Program`] and evaluated by
//! [`Interpreter`]. Anything the scripts reach outside of the language
//! itself (imports, builder calls, host objects) goes through the [`Host`]
//! trait, which the build emulator implements.

pub mod ast;
pub mod builtins;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod module;
pub mod parser;
pub mod value;

pub use error::{ScriptError, SyntaxError};
pub use eval::{Host, Interpreter, NullHost};
pub use module::{literal_eval, ScriptModule};
pub use value::{CallArgs, HostValue, Namespace, NamespaceKind, Scope, Value};
