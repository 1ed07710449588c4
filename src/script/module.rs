//! Loading and running a single build script.

use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::ast::{Expr, Literal, Program, UnaryOp};
use super::error::ScriptError;
use super::eval::{Host, Interpreter};
use super::parser::{parse_expression, parse_program};
use super::value::{new_scope, Dict, Scope, Value};

/// A parsed build script and the namespace it runs in.
///
/// The script is parsed once on load. Names can be injected before and
/// during execution; the namespace outlives the run so results can be
/// read back with [`ScriptModule::getvar`].
#[derive(Debug)]
pub struct ScriptModule {
    path: PathBuf,
    program: Program,
    globals: Scope,
}

impl ScriptModule {
    /// Read and parse the script at `path`.
    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let text = fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_source(path, &text)
    }

    /// Parse script text as if it had been read from `path`.
    pub fn from_source(path: &Path, text: &str) -> Result<Self, ScriptError> {
        let program = parse_program(text).map_err(|source| ScriptError::Syntax {
            path: path.to_path_buf(),
            source,
        })?;
        let module = ScriptModule {
            path: path.to_path_buf(),
            program,
            globals: new_scope(),
        };
        // Scripts see their own directory, not the file itself
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        module.inject("__file__", Value::str(&dir.to_string_lossy()));
        module.inject("__name__", Value::str("__main__"));
        Ok(module)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The module namespace. Shared, so natives can inject into it mid-run.
    pub fn globals(&self) -> Scope {
        self.globals.clone()
    }

    pub fn inject(&self, name: &str, value: Value) {
        self.globals.borrow_mut().insert(name.to_string(), value);
    }

    pub fn getvar(&self, name: &str) -> Option<Value> {
        self.globals.borrow().get(name).cloned()
    }

    /// Run the script top to bottom.
    pub fn execute(&self, interp: &mut Interpreter, host: &mut dyn Host) -> Result<(), ScriptError> {
        interp
            .run_program(host, &self.program, self.globals.clone())
            .map_err(|e| e.in_script(&self.path))
    }
}

/// Evaluate a literal-only expression: numbers, strings, `None`, booleans,
/// and lists, tuples and dicts of those.
pub fn literal_eval(text: &str) -> Result<Value, ScriptError> {
    let expr = parse_expression(text).map_err(|source| ScriptError::Syntax {
        path: PathBuf::from("<literal>"),
        source,
    })?;
    literal_value(&expr)
}

fn literal_value(expr: &Expr) -> Result<Value, ScriptError> {
    Ok(match expr {
        Expr::Const(literal) => match literal {
            Literal::None => Value::None,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::Int(*i),
            Literal::Float(f) => Value::Float(*f),
            Literal::Str(s) => Value::Str(Rc::clone(s)),
        },
        Expr::Unary(UnaryOp::Neg, inner) => match literal_value(inner)? {
            Value::Int(i) => Value::Int(-i),
            Value::Float(f) => Value::Float(-f),
            _ => return Err(ScriptError::raised("ValueError", "malformed literal")),
        },
        Expr::List(items) => Value::list(items.iter().map(literal_value).collect::<Result<_, _>>()?),
        Expr::Tuple(items) => Value::tuple(items.iter().map(literal_value).collect::<Result<_, _>>()?),
        Expr::Dict(entries) => {
            let mut dict = Dict::new();
            for (key, value) in entries {
                dict.insert(literal_value(key)?.to_key()?, literal_value(value)?);
            }
            Value::dict(dict)
        }
        // Set literals are rejected by the parser, so `set([...])` is the
        // only set spelling left and it is a call.
        _ => return Err(ScriptError::raised("ValueError", "malformed literal")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::eval::NullHost;

    #[test]
    fn test_file_is_script_directory() {
        let module = ScriptModule::from_source(Path::new("/dist/mod/SConscript"), "x = __file__\n").unwrap();
        let mut interp = Interpreter::new();
        module.execute(&mut interp, &mut NullHost).unwrap();
        assert_eq!(module.getvar("x").unwrap().display(), "/dist/mod");
    }

    #[test]
    fn test_injected_names_are_visible() {
        let module = ScriptModule::from_source(Path::new("S"), "y = base + 1\n").unwrap();
        module.inject("base", Value::Int(41));
        module.execute(&mut Interpreter::new(), &mut NullHost).unwrap();
        assert!(module.getvar("y").unwrap().equals(&Value::Int(42)));
    }

    #[test]
    fn test_syntax_error_carries_path() {
        let err = ScriptModule::from_source(Path::new("mod/SConscript"), "class X:\n  pass\n").unwrap_err();
        match err {
            ScriptError::Syntax { path, .. } => assert_eq!(path, Path::new("mod/SConscript")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_runtime_errors_name_the_script() {
        let module = ScriptModule::from_source(Path::new("a/SConscript"), "x = 1\ny = missing\n").unwrap();
        let err = module.execute(&mut Interpreter::new(), &mut NullHost).unwrap_err();
        assert_eq!(
            err.to_string(),
            "NameError: name 'missing' is not defined (a/SConscript:2)"
        );
    }

    #[test]
    fn test_literal_eval_manifest() {
        let text = "{\n  'modules_required_for_build': ['x'],  # build\n  'optional_modules': ['y'],\n  'n': -3,\n}\n";
        let value = literal_eval(text).unwrap();
        assert_eq!(
            value.repr(),
            "{'modules_required_for_build': ['x'], 'optional_modules': ['y'], 'n': -3}"
        );
    }

    #[test]
    fn test_literal_eval_rejects_calls() {
        assert!(literal_eval("open('x')").is_err());
        assert!(literal_eval("{'a': b}").is_err());
    }
}
