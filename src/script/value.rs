//! Runtime values of the build-script interpreter.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::ast::FunctionDef;
use super::error::ScriptError;

/// A variable scope. Insertion order is kept so that `dir()`-like listings
/// and exports are stable.
pub type Scope = Rc<RefCell<IndexMap<String, Value>>>;

pub fn new_scope() -> Scope {
    Rc::new(RefCell::new(IndexMap::new()))
}

/// An object owned by the embedding rather than the interpreter.
pub trait HostValue: fmt::Debug {
    fn type_name(&self) -> &str;
    fn as_any(&self) -> &dyn Any;

    fn repr(&self) -> String {
        format!("<{} object>", self.type_name())
    }

    /// The string form used by `str()` and `%s`.
    fn display(&self) -> String {
        self.repr()
    }

    /// The result of `abs(obj)`, for objects that define one.
    fn abs(&self) -> Option<Value> {
        None
    }
}

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Dict>>),
    Function(Rc<Function>),
    Builtin(Builtin),
    Method(Rc<BoundMethod>),
    Namespace(Rc<Namespace>),
    Host(Rc<dyn HostValue>),
    ExceptionType(Rc<str>),
    Exception(Rc<ExceptionValue>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

/// A user-defined function or lambda, with its defaults already evaluated.
pub struct Function {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Option<Value>>,
    pub globals: Scope,
    /// Enclosing function scopes, innermost last.
    pub closure: Vec<Scope>,
}

/// A method looked up on a built-in value, e.g. `"a b".split`.
pub struct BoundMethod {
    pub receiver: Value,
    pub name: Rc<str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceKind {
    /// An importable module
    Module,
    /// An attribute bag such as `group_args(...)`
    Record,
}

/// A module or attribute record with mutable attributes.
#[derive(Debug)]
pub struct Namespace {
    pub name: String,
    pub kind: NamespaceKind,
    pub attrs: RefCell<IndexMap<String, Value>>,
}

impl Namespace {
    pub fn new(name: impl Into<String>, kind: NamespaceKind) -> Rc<Self> {
        Rc::new(Namespace {
            name: name.into(),
            kind,
            attrs: RefCell::new(IndexMap::new()),
        })
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.attrs.borrow().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.attrs.borrow_mut().insert(name.into(), value);
    }
}

#[derive(Debug)]
pub struct ExceptionValue {
    pub kind: Rc<str>,
    pub message: String,
}

/// Hashable dictionary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    None,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
    Tuple(Vec<Key>),
}

impl Key {
    pub fn to_value(&self) -> Value {
        match self {
            Key::None => Value::None,
            Key::Bool(b) => Value::Bool(*b),
            Key::Int(i) => Value::Int(*i),
            Key::Str(s) => Value::Str(s.clone()),
            Key::Tuple(items) => Value::Tuple(Rc::new(items.iter().map(Key::to_value).collect())),
        }
    }
}

pub type Dict = IndexMap<Key, Value>;

/// Built-in functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Len,
    Str,
    Int,
    Float,
    Bool,
    List,
    Tuple,
    Dict,
    Set,
    Range,
    Enumerate,
    Zip,
    Sorted,
    Reversed,
    IsInstance,
    HasAttr,
    GetAttr,
    SetAttr,
    Min,
    Max,
    Sum,
    Any,
    All,
    Abs,
    Print,
    Repr,
    Map,
    Filter,
}

impl Builtin {
    pub const ALL: &'static [(&'static str, Builtin)] = &[
        ("len", Builtin::Len),
        ("str", Builtin::Str),
        ("int", Builtin::Int),
        ("float", Builtin::Float),
        ("bool", Builtin::Bool),
        ("list", Builtin::List),
        ("tuple", Builtin::Tuple),
        ("dict", Builtin::Dict),
        ("set", Builtin::Set),
        ("range", Builtin::Range),
        ("xrange", Builtin::Range),
        ("enumerate", Builtin::Enumerate),
        ("zip", Builtin::Zip),
        ("sorted", Builtin::Sorted),
        ("reversed", Builtin::Reversed),
        ("isinstance", Builtin::IsInstance),
        ("hasattr", Builtin::HasAttr),
        ("getattr", Builtin::GetAttr),
        ("setattr", Builtin::SetAttr),
        ("min", Builtin::Min),
        ("max", Builtin::Max),
        ("sum", Builtin::Sum),
        ("any", Builtin::Any),
        ("all", Builtin::All),
        ("abs", Builtin::Abs),
        ("print", Builtin::Print),
        ("repr", Builtin::Repr),
        ("map", Builtin::Map),
        ("filter", Builtin::Filter),
    ];

    pub fn name(&self) -> &'static str {
        Self::ALL
            .iter()
            .find(|(_, b)| b == self)
            .map(|(n, _)| *n)
            .unwrap_or("<builtin>")
    }

    pub fn lookup(name: &str) -> Option<Builtin> {
        Self::ALL.iter().find(|(n, _)| *n == name).map(|(_, b)| *b)
    }
}

/// Exception types known to scripts.
pub const EXCEPTION_TYPES: &[&str] = &[
    "BaseException",
    "Exception",
    "RuntimeError",
    "ImportError",
    "ModuleNotFoundError",
    "KeyError",
    "IndexError",
    "LookupError",
    "ValueError",
    "AttributeError",
    "NameError",
    "TypeError",
    "AssertionError",
    "NotImplementedError",
    "OSError",
    "IOError",
    "EnvironmentError",
    "ZeroDivisionError",
    "StopIteration",
];

/// Whether an exception of kind `raised` is caught by a handler for `handler`.
pub fn exception_matches(raised: &str, handler: &str) -> bool {
    if raised == handler || handler == "BaseException" {
        return true;
    }
    match handler {
        "Exception" => raised != "BaseException",
        "LookupError" => matches!(raised, "KeyError" | "IndexError"),
        "ImportError" => raised == "ModuleNotFoundError",
        "RuntimeError" => raised == "NotImplementedError",
        "OSError" | "IOError" | "EnvironmentError" => {
            matches!(raised, "OSError" | "IOError" | "EnvironmentError")
        }
        _ => false,
    }
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(entries: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(entries)))
    }

    pub fn host<T: HostValue + 'static>(value: T) -> Value {
        Value::Host(Rc::new(value))
    }

    pub fn string_list<I, S>(items: I) -> Value
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Value::list(items.into_iter().map(|s| Value::str(s.as_ref())).collect())
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::None => "NoneType".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::Str(_) => "str".to_string(),
            Value::List(_) => "list".to_string(),
            Value::Tuple(_) => "tuple".to_string(),
            Value::Dict(_) => "dict".to_string(),
            Value::Function(_) => "function".to_string(),
            Value::Builtin(_) => "builtin_function_or_method".to_string(),
            Value::Method(_) => "method".to_string(),
            Value::Namespace(ns) => match ns.kind {
                NamespaceKind::Module => "module".to_string(),
                NamespaceKind::Record => "group_args".to_string(),
            },
            Value::Host(h) => h.type_name().to_string(),
            Value::ExceptionType(_) => "type".to_string(),
            Value::Exception(e) => e.kind.to_string(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            _ => true,
        }
    }

    pub fn to_key(&self) -> Result<Key, ScriptError> {
        Ok(match self {
            Value::None => Key::None,
            Value::Bool(b) => Key::Bool(*b),
            Value::Int(i) => Key::Int(*i),
            Value::Float(f) if f.fract() == 0.0 => Key::Int(*f as i64),
            Value::Str(s) => Key::Str(s.clone()),
            Value::Tuple(items) => Key::Tuple(
                items
                    .iter()
                    .map(Value::to_key)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            other => {
                return Err(ScriptError::type_error(format!(
                    "unhashable type: '{}'",
                    other.type_name()
                )))
            }
        })
    }

    /// Identity comparison (`is`).
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Namespace(a), Value::Namespace(b)) => Rc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => Rc::ptr_eq(a, b),
            (Value::ExceptionType(a), Value::ExceptionType(b)) => a == b,
            (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Value equality (`==`).
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Int(b)) | (Value::Int(b), Value::Bool(a)) => *a as i64 == *b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || seq_equals(&a.borrow(), &b.borrow())
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_equals(a, b),
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|other| v.equals(other)))
            }
            _ => self.is(other),
        }
    }

    /// A recursive copy of containers; other values are shared.
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::List(items) => {
                Value::list(items.borrow().iter().map(Value::deep_copy).collect())
            }
            Value::Tuple(items) => Value::tuple(items.iter().map(Value::deep_copy).collect()),
            Value::Dict(entries) => Value::dict(
                entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_copy()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// The `str()` form.
    pub fn display(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(e) => e.message.clone(),
            Value::Host(h) => h.display(),
            other => other.repr(),
        }
    }

    /// The `repr()` form.
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => repr_str(s),
            Value::List(items) => format!(
                "[{}]",
                items
                    .borrow()
                    .iter()
                    .map(Value::repr)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Value::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Value::Tuple(items) => format!(
                "({})",
                items.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
            ),
            Value::Dict(entries) => format!(
                "{{{}}}",
                entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.to_value().repr(), v.repr()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Value::Function(f) => format!("<function {}>", f.def.name),
            Value::Builtin(b) => format!("<built-in function {}>", b.name()),
            Value::Method(m) => format!(
                "<built-in method {} of {} object>",
                m.name,
                m.receiver.type_name()
            ),
            Value::Namespace(ns) => match ns.kind {
                NamespaceKind::Module => format!("<module '{}'>", ns.name),
                NamespaceKind::Record => format!(
                    "group_args({})",
                    ns.attrs
                        .borrow()
                        .iter()
                        .map(|(k, v)| format!("{}={}", k, v.repr()))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            },
            Value::Host(h) => h.repr(),
            Value::ExceptionType(name) => format!("<class '{}'>", name),
            Value::Exception(e) => format!("{}({})", e.kind, repr_str(&e.message)),
        }
    }
}

fn seq_equals(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
}

/// Floats print with a decimal point even when integral.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

pub fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Positional and keyword arguments of a call.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keywords: Vec<(Rc<str>, Value)>,
}

impl CallArgs {
    pub fn positional(values: Vec<Value>) -> Self {
        CallArgs {
            positional: values,
            keywords: Vec::new(),
        }
    }

    /// Remove and return a keyword argument.
    pub fn take_keyword(&mut self, name: &str) -> Option<Value> {
        let idx = self.keywords.iter().position(|(k, _)| &**k == name)?;
        Some(self.keywords.remove(idx).1)
    }

    /// Argument by position, falling back to a keyword of the given name.
    pub fn take(&mut self, index: usize, name: &str) -> Option<Value> {
        if let Some(v) = self.take_keyword(name) {
            return Some(v);
        }
        self.positional.get(index).cloned()
    }

    /// Like `take`, but the argument is mandatory.
    pub fn require(&mut self, index: usize, name: &str, func: &str) -> Result<Value, ScriptError> {
        self.take(index, name).ok_or_else(|| {
            ScriptError::type_error(format!("{}() missing required argument '{}'", func, name))
        })
    }

    pub fn expect_no_keywords(&self, func: &str) -> Result<(), ScriptError> {
        match self.keywords.first() {
            Some((k, _)) => Err(ScriptError::type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                func, k
            ))),
            None => Ok(()),
        }
    }

    pub fn expect_at_most(&self, count: usize, func: &str) -> Result<(), ScriptError> {
        if self.positional.len() > count {
            return Err(ScriptError::type_error(format!(
                "{}() takes at most {} positional arguments ({} given)",
                func,
                count,
                self.positional.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deep_copy_is_independent() {
        let inner = Value::string_list(["a"]);
        let mut entries = Dict::new();
        entries.insert(Key::Str(Rc::from("LIBS")), inner.clone());
        let original = Value::dict(entries);
        let copy = original.deep_copy();

        if let Value::List(items) = &inner {
            items.borrow_mut().push(Value::str("b"));
        }
        let Value::Dict(copied) = &copy else {
            panic!("expected dict");
        };
        let libs = copied.borrow()[&Key::Str(Rc::from("LIBS"))].clone();
        assert_eq!(libs.repr(), "['a']");
        assert!(!original.equals(&copy));
    }

    #[test]
    fn test_repr_matches_script_conventions() {
        assert_eq!(Value::Float(2.0).repr(), "2.0");
        assert_eq!(Value::Float(0.5).repr(), "0.5");
        assert_eq!(Value::str("it's").repr(), "\"it's\"");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(Value::None.display(), "None");
    }

    #[test]
    fn test_equality_across_numeric_types() {
        assert!(Value::Int(1).equals(&Value::Float(1.0)));
        assert!(Value::Bool(true).equals(&Value::Int(1)));
        assert!(!Value::str("1").equals(&Value::Int(1)));
    }

    #[test]
    fn test_exception_hierarchy() {
        assert!(exception_matches("KeyError", "Exception"));
        assert!(exception_matches("KeyError", "LookupError"));
        assert!(exception_matches("IOError", "OSError"));
        assert!(!exception_matches("KeyError", "ValueError"));
    }

    #[test]
    fn test_unhashable_key() {
        assert!(Value::list(vec![]).to_key().is_err());
        assert_eq!(
            Value::tuple(vec![Value::Int(1), Value::str("a")]).to_key().unwrap(),
            Key::Tuple(vec![Key::Int(1), Key::Str(Rc::from("a"))])
        );
    }
}
