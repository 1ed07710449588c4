//! The configuration object returned by `Environment()`.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::script::value::Dict;
use crate::script::{ScriptError, Value};

/// A setting's value when a script reads it without ever setting it.
#[derive(Debug, Clone, Copy)]
enum Fallback {
    Str(&'static str),
    List(&'static [&'static str]),
    EmptyDict,
}

/// Documented defaults of the settings scripts read before writing.
const DEFAULTS: &[(&str, Fallback)] = &[
    ("OBJSUFFIX", Fallback::Str(".o")),
    ("SHLINKFLAGS", Fallback::List(&[])),
    ("BUILDERS", Fallback::EmptyDict),
    ("SHLINKCOM", Fallback::List(&["SHLINKCOMDEFAULT"])),
    ("LINKCOM", Fallback::List(&["LINKCOMDEFAULT"])),
    ("CCFLAGS", Fallback::List(&[])),
    ("SHCCFLAGS", Fallback::List(&[])),
    ("CXXFLAGS", Fallback::List(&[])),
    ("SHCXXFLAGS", Fallback::List(&[])),
    ("PROGPREFIX", Fallback::Str("")),
    ("PROGSUFFIX", Fallback::Str("")),
    ("LIBPREFIX", Fallback::Str("lib")),
    ("SHLIBPREFIX", Fallback::Str("lib")),
    ("LIBS", Fallback::List(&[])),
    ("CPPPATH", Fallback::List(&[])),
];

fn default_value(key: &str) -> Option<Value> {
    DEFAULTS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, default)| match default {
            Fallback::Str(s) => Value::str(s),
            Fallback::List(items) => Value::string_list(items.iter()),
            Fallback::EmptyDict => Value::dict(Dict::new()),
        })
}

/// Build settings: explicitly set values over documented defaults.
///
/// Every environment owns its values. [`Environment::clone_with`] copies
/// them recursively, so later mutation of either copy is never visible in
/// the other.
#[derive(Debug, Default)]
pub struct Environment {
    settings: RefCell<IndexMap<String, Value>>,
    /// Plain attributes assigned by scripts, e.g. `env.foo = 1`
    attributes: RefCell<IndexMap<String, Value>>,
}

/// Items to add for `Append`/`Prepend`. A bare string is one item.
fn as_items(key: &str, value: &Value) -> Result<Vec<Value>, ScriptError> {
    match value {
        Value::Str(_) => Ok(vec![value.clone()]),
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Tuple(items) => Ok(items.to_vec()),
        other => Err(ScriptError::type_error(format!(
            "cannot add {} to setting {}",
            other.type_name(),
            key
        ))),
    }
}

impl Environment {
    /// A new environment from constructor keywords.
    pub fn new(settings: IndexMap<String, Value>) -> Self {
        Environment {
            settings: RefCell::new(
                settings
                    .into_iter()
                    .map(|(k, v)| (k, v.deep_copy()))
                    .collect(),
            ),
            attributes: RefCell::new(IndexMap::new()),
        }
    }

    /// `env[key]`: the explicit value, else the default.
    pub fn get(&self, key: &str) -> Result<Value, ScriptError> {
        if let Some(value) = self.settings.borrow().get(key) {
            return Ok(value.clone());
        }
        default_value(key).ok_or_else(|| ScriptError::key_error(format!("'{}'", key)))
    }

    /// Only explicitly set values.
    pub fn explicit(&self, key: &str) -> Option<Value> {
        self.settings.borrow().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: Value) {
        self.settings.borrow_mut().insert(key.to_string(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.settings.borrow().contains_key(key) || default_value(key).is_some()
    }

    /// Extend settings, creating any that were never explicitly set.
    pub fn append(&self, values: &IndexMap<String, Value>) -> Result<(), ScriptError> {
        for (key, value) in values {
            let items = as_items(key, value)?;
            self.list_slot(key).borrow_mut().extend(items);
        }
        Ok(())
    }

    /// Like [`Environment::append`], but at the front.
    pub fn prepend(&self, values: &IndexMap<String, Value>) -> Result<(), ScriptError> {
        for (key, value) in values {
            let items = as_items(key, value)?;
            self.list_slot(key).borrow_mut().splice(0..0, items);
        }
        Ok(())
    }

    /// The list stored under `key`. A string already stored there becomes
    /// a one-element list.
    fn list_slot(&self, key: &str) -> Rc<RefCell<Vec<Value>>> {
        let mut settings = self.settings.borrow_mut();
        let slot = settings
            .entry(key.to_string())
            .or_insert_with(|| Value::list(Vec::new()));
        match slot {
            Value::List(items) => Rc::clone(items),
            other => {
                let items = match &*other {
                    Value::None => Vec::new(),
                    Value::Tuple(items) => items.to_vec(),
                    single => vec![single.clone()],
                };
                let list = Rc::new(RefCell::new(items));
                *other = Value::List(Rc::clone(&list));
                list
            }
        }
    }

    pub fn replace(&self, values: IndexMap<String, Value>) {
        self.settings.borrow_mut().extend(values);
    }

    /// A deep copy of the explicit settings, updated with `overrides`.
    pub fn clone_with(&self, overrides: IndexMap<String, Value>) -> Environment {
        let clone = Environment::new(self.settings.borrow().clone());
        clone.replace(overrides);
        clone
    }

    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes.borrow().get(name).cloned()
    }

    pub fn set_attribute(&self, name: &str, value: Value) {
        self.attributes.borrow_mut().insert(name.to_string(), value);
    }

    /// Explicitly set keys, in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.settings.borrow().keys().cloned().collect()
    }
}

/// Methods scripts may call on an environment.
pub const METHODS: &[&str] = &[
    "Append",
    "Prepend",
    "Replace",
    "Configure",
    "Clone",
    "Copy",
    "has_key",
    "Repository",
    "SConscript",
    "SharedLibrary",
    "StaticLibrary",
    "Program",
    "cudaSharedLibrary",
    "SharedObject",
];

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_defaults_are_not_explicit() {
        let env = Environment::default();
        assert_eq!(env.get("SHLIBPREFIX").unwrap().display(), "lib");
        assert_eq!(env.get("SHLINKCOM").unwrap().repr(), "['SHLINKCOMDEFAULT']");
        assert!(env.explicit("SHLIBPREFIX").is_none());
        assert!(env.contains("LIBS"));
        assert!(!env.contains("NOPE"));
        assert_eq!(env.get("NOPE").unwrap_err().catchable_kind(), Some("KeyError"));
    }

    #[test]
    fn test_append_coerces_strings() {
        let env = Environment::default();
        env.append(&kw(&[("LIBS", Value::str("cctbx"))])).unwrap();
        env.append(&kw(&[("LIBS", Value::string_list(["scitbx", "omptbx"]))])).unwrap();
        env.prepend(&kw(&[("LIBS", Value::str("first"))])).unwrap();
        assert_eq!(
            env.get("LIBS").unwrap().repr(),
            "['first', 'cctbx', 'scitbx', 'omptbx']"
        );

        env.set("CCFLAGS", Value::str("-O2"));
        env.append(&kw(&[("CCFLAGS", Value::str("-g"))])).unwrap();
        assert_eq!(env.get("CCFLAGS").unwrap().repr(), "['-O2', '-g']");

        assert!(env.append(&kw(&[("LIBS", Value::Int(3))])).is_err());
    }

    #[test]
    fn test_append_ignores_defaults() {
        let env = Environment::default();
        env.append(&kw(&[("SHLINKCOM", Value::str("extra"))])).unwrap();
        assert_eq!(env.get("SHLINKCOM").unwrap().repr(), "['extra']");
    }

    #[test]
    fn test_clone_is_deep() {
        let shared = Value::string_list(["a"]);
        let parent = Environment::new(kw(&[("CPPPATH", shared.clone())]));
        // The constructor copies its arguments
        if let Value::List(items) = &shared {
            items.borrow_mut().push(Value::str("outside"));
        }
        assert_eq!(parent.get("CPPPATH").unwrap().repr(), "['a']");

        let child = parent.clone_with(kw(&[("LIBPREFIX", Value::str(""))]));
        child.append(&kw(&[("CPPPATH", Value::str("b"))])).unwrap();
        assert_eq!(parent.get("CPPPATH").unwrap().repr(), "['a']");
        assert_eq!(child.get("CPPPATH").unwrap().repr(), "['a', 'b']");
        assert_eq!(child.get("LIBPREFIX").unwrap().display(), "");
        assert_eq!(parent.get("LIBPREFIX").unwrap().display(), "lib");

        parent.append(&kw(&[("CPPPATH", Value::str("c"))])).unwrap();
        assert_eq!(child.get("CPPPATH").unwrap().repr(), "['a', 'b']");
    }

    #[test]
    fn test_replace_overwrites() {
        let env = Environment::new(kw(&[("LIBS", Value::string_list(["x"]))]));
        env.replace(kw(&[("LIBS", Value::string_list(["y"]))]));
        assert_eq!(env.get("LIBS").unwrap().repr(), "['y']");
        assert_eq!(env.keys(), vec!["LIBS"]);
    }
}
