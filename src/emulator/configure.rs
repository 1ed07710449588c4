//! `Configure()` checks, `Builder()` objects and the fake `open()`.
//!
//! Configuration checks compile and run probe programs in a real build.
//! Here each probe the legacy scripts make is recognised and given the
//! answer a working Linux toolchain would produce. Anything else is fatal.

use std::cell::RefCell;

use indexmap::IndexMap;

use crate::script::{ScriptError, Value};

/// `conf.TryRun(code, extension)` keyed on the calling script function or
/// on the probe source.
pub fn try_run(code: &str, caller: Option<&str>) -> Result<(i64, &'static str), ScriptError> {
    match caller {
        Some("enable_openmp_if_possible") => return Ok((1, "e=2.71828, pi=3.14159")),
        Some("write_type_id_eq_h") => return Ok((1, "0010")),
        _ => {}
    }
    if code.contains("gltbx/include_opengl.h") {
        return Ok((1, "6912"));
    }
    Err(ScriptError::unsupported(format!(
        "Unable to determine purpose of TryRun from {}",
        caller.unwrap_or("<module>")
    )))
}

/// Probe sources `conf.TryCompile` accepts.
const COMPILE_PROBES: &[&str] = &[
    "#include <iostream>",
    "#include <Python.h>",
    "#include <fftw3.h>",
    "#include <gtest/gtest.h>",
];

/// `conf.TryCompile(code, extension)`.
pub fn try_compile(code: &str) -> Result<i64, ScriptError> {
    if COMPILE_PROBES.contains(&code) || code.trim() == "#include <gltbx/include_opengl.h>" {
        Ok(1)
    } else {
        Err(ScriptError::unsupported(format!(
            "Not recognised TryCompile: {:?}",
            code
        )))
    }
}

/// A custom builder declared with `Builder(action=..., ...)`.
#[derive(Debug)]
pub struct BuilderObject {
    pub action: Value,
    pub options: IndexMap<String, Value>,
    pub src_builders: RefCell<Vec<Value>>,
}

impl BuilderObject {
    pub fn new(action: Value, options: IndexMap<String, Value>) -> Self {
        BuilderObject {
            action,
            options,
            src_builders: RefCell::new(Vec::new()),
        }
    }

    pub fn add_src_builder(&self, builder: Value) {
        self.src_builders.borrow_mut().push(builder);
    }
}

/// A file opened by a script. Writes are kept in memory and never reach
/// the disk; reads only answer the callers known to need them.
#[derive(Debug)]
pub struct FakeFile {
    pub filename: String,
    pub data: RefCell<String>,
}

impl FakeFile {
    pub fn new(filename: &str) -> Self {
        FakeFile {
            filename: filename.to_string(),
            data: RefCell::new(String::new()),
        }
    }

    pub fn write(&self, text: &str) {
        self.data.borrow_mut().push_str(text);
    }

    /// Reads return an empty text for the `csymlib.c` rewrite, `None`
    /// for everything else.
    pub fn read(&self, caller: Option<&str>) -> Value {
        if self.filename.contains("csymlib.c") || caller == Some("replace_printf") {
            Value::str("")
        } else {
            Value::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_run_by_caller() {
        assert_eq!(
            try_run("int main(){}", Some("enable_openmp_if_possible")).unwrap(),
            (1, "e=2.71828, pi=3.14159")
        );
        assert_eq!(try_run("", Some("write_type_id_eq_h")).unwrap(), (1, "0010"));
        assert_eq!(
            try_run("#include <gltbx/include_opengl.h>\nint main(){}", None).unwrap(),
            (1, "6912")
        );
        assert!(matches!(
            try_run("int main(){}", Some("something_else")),
            Err(ScriptError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_try_compile_known_probes() {
        assert_eq!(try_compile("#include <Python.h>").unwrap(), 1);
        assert_eq!(try_compile("\n#include <gltbx/include_opengl.h>\n").unwrap(), 1);
        assert!(try_compile("#include <boost/thread.hpp>").is_err());
        // Only the exact probe text is accepted
        assert!(try_compile(" #include <iostream>").is_err());
    }

    #[test]
    fn test_fake_file() {
        let file = FakeFile::new("ccp4io/libccp4/csymlib.c");
        file.write("a");
        file.write("b");
        assert_eq!(*file.data.borrow(), "ab");
        assert_eq!(file.read(None).display(), "");

        let other = FakeFile::new("other.c");
        assert!(matches!(other.read(None), Value::None));
        assert_eq!(other.read(Some("replace_printf")).display(), "");
    }
}
