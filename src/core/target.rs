//! Build targets recorded from builder calls.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::util::fs::{posix_join, posix_split};

/// Identity of a target, stable across renames and moves between modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u32);

impl TargetId {
    pub fn new(raw: u32) -> Self {
        TargetId(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// What kind of output a target produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Program,
    Shared,
    Static,
    /// A python extension module
    Module,
    CudaLib,
    /// An object compiled once and linked into other targets
    Object,
}

impl TargetKind {
    /// Lowercase name used in exported summaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Program => "program",
            TargetKind::Shared => "shared",
            TargetKind::Static => "static",
            TargetKind::Module => "module",
            TargetKind::CudaLib => "cudalib",
            TargetKind::Object => "object",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetKind::Program => "Program",
            TargetKind::Shared => "Shared",
            TargetKind::Static => "Static",
            TargetKind::Module => "Module",
            TargetKind::CudaLib => "CUDALib",
            TargetKind::Object => "Object",
        };
        f.write_str(name)
    }
}

/// A reusable compiled object, referenced as a source by other targets.
///
/// This is a back-reference: the OBJECT target that builds it is owned by
/// the module that declared it, not by the targets that link it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedSource {
    /// Lookup name, `#<dir>/<prefix>` or the explicit object target name
    pub name: String,
    /// Common stem of the sources
    pub prefix: String,
    pub sources: Vec<String>,
    /// Directory of the declaring script, relative to the distribution root
    pub origin_path: String,
    /// The OBJECT target compiling these sources
    pub target: TargetId,
}

/// One build output.
#[derive(Debug, Clone)]
pub struct Target {
    pub id: TargetId,
    pub kind: TargetKind,
    pub name: String,
    /// Output file name without prefix; diverges from `name` after renames
    pub filename: String,
    pub output_path: String,
    pub sources: Vec<String>,
    pub shared_sources: Vec<SharedSource>,
    /// Sources that only exist after a generation step
    pub generated_sources: BTreeSet<String>,
    pub extra_libs: BTreeSet<String>,
    pub optional_extra_libs: BTreeSet<String>,
    /// Libraries optional elsewhere but mandatory for this target
    pub required_optional: BTreeSet<String>,
    pub prefix: String,
    /// Directory of the declaring script, relative to the distribution root
    pub origin_path: String,
    /// Name of the owning module
    pub module: String,
    pub include_paths: BTreeSet<String>,
    pub definitions: BTreeSet<String>,
}

impl Target {
    /// A fresh target for the output path `output_name`.
    pub fn new(
        id: TargetId,
        kind: TargetKind,
        output_name: &str,
        sources: Vec<String>,
        shared_sources: Vec<SharedSource>,
    ) -> Self {
        let (output_path, name) = posix_split(output_name);
        Target {
            id,
            kind,
            name: name.to_string(),
            filename: name.to_string(),
            output_path: output_path.to_string(),
            sources,
            shared_sources,
            generated_sources: BTreeSet::new(),
            extra_libs: BTreeSet::new(),
            optional_extra_libs: BTreeSet::new(),
            required_optional: BTreeSet::new(),
            prefix: String::new(),
            origin_path: String::new(),
            module: String::new(),
            include_paths: BTreeSet::new(),
            definitions: BTreeSet::new(),
        }
    }

    /// File name including the platform prefix.
    pub fn output_filename(&self) -> String {
        format!("{}{}", self.prefix, self.filename)
    }

    /// Name other targets use to link against this one.
    pub fn link_name(&self) -> String {
        let filename = self.output_filename();
        match filename.strip_prefix("lib") {
            Some(stripped) => stripped.to_string(),
            None => filename,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} Target {}:", self.kind, self.name)?;
        writeln!(
            f,
            "   Output:  {}",
            posix_join(&self.output_path, &self.output_filename())
        )?;
        write!(f, "   Sources: {}", self.sources.join(", "))?;
        if !self.shared_sources.is_empty() {
            let names: Vec<&str> = self.shared_sources.iter().map(|s| s.name.as_str()).collect();
            write!(f, "\n   SharedObjects: {}", names.join(", "))?;
        }
        if !self.extra_libs.is_empty() {
            let libs: Vec<&str> = self.extra_libs.iter().map(String::as_str).collect();
            write!(f, "\n   Libs: {}", libs.join(", "))?;
        }
        write!(f, "\n   Origin: {}", self.origin_path)?;
        if !self.module.is_empty() {
            write!(f, "\n   Module: {}", self.module)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_name_is_split() {
        let target = Target::new(
            TargetId::new(1),
            TargetKind::Shared,
            "#/lib/scitbx_boost_python",
            vec!["a.cpp".into()],
            Vec::new(),
        );
        assert_eq!(target.name, "scitbx_boost_python");
        assert_eq!(target.filename, "scitbx_boost_python");
        assert_eq!(target.output_path, "#/lib");
    }

    #[test]
    fn test_link_name_strips_lib_prefix() {
        let mut target = Target::new(TargetId::new(2), TargetKind::CudaLib, "cuda_ext", Vec::new(), Vec::new());
        target.prefix = "lib".into();
        assert_eq!(target.output_filename(), "libcuda_ext");
        assert_eq!(target.link_name(), "cuda_ext");
    }

    #[test]
    fn test_display_summary() {
        let mut target = Target::new(TargetId::new(3), TargetKind::Program, "bin/tool", vec!["main.c".into()], Vec::new());
        target.origin_path = "mod".into();
        target.module = "mod".into();
        let text = target.to_string();
        assert!(text.starts_with("Program Target tool:"));
        assert!(text.contains("Output:  bin/tool"));
        assert!(text.ends_with("Module: mod"));
    }
}
