//! Throwaway distributions on disk.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use crate::core::MANIFEST_NAME;

/// A distribution tree in a temporary directory, deleted on drop.
///
/// ```rust,ignore
/// let fixture = DistFixture::new()
///     .module("libtbx", Some("{}"))
///     .file("cctbx_project/scitbx/SConscript", "Import('env_base')\n");
/// ```
#[derive(Debug)]
pub struct DistFixture {
    dir: TempDir,
}

impl DistFixture {
    pub fn new() -> Self {
        DistFixture {
            dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    /// Root of the distribution.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create a module directory, with a `libtbx_config` if `manifest` is
    /// given.
    pub fn module(self, path: &str, manifest: Option<&str>) -> Self {
        let dir = self.dir.path().join(path);
        fs::create_dir_all(&dir).expect("failed to create module dir");
        match manifest {
            Some(text) => self.file(&format!("{}/{}", path, MANIFEST_NAME), text),
            None => self,
        }
    }

    /// Write a file, creating parent directories.
    pub fn file(self, path: &str, content: &str) -> Self {
        let full = self.dir.path().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).expect("failed to create parent dir");
        }
        fs::write(&full, content).expect("failed to write fixture file");
        self
    }
}

impl Default for DistFixture {
    fn default() -> Self {
        Self::new()
    }
}
