//! Test utilities and mocks for tbxtools unit tests.
//!
//! [`MockSystem`] answers filesystem probes from an in-memory tree, for
//! code that only sees the world through a [`SystemProbe`]. Code that
//! walks the real filesystem uses a [`DistFixture`] instead.
//!
//! # Example
//!
//! ```rust,ignore
//! let probe = MockSystem::new().with_file("/dist/cctbx_project/scitbx/array.h");
//! assert!(probe.is_dir(Path::new("/dist/cctbx_project")));
//! ```

pub mod fixtures;

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::path::Path;

use crate::emulator::intercept::SystemProbe;
use crate::util::fs::{posix_normpath, posix_split, to_posix};

pub use fixtures::*;

/// In-memory filesystem behind the [`SystemProbe`] interface.
///
/// Paths are compared after lexical normalization. Adding a file or
/// directory adds all of its parents.
#[derive(Debug, Default)]
pub struct MockSystem {
    files: RefCell<BTreeSet<String>>,
    dirs: RefCell<BTreeSet<String>>,
}

fn normalize(path: &Path) -> String {
    posix_normpath(&to_posix(path))
}

impl MockSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(self, path: &str) -> Self {
        self.add_dir(&posix_normpath(path));
        self
    }

    pub fn with_file(self, path: &str) -> Self {
        let path = posix_normpath(path);
        let (parent, _) = posix_split(&path);
        if !parent.is_empty() {
            self.add_dir(parent);
        }
        self.files.borrow_mut().insert(path);
        self
    }

    fn add_dir(&self, path: &str) {
        let mut current = path.to_string();
        loop {
            if !self.dirs.borrow_mut().insert(current.clone()) {
                break;
            }
            let (parent, _) = posix_split(&current);
            if parent.is_empty() || parent == current {
                break;
            }
            current = parent.to_string();
        }
    }

    /// Every directory, including those created through `make_dir`.
    pub fn dirs(&self) -> Vec<String> {
        self.dirs.borrow().iter().cloned().collect()
    }
}

impl SystemProbe for MockSystem {
    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.borrow().contains(&normalize(path))
    }

    fn is_file(&self, path: &Path) -> bool {
        self.files.borrow().contains(&normalize(path))
    }

    fn exists(&self, path: &Path) -> bool {
        self.is_file(path) || self.is_dir(path)
    }

    fn list_dir(&self, path: &Path) -> std::io::Result<Vec<String>> {
        let dir = normalize(path);
        if !self.dirs.borrow().contains(&dir) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such directory: {}", dir),
            ));
        }
        let files = self.files.borrow();
        let dirs = self.dirs.borrow();
        let mut names: Vec<String> = files
            .iter()
            .chain(dirs.iter())
            .filter_map(|entry| {
                let (parent, name) = posix_split(entry);
                (parent == dir && !name.is_empty()).then(|| name.to_string())
            })
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn make_dir(&self, path: &Path) -> std::io::Result<()> {
        let dir = normalize(path);
        if self.exists(path) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("already exists: {}", dir),
            ));
        }
        self.add_dir(&dir);
        Ok(())
    }

    fn os_name(&self) -> &str {
        "posix"
    }

    fn platform(&self) -> &str {
        "linux"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_system_parents_and_listing() {
        let probe = MockSystem::new()
            .with_file("/dist/cctbx_project/scitbx/array.h")
            .with_dir("/dist/libtbx");

        assert!(probe.is_dir(Path::new("/dist/cctbx_project")));
        assert!(probe.is_dir(Path::new("/dist/./cctbx_project/scitbx")));
        assert!(probe.is_file(Path::new("/dist/cctbx_project/scitbx/array.h")));
        assert!(!probe.is_file(Path::new("/dist/cctbx_project/scitbx")));
        assert!(probe.exists(Path::new("/dist/libtbx")));
        assert_eq!(
            probe.list_dir(Path::new("/dist")).unwrap(),
            vec!["cctbx_project", "libtbx"]
        );
        assert!(probe.list_dir(Path::new("/nowhere")).is_err());
    }

    #[test]
    fn test_mock_system_make_dir() {
        let probe = MockSystem::new().with_dir("/build");
        probe.make_dir(Path::new("/build/include")).unwrap();
        assert!(probe.is_dir(Path::new("/build/include")));
        assert!(probe.make_dir(Path::new("/build/include")).is_err());
    }
}
