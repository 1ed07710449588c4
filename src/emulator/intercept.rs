//! Scoped replacement of filesystem and platform probes.
//!
//! Build scripts ask `os.path.isdir` and friends about paths that only
//! exist once a build has run. While a module is being parsed, the probe
//! functions of the emulated `os`, `os.path` and `sys` namespaces are
//! swapped for synthetic answers. Real checks go through a [`SystemProbe`].

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use thiserror::Error;

use crate::script::{Namespace, Value};
use crate::util::fs::{posix_join, posix_normpath};

/// The filesystem and platform queries scripts can make.
pub trait SystemProbe: std::fmt::Debug {
    fn is_dir(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;
    fn exists(&self, path: &Path) -> bool;
    fn list_dir(&self, path: &Path) -> std::io::Result<Vec<String>>;
    fn make_dir(&self, path: &Path) -> std::io::Result<()>;
    /// The `os.name` string
    fn os_name(&self) -> &str;
    /// The `sys.platform` string
    fn platform(&self) -> &str;
}

/// Probes answered by the real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealSystem;

impl SystemProbe for RealSystem {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn list_dir(&self, path: &Path) -> std::io::Result<Vec<String>> {
        let mut names = std::fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<std::io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    fn make_dir(&self, path: &Path) -> std::io::Result<()> {
        std::fs::create_dir(path)
    }

    fn os_name(&self) -> &str {
        if cfg!(windows) {
            "nt"
        } else {
            "posix"
        }
    }

    fn platform(&self) -> &str {
        std::env::consts::OS
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InterceptError {
    #[error("system call interception is already active")]
    AlreadyActive,
}

/// One `(namespace, attribute)` pair and the value that stands in for it.
#[derive(Debug)]
struct Patch {
    namespace: Rc<Namespace>,
    name: &'static str,
    replacement: Value,
    original: Option<Value>,
}

#[derive(Debug, Default)]
struct InterceptState {
    patches: Vec<Patch>,
    active: bool,
    suspended: bool,
}

impl InterceptState {
    fn apply(&mut self) {
        for patch in &mut self.patches {
            patch.original = patch.namespace.get(patch.name);
            patch.namespace.set(patch.name, patch.replacement.clone());
        }
    }

    /// Put every original back, last replaced first.
    fn restore(&mut self) {
        for patch in self.patches.iter_mut().rev() {
            match patch.original.take() {
                Some(original) => patch.namespace.set(patch.name, original),
                None => {
                    patch.namespace.attrs.borrow_mut().shift_remove(patch.name);
                }
            }
        }
    }
}

/// Swaps a declared set of namespace attributes for synthetic ones.
///
/// At most one scope may be active at a time. Cloning shares the state.
#[derive(Debug, Clone, Default)]
pub struct Interceptor {
    state: Rc<RefCell<InterceptState>>,
}

impl Interceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that `namespace.name` is replaced by `replacement` while active.
    pub fn replace(&self, namespace: &Rc<Namespace>, name: &'static str, replacement: Value) {
        self.state.borrow_mut().patches.push(Patch {
            namespace: Rc::clone(namespace),
            name,
            replacement,
            original: None,
        });
    }

    /// The declared `(namespace, attribute)` pairs, in replacement order.
    pub fn pairs(&self) -> Vec<(String, &'static str)> {
        self.state
            .borrow()
            .patches
            .iter()
            .map(|p| (p.namespace.name.clone(), p.name))
            .collect()
    }

    pub fn is_active(&self) -> bool {
        let state = self.state.borrow();
        state.active && !state.suspended
    }

    /// Install the replacements until the returned guard is dropped.
    pub fn enter(&self) -> Result<InterceptGuard, InterceptError> {
        let mut state = self.state.borrow_mut();
        if state.active {
            return Err(InterceptError::AlreadyActive);
        }
        state.active = true;
        state.apply();
        Ok(InterceptGuard {
            state: Rc::clone(&self.state),
        })
    }

    /// Temporarily restore the real attributes until the returned guard
    /// is dropped. Does nothing when no scope is active.
    pub fn suspend(&self) -> SuspendGuard {
        let mut state = self.state.borrow_mut();
        let engaged = state.active && !state.suspended;
        if engaged {
            state.restore();
            state.suspended = true;
        }
        SuspendGuard {
            state: Rc::clone(&self.state),
            engaged,
        }
    }
}

/// An active interception scope.
#[must_use = "interception ends when the guard is dropped"]
#[derive(Debug)]
pub struct InterceptGuard {
    state: Rc<RefCell<InterceptState>>,
}

impl Drop for InterceptGuard {
    fn drop(&mut self) {
        let mut state = self.state.borrow_mut();
        if !state.suspended {
            state.restore();
        }
        state.suspended = false;
        state.active = false;
    }
}

/// A suspension of an active interception scope.
#[must_use = "interception resumes when the guard is dropped"]
#[derive(Debug)]
pub struct SuspendGuard {
    state: Rc<RefCell<InterceptState>>,
    engaged: bool,
}

impl Drop for SuspendGuard {
    fn drop(&mut self) {
        if !self.engaged {
            return;
        }
        let mut state = self.state.borrow_mut();
        if state.active && state.suspended {
            state.apply();
        }
        state.suspended = false;
    }
}

/// Synthetic answer for `os.path.isdir`.
pub fn fake_isdir(path: &str) -> bool {
    if path.starts_with("UNDERBUILD") || path.ends_with("eigen") {
        return true;
    }
    if path == "DISTPATH/boost/boost/system" {
        return true;
    }
    if path.ends_with("ncdist") {
        tracing::warn!("Looking for package ncdist via filesystem lookup; ignoring");
        return false;
    }
    tracing::debug!("IS DIR: {}", path);
    true
}

/// Map a `DISTPATH[module]/...` or `DISTPATH/...` token back to a real
/// location under `dist`. Other paths are returned unchanged.
pub fn resolve_dist_token(
    path: &str,
    dist: &Path,
    roots: &[String],
    probe: &dyn SystemProbe,
) -> String {
    let dist_str = dist.to_string_lossy();
    if let Some(rest) = path.strip_prefix("DISTPATH[") {
        let Some((module, tail)) = rest.split_once(']') else {
            return path.to_string();
        };
        let mut resolved = path.to_string();
        for repo in roots {
            let candidate = posix_normpath(&posix_join(&posix_join(&dist_str, repo), module));
            if probe.is_dir(Path::new(&candidate)) {
                resolved = format!("{}{}", candidate, tail);
            }
        }
        resolved
    } else if let Some(rest) = path.strip_prefix("DISTPATH") {
        posix_join(&dist_str, rest.trim_start_matches('/'))
    } else {
        path.to_string()
    }
}

/// Synthetic answer for `os.path.isfile`: symbolic paths are resolved and
/// checked for real.
pub fn fake_isfile(path: &str, dist: &Path, roots: &[String], probe: &dyn SystemProbe) -> bool {
    if path.starts_with("DISTPATH/ccp4io/libccp4/ccp4") {
        return false;
    }
    tracing::debug!("IS FILE: {}", path);
    let resolved = resolve_dist_token(path, dist, roots, probe);
    let found = probe.is_file(Path::new(&resolved));
    tracing::debug!("Out: {} {}", resolved, if found { "YES" } else { "NO" });
    found
}

/// Scripts may only create directories inside the build tree.
pub fn fake_mkdir_allowed(path: &str) -> bool {
    path.starts_with("UNDERBUILD")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::NamespaceKind;
    use crate::test_support::MockSystem;

    fn patched() -> (Interceptor, Rc<Namespace>) {
        let sys = Namespace::new("sys", NamespaceKind::Module);
        sys.set("platform", Value::str("darwin"));
        let interceptor = Interceptor::new();
        interceptor.replace(&sys, "platform", Value::str("linux2"));
        interceptor.replace(&sys, "maxsize", Value::Int(1));
        (interceptor, sys)
    }

    #[test]
    fn test_enter_and_restore() {
        let (interceptor, sys) = patched();
        {
            let _guard = interceptor.enter().unwrap();
            assert!(interceptor.is_active());
            assert_eq!(sys.get("platform").unwrap().display(), "linux2");
            assert!(sys.get("maxsize").is_some());
        }
        assert!(!interceptor.is_active());
        assert_eq!(sys.get("platform").unwrap().display(), "darwin");
        assert!(sys.get("maxsize").is_none());
    }

    #[test]
    fn test_second_scope_is_refused() {
        let (interceptor, _) = patched();
        let _guard = interceptor.enter().unwrap();
        assert_eq!(interceptor.enter().unwrap_err(), InterceptError::AlreadyActive);
        assert_eq!(interceptor.clone().enter().unwrap_err(), InterceptError::AlreadyActive);
    }

    #[test]
    fn test_suspend_restores_then_reapplies() {
        let (interceptor, sys) = patched();
        let _guard = interceptor.enter().unwrap();
        {
            let _suspended = interceptor.suspend();
            assert!(!interceptor.is_active());
            assert_eq!(sys.get("platform").unwrap().display(), "darwin");
            // Nested suspension is a no-op
            drop(interceptor.suspend());
            assert_eq!(sys.get("platform").unwrap().display(), "darwin");
        }
        assert!(interceptor.is_active());
        assert_eq!(sys.get("platform").unwrap().display(), "linux2");
    }

    #[test]
    fn test_suspend_without_scope_is_noop() {
        let (interceptor, sys) = patched();
        drop(interceptor.suspend());
        assert_eq!(sys.get("platform").unwrap().display(), "darwin");
        assert!(interceptor.enter().is_ok());
    }

    #[test]
    fn test_scope_can_be_reentered_after_exit() {
        let (interceptor, _) = patched();
        drop(interceptor.enter().unwrap());
        assert!(interceptor.enter().is_ok());
        assert_eq!(interceptor.pairs(), vec![("sys".to_string(), "platform"), ("sys".to_string(), "maxsize")]);
    }

    #[test]
    fn test_fake_isdir_answers() {
        assert!(fake_isdir("UNDERBUILD/include"));
        assert!(fake_isdir("/opt/eigen"));
        assert!(fake_isdir("DISTPATH/boost/boost/system"));
        assert!(!fake_isdir("DISTPATH/ncdist"));
        assert!(fake_isdir("/does/not/exist"));
        assert!(fake_mkdir_allowed("UNDERBUILD/x"));
        assert!(!fake_mkdir_allowed("/tmp/x"));
    }

    #[test]
    fn test_fake_isfile_resolves_tokens() {
        let probe = MockSystem::new()
            .with_dir("/dist/cctbx_project/scitbx")
            .with_file("/dist/cctbx_project/scitbx/array.h")
            .with_file("/dist/top.h");
        let dist = Path::new("/dist");
        let roots = vec![".".to_string(), "cctbx_project".to_string()];

        assert!(fake_isfile("DISTPATH[scitbx]/array.h", dist, &roots, &probe));
        assert!(!fake_isfile("DISTPATH[scitbx]/missing.h", dist, &roots, &probe));
        assert!(fake_isfile("DISTPATH/top.h", dist, &roots, &probe));
        assert!(!fake_isfile("DISTPATH/ccp4io/libccp4/ccp4_array.h", dist, &roots, &probe));
    }
}
