//! Filesystem and path utilities.
//!
//! Paths inside a distribution (module paths, target origins, sources) are
//! kept as `/`-separated strings, matching what build scripts write. The
//! `posix_*` helpers operate on those strings without touching the disk.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::glob;
use walkdir::WalkDir;

/// Read a file to string, with nice error messages.
pub fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read file: {}", path.display()))
}

/// Write a string to a file, creating parent directories if needed.
pub fn write_string(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory: {}", parent.display()))?;
        }
    }
    fs::write(path, contents).with_context(|| format!("failed to write file: {}", path.display()))
}

/// Names of the non-hidden direct subdirectories of `dir`, sorted.
pub fn subdirectories(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("failed to read directory: {}", dir.display()))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Whether `dir` directly contains a file with the given extension.
pub fn has_file_with_extension(dir: &Path, extension: &str) -> bool {
    let pattern = dir.join(format!("*.{}", extension));
    match glob(&pattern.to_string_lossy()) {
        Ok(mut paths) => paths.any(|p| p.is_ok_and(|p| p.is_file())),
        Err(_) => false,
    }
}

/// Expand a glob pattern relative to `base`, returning matches relative to
/// `base` as `/`-separated strings.
pub fn glob_relative(base: &Path, pattern: &str) -> Result<Vec<String>> {
    let full_pattern = base.join(pattern);
    let mut results = Vec::new();
    for entry in glob(&full_pattern.to_string_lossy())
        .with_context(|| format!("invalid glob pattern: {}", pattern))?
    {
        match entry {
            Ok(path) => {
                let relative = path.strip_prefix(base).unwrap_or(&path);
                results.push(to_posix(relative));
            }
            Err(e) => {
                tracing::warn!("glob error: {}", e);
            }
        }
    }
    results.sort();
    Ok(results)
}

/// Render a path with `/` separators.
pub fn to_posix(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
        .replacen("//", "/", 1)
}

/// Lexically normalize a `/`-separated path: collapse `.`, `..` and
/// repeated separators. An empty result becomes `.`.
pub fn posix_normpath(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Join two `/`-separated paths. An absolute `tail` replaces `head`.
pub fn posix_join(head: &str, tail: &str) -> String {
    if tail.starts_with('/') || head.is_empty() {
        tail.to_string()
    } else if head.ends_with('/') {
        format!("{}{}", head, tail)
    } else {
        format!("{}/{}", head, tail)
    }
}

/// Split into `(dirname, basename)` at the last separator.
pub fn posix_split(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some(("", base)) => ("/", base),
        Some((dir, base)) => (dir, base),
        None => ("", path),
    }
}

/// File name without its final extension.
pub fn posix_stem(path: &str) -> &str {
    let (_, base) = posix_split(path);
    match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    }
}

/// Relative path from `start` to `path`; both are relative to the same root.
pub fn posix_relpath(path: &str, start: &str) -> String {
    let path = PathBuf::from(posix_normpath(path));
    let start = PathBuf::from(posix_normpath(start));
    let relative = pathdiff::diff_paths(&path, &start).unwrap_or(path);
    let rendered = to_posix(&relative);
    if rendered.is_empty() {
        ".".to_string()
    } else {
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_posix_normpath() {
        assert_eq!(posix_normpath("a/./b/../c"), "a/c");
        assert_eq!(posix_normpath("./cctbx_project/../x"), "x");
        assert_eq!(posix_normpath(""), ".");
        assert_eq!(posix_normpath("../a"), "../a");
        assert_eq!(posix_normpath("/a//b/"), "/a/b");
    }

    #[test]
    fn test_posix_split_and_stem() {
        assert_eq!(posix_split("#/lib/scitbx_boost_python"), ("#/lib", "scitbx_boost_python"));
        assert_eq!(posix_split("prog"), ("", "prog"));
        assert_eq!(posix_stem("dir/flex_ext.cpp"), "flex_ext");
        assert_eq!(posix_stem("Makefile"), "Makefile");
    }

    #[test]
    fn test_posix_relpath() {
        assert_eq!(posix_relpath("cctbx_project/mod/src/a.c", "cctbx_project/mod"), "src/a.c");
        assert_eq!(posix_relpath("other/a.c", "mod/sub"), "../../other/a.c");
        assert_eq!(posix_relpath("mod", "mod"), ".");
    }

    #[test]
    fn test_glob_relative() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::write(tmp.path().join("src/b.cpp"), "").unwrap();
        fs::write(tmp.path().join("src/a.cpp"), "").unwrap();
        fs::write(tmp.path().join("src/readme.txt"), "").unwrap();

        let found = glob_relative(tmp.path(), "src/*.cpp").unwrap();
        assert_eq!(found, vec!["src/a.cpp", "src/b.cpp"]);
    }

    #[test]
    fn test_subdirectories_skip_hidden() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("b")).unwrap();
        fs::create_dir_all(tmp.path().join("a")).unwrap();
        fs::create_dir_all(tmp.path().join(".git")).unwrap();
        fs::write(tmp.path().join("file"), "").unwrap();

        assert_eq!(subdirectories(tmp.path()).unwrap(), vec!["a", "b"]);
        assert!(!has_file_with_extension(tmp.path(), "py"));
    }
}
