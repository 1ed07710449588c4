//! User-facing diagnostic messages.
//!
//! Fatal consistency errors after a distribution read name the targets and
//! modules that caused them, so the offending build script can be found.

use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

/// Context lines listed before the rest is summarized.
const MAX_ITEMS: usize = 12;

/// Common suggestion messages.
pub mod suggestions {
    pub const VERBOSE: &str = "help: Run with `--verbose` to see every builder call";

    pub const EXPECTED_LIBRARIES: &str =
        "help: Add the library to `filters.expected_external_libraries` in tbxtools.toml";

    pub const BUILD_INFO: &str = "help: Describe the generated file in the build info overrides";
}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    fn label(self, color: bool) -> &'static str {
        match (self, color) {
            (Severity::Error, false) => "error",
            (Severity::Warning, false) => "warning",
            (Severity::Error, true) => "\x1b[1;31merror\x1b[0m",
            (Severity::Warning, true) => "\x1b[1;33mwarning\x1b[0m",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label(false))
    }
}

/// A diagnostic message with optional suggestions.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
    pub severity: Severity,
    /// Additional context lines
    pub context: Vec<String>,
    pub suggestions: Vec<String>,
    /// Related file, usually a build script
    pub location: Option<PathBuf>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            message: message.into(),
            severity: Severity::Error,
            context: Vec::new(),
            suggestions: Vec::new(),
            location: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            ..Diagnostic::error(message)
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.location = Some(path.into());
        self
    }

    /// One context line per item, as `<label> <item>`. Long lists are
    /// cut short; the full list is in the log.
    pub fn with_items<I, S>(mut self, label: &str, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: fmt::Display,
    {
        let mut items = items.into_iter();
        for item in items.by_ref().take(MAX_ITEMS) {
            self.context.push(format!("{} {}", label, item));
        }
        let rest = items.count();
        if rest > 0 {
            self.context.push(format!("... and {} more", rest));
        }
        self
    }

    /// Format the diagnostic for terminal output.
    pub fn format(&self, color: bool) -> String {
        let mut output = format!("{}: {}\n", self.severity.label(color), self.message);
        if let Some(path) = &self.location {
            output.push_str(&format!("  --> {}\n", path.display()));
        }
        for line in &self.context {
            output.push_str(&format!("  = {}\n", line));
        }
        if !self.suggestions.is_empty() {
            output.push('\n');
            for suggestion in &self.suggestions {
                output.push_str(suggestion);
                output.push('\n');
            }
        }
        output
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(false))
    }
}

/// Libraries linked by targets that are neither targets nor expected
/// external libraries.
#[derive(Debug, Error, MietteDiagnostic)]
#[error("Unexpected extra external libs: {}", .libraries.join(", "))]
#[diagnostic(
    code(tbxtools::read::unexpected_library),
    help("Add the libraries to `filters.expected_external_libraries` if they are genuine")
)]
pub struct UnexpectedLibraryError {
    pub libraries: Vec<String>,
    /// `(library, targets linking it)`
    pub sources: Vec<(String, Vec<String>)>,
}

/// Print a diagnostic to stderr.
pub fn emit(diagnostic: &Diagnostic, color: bool) {
    eprint!("{}", diagnostic.format(color));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_formatting() {
        let diag = Diagnostic::error("Module name not enough to disambiguate duplicate targets named utils")
            .with_context("declared by module dxtbx")
            .with_location("dxtbx/SConscript")
            .with_suggestion(suggestions::VERBOSE);

        let output = diag.format(false);
        assert!(output.starts_with("error: Module name not enough"));
        assert!(output.contains("  --> dxtbx/SConscript"));
        assert!(output.contains("  = declared by module dxtbx"));
        assert!(output.contains("--verbose"));
    }

    #[test]
    fn test_warning_severity() {
        let diag = Diagnostic::warning("target has no sources");
        assert_eq!(diag.severity, Severity::Warning);
        assert!(diag.to_string().starts_with("warning: "));
    }

    #[test]
    fn test_long_item_lists_are_cut_short() {
        let names: Vec<String> = (0..20).map(|i| format!("target_{:02}", i)).collect();
        let diag = Diagnostic::error("too many").with_items("linked by", &names);
        assert_eq!(diag.context.len(), MAX_ITEMS + 1);
        assert_eq!(diag.context[0], "linked by target_00");
        assert_eq!(diag.context[MAX_ITEMS], "... and 8 more");
    }

    #[test]
    fn test_unexpected_library_message() {
        let err = UnexpectedLibraryError {
            libraries: vec!["fftw3".into(), "z".into()],
            sources: Vec::new(),
        };
        assert_eq!(err.to_string(), "Unexpected extra external libs: fftw3, z");
    }
}
