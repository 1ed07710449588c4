//! Errors raised while loading or running a build script.

use std::path::PathBuf;

use thiserror::Error;

/// A tokenizer or parser failure, before a path is attached.
#[derive(Debug, Clone, Error)]
#[error("line {line}: {message}")]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        SyntaxError {
            line,
            message: message.into(),
        }
    }
}

/// Error while loading or executing a build script.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The script text is outside the supported language subset.
    #[error("syntax error in {}: {source}", .path.display())]
    Syntax {
        path: PathBuf,
        #[source]
        source: SyntaxError,
    },

    /// A script-level exception. Only these can be caught by `try/except`.
    #[error("{kind}: {message}{}", location_suffix(.line, .script))]
    Raised {
        kind: String,
        message: String,
        line: Option<usize>,
        script: Option<PathBuf>,
    },

    /// The faked environment was asked for a module path that does not exist.
    #[error("missing distribution path: {0}")]
    MissingDist(String),

    /// The emulation has no answer for what the script asked for.
    #[error("unsupported build-script behaviour: {message}{}", location_suffix(.line, .script))]
    Unsupported {
        message: String,
        line: Option<usize>,
        script: Option<PathBuf>,
    },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn location_suffix(line: &Option<usize>, script: &Option<PathBuf>) -> String {
    match (line, script) {
        (Some(line), Some(script)) => format!(" ({}:{})", script.display(), line),
        (Some(line), None) => format!(" (line {})", line),
        (None, Some(script)) => format!(" ({})", script.display()),
        (None, None) => String::new(),
    }
}

impl ScriptError {
    /// A catchable script exception of the given kind.
    pub fn raised(kind: impl Into<String>, message: impl Into<String>) -> Self {
        ScriptError::Raised {
            kind: kind.into(),
            message: message.into(),
            line: None,
            script: None,
        }
    }

    /// A fatal "the emulation does not know how to answer this" error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        ScriptError::Unsupported {
            message: message.into(),
            line: None,
            script: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::raised("TypeError", message)
    }

    pub fn name_error(name: &str) -> Self {
        Self::raised("NameError", format!("name '{}' is not defined", name))
    }

    pub fn key_error(key: impl Into<String>) -> Self {
        Self::raised("KeyError", key)
    }

    /// Attach the line of the innermost statement, if not already known.
    pub fn at_line(mut self, at: usize) -> Self {
        match &mut self {
            ScriptError::Raised { line, .. } | ScriptError::Unsupported { line, .. } => {
                if line.is_none() {
                    *line = Some(at);
                }
            }
            _ => {}
        }
        self
    }

    /// Attach the script path, if not already known.
    pub fn in_script(mut self, path: &std::path::Path) -> Self {
        match &mut self {
            ScriptError::Raised { script, .. } | ScriptError::Unsupported { script, .. } => {
                if script.is_none() {
                    *script = Some(path.to_path_buf());
                }
            }
            _ => {}
        }
        self
    }

    /// The script the error happened in, when known.
    pub fn script(&self) -> Option<&std::path::Path> {
        match self {
            ScriptError::Syntax { path, .. } | ScriptError::Io { path, .. } => Some(path),
            ScriptError::Raised { script, .. } | ScriptError::Unsupported { script, .. } => {
                script.as_deref()
            }
            ScriptError::MissingDist(_) => None,
        }
    }

    /// The exception kind, for errors a script may catch.
    pub fn catchable_kind(&self) -> Option<&str> {
        match self {
            ScriptError::Raised { kind, .. } => Some(kind),
            _ => None,
        }
    }
}
