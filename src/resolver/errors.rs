//! Discovery and dependency graph errors.

use thiserror::Error;

use crate::core::DependencyError;
use crate::util::diagnostic::{suggestions, Diagnostic};

/// Error while discovering modules or ordering them.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Cannot decide between module candidates of {first} and {second}")]
    AmbiguousModule {
        name: String,
        first: String,
        second: String,
    },

    #[error("failed to scan distribution: {0:#}")]
    Scan(anyhow::Error),

    #[error(transparent)]
    Manifest(#[from] DependencyError),
}

impl GraphError {
    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            GraphError::AmbiguousModule {
                name,
                first,
                second,
            } => Diagnostic::error(format!("two directories could be module `{}`", name))
                .with_context(format!("candidate: {}", first))
                .with_context(format!("candidate: {}", second))
                .with_context("neither or both look like a module and contain python files")
                .with_suggestion(suggestions::VERBOSE),
            other => Diagnostic::error(other.to_string()),
        }
    }
}
