//! Unified error type for every failure mode of the compatibility matrix
//! builder.
//!
//! The taxonomy mirrors the blast radius of each failure:
//!
//! - [`CompatError::Provision`] — an engine runtime never became ready.
//!   Fatal: that engine cannot produce any artifact, so the whole run
//!   aborts.
//! - [`CompatError::Transport`] — a single compile request failed
//!   mid-flight. Scoped: only the one (test, engine, version) artifact is
//!   affected; independent artifacts keep building and dependents are
//!   reported as unbuilt, never as non-matching.
//! - [`CompatError::MissingPrerequisite`] — the build graph consumed an
//!   artifact that was never produced. Fatal; indicates a dependency
//!   ordering bug.
//! - [`CompatError::Catalog`], [`CompatError::Config`],
//!   [`CompatError::Store`] — boundary failures (fixture tree, engine
//!   declaration file, artifact store). All fatal preconditions.
//!
//! Normalization is total and has no error variant.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompatError>;

#[derive(Debug, Error, Diagnostic)]
pub enum CompatError {
    #[error("engine runtime for {engine} {version} never became ready: {reason}")]
    #[diagnostic(
        code(compat::runtime::provision),
        help("check the launch command in engines.yml and that the configured endpoint is free")
    )]
    Provision {
        engine: String,
        version: String,
        reason: String,
    },

    #[error("compile request failed for {context}: {reason}")]
    #[diagnostic(code(compat::runtime::transport))]
    Transport { context: String, reason: String },

    #[error("artifact '{dependent}' requires '{missing}', which was never built")]
    #[diagnostic(code(compat::graph::missing_prerequisite))]
    MissingPrerequisite { dependent: String, missing: String },

    #[error("test catalog unavailable at {}: {reason}", path.display())]
    #[diagnostic(
        code(compat::catalog::unavailable),
        help("fetch or link the test fixture repository before building")
    )]
    Catalog { path: PathBuf, reason: String },

    #[error("invalid engine declaration {}", path.display())]
    #[diagnostic(code(compat::config::invalid))]
    Config {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("artifact store failure at {}", path.display())]
    #[diagnostic(code(compat::store::io))]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CompatError {
    /// Whether this error aborts the whole run. Transport failures are the
    /// only scoped variant: they mark one artifact as failed and let the
    /// rest of the build proceed.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CompatError::Transport { .. })
    }

    pub fn transport(context: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        CompatError::Transport {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    pub fn provision(
        engine: impl Into<String>,
        version: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        CompatError::Provision {
            engine: engine.into(),
            version: version.into(),
            reason: reason.to_string(),
        }
    }

    pub fn store(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CompatError::Store {
            path: path.into(),
            source,
        }
    }
}

/// Prints a [`CompatError`] with full miette diagnostics.
///
/// Use this for user-facing error display in the CLI; library code
/// propagates errors with `?` instead.
pub fn print_error(error: CompatError) {
    let report = miette::Report::new(error);
    eprintln!("{report:?}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_is_scoped_everything_else_is_fatal() {
        assert!(!CompatError::transport("a/b", "connection reset").is_fatal());
        assert!(CompatError::provision("libsass", "3.2", "timed out").is_fatal());
        assert!(CompatError::MissingPrerequisite {
            dependent: "stats".into(),
            missing: "tests/a/support.yml".into(),
        }
        .is_fatal());
    }

    #[test]
    fn display_names_the_failing_unit() {
        let err = CompatError::transport("selectors/attr for libsass 3.2", "timed out");
        let text = err.to_string();
        assert!(text.contains("selectors/attr"));
        assert!(text.contains("timed out"));
    }
}
