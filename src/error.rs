//! Typed failures surfaced by the core.
//!
//! Validation failures always carry the full list of violations so a caller
//! sees every defect in one pass.

use std::fmt;

/// Aggregate failure of the semantic descriptor checks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("descriptor is invalid:\n{}", Violations(.errors))]
pub struct DescriptorValidationError {
    pub errors: Vec<String>,
}

/// Aggregate failure of an invocation against its compiled schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invocation is invalid:\n{}", Violations(.errors))]
pub struct InvocationValidationError {
    pub errors: Vec<String>,
}

/// Input could not be resolved to a JSON document.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot parse input {input}: file not found or invalid JSON object")]
    Unparseable { input: String },

    #[error("read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{what} does not match the expected shape: {source}")]
    Shape {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures of the random invocation generator.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("no member of one-is-required group \"{group}\" could be filled after {attempts} attempts")]
    UnsatisfiableGroup { group: String, attempts: usize },

    #[error("generated invocation failed validation: {0}")]
    Invalid(#[from] InvocationValidationError),
}

/// A malformed `evaluate` query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid query ({query}): {reason}")]
pub struct QueryError {
    pub query: String,
    pub reason: String,
}

/// Failures that abort an execution (as opposed to a failing tool, which is
/// reported in the result).
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("could not find any container engine; make sure that Docker or Singularity is installed")]
    NoContainerEngine,

    #[error("could not pull Singularity image:\n * Pull command: {command}\n * Error: {stderr}")]
    PullFailed { command: String, stderr: String },

    #[error("unable to retrieve Singularity image {image}")]
    ImageUnavailable { image: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExecutorError {
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| ExecutorError::Io { context, source }
    }
}

struct Violations<'a>(&'a [String]);

impl fmt::Display for Violations<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, error) in self.0.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "  {error}")?;
        }
        Ok(())
    }
}
