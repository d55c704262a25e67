//! Descriptor-driven validation, command generation and container execution
//! for command-line tools.
//!
//! A descriptor declares a tool's inputs, outputs, groups and command-line
//! template. The core validates descriptors, compiles a JSON Schema for their
//! invocations, generates random valid invocations, renders commands and
//! output paths, and runs them on the host or in a container.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod evaluate;
pub mod exec;
pub mod expr;
pub mod generate;
pub mod invocation_schema;
pub mod logging;
pub mod render;
pub mod testing;
pub mod util;
pub mod validate;

pub use descriptor::{Descriptor, Invocation};
pub use error::{
    DescriptorValidationError, ExecutorError, GenerateError, InvocationValidationError, LoadError,
    QueryError,
};
pub use exec::{ExecOptions, Executor, ExecutorOutput};
