//! Error types shared across the engine.

use flowcache_types::SpecError;
use thiserror::Error;

use crate::{lazy::LazyMode, record::RecordError, store::StoreError};

/// Misuse of the engine's API. Raised synchronously at the point of misuse and never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContractViolation {
    #[error("task '{node}' has no {mode} attribute '{field}'")]
    UnknownField { node: String, mode: LazyMode, field: String },

    #[error("lazy reference to '{node}' has no field selected")]
    UnboundField { node: String },

    #[error("spec '{spec}' has no field '{field}'")]
    UndeclaredField { spec: String, field: String },

    #[error("field '{field}' of spec '{spec}' is still a lazy reference; resolve it before computing a checksum")]
    UnresolvedField { spec: String, field: String },

    #[error("workflow '{workflow}' has no node '{node}'")]
    UnknownNode { workflow: String, node: String },

    #[error("workflow '{workflow}' already contains a node named '{node}'")]
    DuplicateNode { workflow: String, node: String },

    #[error("node '{node}' has not published a checksum")]
    MissingNodeChecksum { node: String },

    #[error("task '{task}' requires a value for input '{field}'")]
    MissingMandatory { task: String, field: String },

    #[error("task '{task}' expected {expected} elements in its output, got {got}")]
    OutputCount { task: String, expected: usize, got: usize },

    #[error("task '{task}' produced undeclared output '{field}'")]
    UndeclaredOutput { task: String, field: String },

    #[error("task '{task}' output '{field}' must be {expected}, got {got}")]
    OutputType {
        task: String,
        field: String,
        expected: String,
        got: String,
    },

    #[error("index {index} does not address a result slot of node '{node}'")]
    InvalidIndex { node: String, index: String },

    #[error(transparent)]
    Spec(#[from] SpecError),
}

/// Failure to turn a lazy reference into a concrete value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The upstream node never became ready within the retry ceiling.
    #[error("cannot get results for '{node}.{field}': gave up after {attempts} attempts")]
    Unresolvable { node: String, field: String, attempts: u32 },

    /// The upstream node finished but its result is flagged as errored.
    #[error("upstream node '{node}' failed, so '{field}' has no value")]
    UpstreamFailed { node: String, field: String },

    #[error(transparent)]
    Contract(#[from] ContractViolation),
}

/// Top-level error surfaced by task execution.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("contract violation: {0}")]
    Contract(#[from] ContractViolation),

    #[error("dependency resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("result record error: {0}")]
    Record(#[from] RecordError),

    #[error("result store error: {0}")]
    Store(#[from] StoreError),

    #[error("task '{task}' failed: {reason}")]
    TaskFailed { task: String, reason: anyhow::Error },
}
