//! The view of a workflow that lazy resolution reads from.

use std::sync::Arc;

use flowcache_types::Value;

use crate::{error::ContractViolation, record::ResultRecord};

/// Position of a node within a split fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateIndex(pub usize);

/// Result state of a node as seen by a downstream reader.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeResult {
    /// The node has not published anything yet.
    Pending,
    /// One record for an unsplit node, or the element selected by a state index.
    Single(Arc<ResultRecord>),
    /// One slot per split element; `None` marks an element still running.
    Split(Vec<Option<Arc<ResultRecord>>>),
    /// Split nested inside another split: one row per outer element.
    NestedSplit(Vec<Vec<Option<Arc<ResultRecord>>>>),
}

/// Read access to node inputs and results.
///
/// Implementations must be safe to query from several threads while nodes are still
/// publishing results.
pub trait WorkflowGraph: Send + Sync {
    /// Current value of an input field of `node`. The workflow's own name addresses its
    /// own inputs.
    fn input_value(&self, node: &str, field: &str) -> Result<Value, ContractViolation>;

    /// Published results of `node`, narrowed to one split element or row when
    /// `state_index` is given.
    fn result(&self, node: &str, state_index: Option<StateIndex>) -> Result<NodeResult, ContractViolation>;
}
