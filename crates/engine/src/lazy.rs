//! Deferred references to another node's input or output field.
//!
//! A [`LazyField`] is created when a dependency edge is drawn between two nodes. It names
//! the upstream node, whether it reads that node's inputs or outputs, and the set of field
//! names that side declares. The set is captured once at construction so selecting a field
//! is a plain membership check.

use std::{collections::BTreeSet, fmt, sync::Arc};

use flowcache_types::SpecInfo;
use serde::{Deserialize, Serialize};

use crate::error::ContractViolation;

/// Which side of the upstream node a lazy reference reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LazyMode {
    Input,
    Output,
}

impl fmt::Display for LazyMode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LazyMode::Input => formatter.write_str("input"),
            LazyMode::Output => formatter.write_str("output"),
        }
    }
}

/// Node name, allowed field names, and the selected field of a lazy reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LazyRef {
    node: String,
    allowed: Arc<BTreeSet<String>>,
    field: Option<String>,
}

/// A placeholder for a value produced by (or fed into) another node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LazyField {
    /// Reads a field from the upstream node's inputs; never waits.
    Input(LazyRef),
    /// Reads a field from the upstream node's result; waits until the result is ready.
    Output(LazyRef),
}

impl LazyField {
    /// Reference to the inputs of `node`, which declares `fields`.
    pub fn input<I, S>(node: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        LazyField::Input(LazyRef::new(node, fields))
    }

    /// Reference to the outputs of `node`, which declares `fields`.
    pub fn output<I, S>(node: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        LazyField::Output(LazyRef::new(node, fields))
    }

    /// Reference whose allowed fields are the ones declared by `spec`.
    pub fn from_spec(node: impl Into<String>, mode: LazyMode, spec: &SpecInfo) -> Self {
        match mode {
            LazyMode::Input => LazyField::input(node, spec.names()),
            LazyMode::Output => LazyField::output(node, spec.names()),
        }
    }

    /// Select the field this reference stands for.
    ///
    /// Fails immediately when `name` is not declared on the referenced side of the node.
    pub fn field(self, name: &str) -> Result<Self, ContractViolation> {
        let mode = self.mode();
        let mut reference = match self {
            LazyField::Input(reference) | LazyField::Output(reference) => reference,
        };
        if !reference.allowed.contains(name) {
            return Err(ContractViolation::UnknownField {
                node: reference.node,
                mode,
                field: name.to_string(),
            });
        }
        reference.field = Some(name.to_string());
        Ok(match mode {
            LazyMode::Input => LazyField::Input(reference),
            LazyMode::Output => LazyField::Output(reference),
        })
    }

    pub fn mode(&self) -> LazyMode {
        match self {
            LazyField::Input(_) => LazyMode::Input,
            LazyField::Output(_) => LazyMode::Output,
        }
    }

    /// Name of the upstream node.
    pub fn node(&self) -> &str {
        &self.reference().node
    }

    /// Field names this reference may select, in sorted order.
    pub fn allowed_fields(&self) -> impl Iterator<Item = &str> {
        self.reference().allowed.iter().map(String::as_str)
    }

    /// The selected field, if any.
    pub fn selected(&self) -> Option<&str> {
        self.reference().field.as_deref()
    }

    /// The selected field, or a contract violation when none was selected.
    pub fn bound_field(&self) -> Result<&str, ContractViolation> {
        self.selected().ok_or_else(|| ContractViolation::UnboundField {
            node: self.node().to_string(),
        })
    }

    fn reference(&self) -> &LazyRef {
        match self {
            LazyField::Input(reference) | LazyField::Output(reference) => reference,
        }
    }
}

impl LazyRef {
    fn new<I, S>(node: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            node: node.into(),
            allowed: Arc::new(fields.into_iter().map(Into::into).collect()),
            field: None,
        }
    }
}

impl fmt::Display for LazyField {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.selected() {
            Some(field) => write!(formatter, "LF('{}', '{}')", self.node(), field),
            None => write!(formatter, "LF('{}', None)", self.node()),
        }
    }
}
