//! Instantiated specs: declared fields holding concrete values or lazy references.

use flowcache_types::{SpecInfo, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    checksum::{Checksum, compute_checksum},
    error::{ContractViolation, ResolveError},
    graph::{StateIndex, WorkflowGraph},
    lazy::LazyField,
    resolve::{RetryPolicy, resolve, resolve_async},
};

/// Current content of a spec field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Concrete(Value),
    Lazy(LazyField),
}

impl FieldValue {
    pub fn as_concrete(&self) -> Option<&Value> {
        match self {
            FieldValue::Concrete(value) => Some(value),
            FieldValue::Lazy(_) => None,
        }
    }

    pub fn as_lazy(&self) -> Option<&LazyField> {
        match self {
            FieldValue::Lazy(lazy) => Some(lazy),
            FieldValue::Concrete(_) => None,
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Concrete(value)
    }
}

impl From<LazyField> for FieldValue {
    fn from(lazy: LazyField) -> Self {
        FieldValue::Lazy(lazy)
    }
}

/// A record whose fields are the declared inputs of a task or workflow.
///
/// A `Composite` spec belongs to a workflow and also carries the ordered checksums of
/// its sub-nodes, which feed into its own checksum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Spec {
    Leaf {
        name: String,
        fields: IndexMap<String, FieldValue>,
    },
    Composite {
        name: String,
        fields: IndexMap<String, FieldValue>,
        sub_nodes: Vec<Checksum>,
    },
}

impl Spec {
    /// Instantiate `info` with each field set to its declared default, or `None`.
    pub fn from_info(info: &SpecInfo) -> Self {
        Spec::Leaf {
            name: info.name().to_string(),
            fields: initial_fields(info),
        }
    }

    /// Instantiate a workflow spec over the given sub-node checksums.
    pub fn composite(info: &SpecInfo, sub_nodes: Vec<Checksum>) -> Self {
        Spec::Composite {
            name: info.name().to_string(),
            fields: initial_fields(info),
            sub_nodes,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Spec::Leaf { name, .. } | Spec::Composite { name, .. } => name,
        }
    }

    pub fn fields(&self) -> &IndexMap<String, FieldValue> {
        match self {
            Spec::Leaf { fields, .. } | Spec::Composite { fields, .. } => fields,
        }
    }

    fn fields_mut(&mut self) -> &mut IndexMap<String, FieldValue> {
        match self {
            Spec::Leaf { fields, .. } | Spec::Composite { fields, .. } => fields,
        }
    }

    /// Sub-node checksums of a composite spec; `None` for leaf specs.
    pub fn sub_nodes(&self) -> Option<&[Checksum]> {
        match self {
            Spec::Leaf { .. } => None,
            Spec::Composite { sub_nodes, .. } => Some(sub_nodes),
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields().get(field)
    }

    /// Concrete value of `field`, if the field exists and is not lazy.
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.get(field).and_then(FieldValue::as_concrete)
    }

    /// Replace the content of a declared field.
    pub fn set(&mut self, field: &str, value: impl Into<FieldValue>) -> Result<(), ContractViolation> {
        let spec_name = self.name().to_string();
        match self.fields_mut().get_mut(field) {
            Some(slot) => {
                *slot = value.into();
                Ok(())
            }
            None => Err(ContractViolation::UndeclaredField {
                spec: spec_name,
                field: field.to_string(),
            }),
        }
    }

    /// True once no field holds a lazy reference.
    pub fn is_resolved(&self) -> bool {
        self.fields().values().all(|value| matches!(value, FieldValue::Concrete(_)))
    }

    pub fn lazy_fields(&self) -> impl Iterator<Item = (&str, &LazyField)> {
        self.fields()
            .iter()
            .filter_map(|(name, value)| value.as_lazy().map(|lazy| (name.as_str(), lazy)))
    }

    /// All field values in declaration order; fails if any field is still lazy.
    pub fn concrete_values(&self) -> Result<IndexMap<String, Value>, ContractViolation> {
        self.fields()
            .iter()
            .map(|(name, value)| match value {
                FieldValue::Concrete(value) => Ok((name.clone(), value.clone())),
                FieldValue::Lazy(_) => Err(ContractViolation::UnresolvedField {
                    spec: self.name().to_string(),
                    field: name.clone(),
                }),
            })
            .collect()
    }

    pub fn hash(&self) -> Result<Checksum, ContractViolation> {
        compute_checksum(self)
    }

    /// Replace every lazy field with its resolved value.
    ///
    /// Values are resolved first and written back only when all of them succeeded, so a
    /// failure leaves the spec untouched.
    pub fn retrieve_values<G>(&mut self, graph: &G, state_index: Option<StateIndex>, policy: &RetryPolicy) -> Result<(), ResolveError>
    where
        G: WorkflowGraph + ?Sized,
    {
        let mut resolved = Vec::new();
        for (name, lazy) in self.lazy_fields() {
            debug!(spec = %self.name(), field = %name, source = %lazy, "resolving lazy field");
            resolved.push((name.to_string(), resolve(lazy, graph, state_index, policy)?));
        }
        self.write_back(resolved);
        Ok(())
    }

    /// Async counterpart of [`Spec::retrieve_values`].
    pub async fn retrieve_values_async<G>(
        &mut self,
        graph: &G,
        state_index: Option<StateIndex>,
        policy: &RetryPolicy,
    ) -> Result<(), ResolveError>
    where
        G: WorkflowGraph + ?Sized,
    {
        let pending = self
            .lazy_fields()
            .map(|(name, lazy)| (name.to_string(), lazy.clone()))
            .collect::<Vec<_>>();
        let mut resolved = Vec::with_capacity(pending.len());
        for (name, lazy) in pending {
            debug!(spec = %self.name(), field = %name, source = %lazy, "resolving lazy field");
            let value = resolve_async(&lazy, graph, state_index, policy).await?;
            resolved.push((name, value));
        }
        self.write_back(resolved);
        Ok(())
    }

    fn write_back(&mut self, resolved: Vec<(String, Value)>) {
        let fields = self.fields_mut();
        for (name, value) in resolved {
            if let Some(slot) = fields.get_mut(&name) {
                *slot = FieldValue::Concrete(value);
            }
        }
    }
}

fn initial_fields(info: &SpecInfo) -> IndexMap<String, FieldValue> {
    info.fields()
        .iter()
        .map(|field| {
            let value = field.default.clone().unwrap_or_default();
            (field.name.clone(), FieldValue::Concrete(value))
        })
        .collect()
}
