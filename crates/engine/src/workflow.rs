//! In-memory workflow graph shared between the tasks running inside it.
//!
//! A [`Workflow`] owns its own input fields plus one slot per node. Each node slot keeps
//! the node's declared specs, its latest published input values, and per-element
//! checksums and result records shaped after the node's [`Fanout`]. All state sits
//! behind `RwLock`s, so producers can publish from worker threads while downstream
//! nodes poll through [`WorkflowGraph`].

use std::sync::{Arc, RwLock};

use flowcache_types::{SpecInfo, Value};
use indexmap::IndexMap;
use tracing::debug;

use crate::{
    checksum::{Checksum, compute_checksum},
    error::ContractViolation,
    graph::{NodeResult, StateIndex, WorkflowGraph},
    lazy::{LazyField, LazyMode},
    record::ResultRecord,
    spec::Spec,
};

/// How many result instances a node produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fanout {
    /// One execution, one result.
    Single,
    /// Split into the given number of parallel executions.
    Split(usize),
    /// Two-level split; one entry per outer element giving its inner length.
    Nested(Vec<usize>),
}

/// Address of one result slot within a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultIndex {
    Single,
    Flat(usize),
    Nested(usize, usize),
}

impl ResultIndex {
    /// State index a consumer split over the same dimension would use.
    pub fn state_index(self) -> Option<StateIndex> {
        match self {
            ResultIndex::Single => None,
            ResultIndex::Flat(index) | ResultIndex::Nested(index, _) => Some(StateIndex(index)),
        }
    }
}

#[derive(Debug, Clone)]
enum Slots<T> {
    Single(Option<T>),
    Flat(Vec<Option<T>>),
    Nested(Vec<Vec<Option<T>>>),
}

impl<T> Slots<T> {
    fn for_fanout(fanout: &Fanout) -> Self {
        match fanout {
            Fanout::Single => Slots::Single(None),
            Fanout::Split(len) => Slots::Flat(std::iter::repeat_with(|| None).take(*len).collect()),
            Fanout::Nested(lens) => Slots::Nested(
                lens.iter()
                    .map(|len| std::iter::repeat_with(|| None).take(*len).collect())
                    .collect(),
            ),
        }
    }

    fn slot_mut(&mut self, index: ResultIndex) -> Option<&mut Option<T>> {
        match (self, index) {
            (Slots::Single(slot), ResultIndex::Single) => Some(slot),
            (Slots::Flat(slots), ResultIndex::Flat(outer)) => slots.get_mut(outer),
            (Slots::Nested(rows), ResultIndex::Nested(outer, inner)) => rows.get_mut(outer)?.get_mut(inner),
            _ => None,
        }
    }

    fn flatten(&self) -> Vec<&Option<T>> {
        match self {
            Slots::Single(slot) => vec![slot],
            Slots::Flat(slots) => slots.iter().collect(),
            Slots::Nested(rows) => rows.iter().flatten().collect(),
        }
    }
}

#[derive(Debug)]
struct NodeSlot {
    input_spec: SpecInfo,
    output_spec: SpecInfo,
    inputs: IndexMap<String, Value>,
    checksums: Slots<Checksum>,
    results: Slots<Arc<ResultRecord>>,
}

/// Named graph of nodes with its own inputs.
#[derive(Debug)]
pub struct Workflow {
    name: String,
    input_spec: SpecInfo,
    inputs: RwLock<IndexMap<String, Value>>,
    nodes: RwLock<IndexMap<String, NodeSlot>>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, input_spec: SpecInfo) -> Self {
        let inputs = default_values(&input_spec);
        Self {
            name: name.into(),
            input_spec,
            inputs: RwLock::new(inputs),
            nodes: RwLock::new(IndexMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_spec(&self) -> &SpecInfo {
        &self.input_spec
    }

    /// Register a node. Names must be unique and differ from the workflow's own name.
    pub fn add_node(&self, name: impl Into<String>, input_spec: SpecInfo, output_spec: SpecInfo, fanout: Fanout) -> Result<(), ContractViolation> {
        let name = name.into();
        let mut nodes = self.nodes.write().expect("workflow lock poisoned");
        if name == self.name || nodes.contains_key(&name) {
            return Err(ContractViolation::DuplicateNode {
                workflow: self.name.clone(),
                node: name,
            });
        }
        debug!(workflow = %self.name, node = %name, fanout = ?fanout, "added node");
        nodes.insert(
            name,
            NodeSlot {
                inputs: default_values(&input_spec),
                input_spec,
                output_spec,
                checksums: Slots::for_fanout(&fanout),
                results: Slots::for_fanout(&fanout),
            },
        );
        Ok(())
    }

    pub fn node_names(&self) -> Vec<String> {
        self.nodes.read().expect("workflow lock poisoned").keys().cloned().collect()
    }

    /// Set one of the workflow's own inputs.
    pub fn set_input(&self, field: &str, value: impl Into<Value>) -> Result<(), ContractViolation> {
        let mut inputs = self.inputs.write().expect("workflow lock poisoned");
        match inputs.get_mut(field) {
            Some(slot) => {
                *slot = value.into();
                Ok(())
            }
            None => Err(ContractViolation::UndeclaredField {
                spec: self.input_spec.name().to_string(),
                field: field.to_string(),
            }),
        }
    }

    /// Set one input value of `node`.
    pub fn set_node_input(&self, node: &str, field: &str, value: impl Into<Value>) -> Result<(), ContractViolation> {
        let mut nodes = self.nodes.write().expect("workflow lock poisoned");
        let slot = nodes.get_mut(node).ok_or_else(|| self.unknown_node(node))?;
        match slot.inputs.get_mut(field) {
            Some(current) => {
                *current = value.into();
                Ok(())
            }
            None => Err(ContractViolation::UndeclaredField {
                spec: slot.input_spec.name().to_string(),
                field: field.to_string(),
            }),
        }
    }

    /// Publish every input value of `node` at once.
    pub fn set_node_inputs(&self, node: &str, values: &IndexMap<String, Value>) -> Result<(), ContractViolation> {
        let mut nodes = self.nodes.write().expect("workflow lock poisoned");
        let slot = nodes.get_mut(node).ok_or_else(|| self.unknown_node(node))?;
        if let Some(field) = values.keys().find(|field| !slot.input_spec.contains(field)) {
            return Err(ContractViolation::UndeclaredField {
                spec: slot.input_spec.name().to_string(),
                field: field.clone(),
            });
        }
        for (field, value) in values {
            slot.inputs.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    /// Publish the checksum of the execution at `index` of `node`.
    pub fn publish_checksum(&self, node: &str, index: ResultIndex, checksum: Checksum) -> Result<(), ContractViolation> {
        let mut nodes = self.nodes.write().expect("workflow lock poisoned");
        let slot = nodes.get_mut(node).ok_or_else(|| self.unknown_node(node))?;
        let target = slot.checksums.slot_mut(index).ok_or_else(|| invalid_index(node, index))?;
        *target = Some(checksum);
        Ok(())
    }

    /// Publish the result of the execution at `index` of `node`.
    pub fn publish_result(&self, node: &str, index: ResultIndex, record: ResultRecord) -> Result<(), ContractViolation> {
        let mut nodes = self.nodes.write().expect("workflow lock poisoned");
        let slot = nodes.get_mut(node).ok_or_else(|| self.unknown_node(node))?;
        let target = slot.results.slot_mut(index).ok_or_else(|| invalid_index(node, index))?;
        debug!(workflow = %self.name, node = %node, index = ?index, errored = record.errored(), "published result");
        *target = Some(Arc::new(record));
        Ok(())
    }

    /// Lazy reference to the inputs of `node`; the workflow's own name refers to its own inputs.
    pub fn lzin(&self, node: &str) -> Result<LazyField, ContractViolation> {
        if node == self.name {
            return Ok(LazyField::from_spec(node, LazyMode::Input, &self.input_spec));
        }
        let nodes = self.nodes.read().expect("workflow lock poisoned");
        let slot = nodes.get(node).ok_or_else(|| self.unknown_node(node))?;
        Ok(LazyField::from_spec(node, LazyMode::Input, &slot.input_spec))
    }

    /// Lazy reference to the outputs of `node`.
    pub fn lzout(&self, node: &str) -> Result<LazyField, ContractViolation> {
        let nodes = self.nodes.read().expect("workflow lock poisoned");
        let slot = nodes.get(node).ok_or_else(|| self.unknown_node(node))?;
        Ok(LazyField::from_spec(node, LazyMode::Output, &slot.output_spec))
    }

    /// Composite spec of the workflow: its own inputs plus every published node checksum,
    /// in node insertion order.
    pub fn spec(&self) -> Result<Spec, ContractViolation> {
        let nodes = self.nodes.read().expect("workflow lock poisoned");
        let mut sub_nodes = Vec::new();
        for (name, slot) in nodes.iter() {
            for checksum in slot.checksums.flatten() {
                let checksum = checksum
                    .as_ref()
                    .ok_or_else(|| ContractViolation::MissingNodeChecksum { node: name.clone() })?;
                sub_nodes.push(checksum.clone());
            }
        }
        drop(nodes);

        let mut spec = Spec::composite(&self.input_spec, sub_nodes);
        let inputs = self.inputs.read().expect("workflow lock poisoned");
        for (field, value) in inputs.iter() {
            spec.set(field, value.clone())?;
        }
        Ok(spec)
    }

    pub fn checksum(&self) -> Result<Checksum, ContractViolation> {
        compute_checksum(&self.spec()?)
    }

    fn unknown_node(&self, node: &str) -> ContractViolation {
        ContractViolation::UnknownNode {
            workflow: self.name.clone(),
            node: node.to_string(),
        }
    }
}

impl WorkflowGraph for Workflow {
    fn input_value(&self, node: &str, field: &str) -> Result<Value, ContractViolation> {
        let undeclared = |spec: &SpecInfo| ContractViolation::UndeclaredField {
            spec: spec.name().to_string(),
            field: field.to_string(),
        };
        if node == self.name {
            let inputs = self.inputs.read().expect("workflow lock poisoned");
            return inputs.get(field).cloned().ok_or_else(|| undeclared(&self.input_spec));
        }
        let nodes = self.nodes.read().expect("workflow lock poisoned");
        let slot = nodes.get(node).ok_or_else(|| self.unknown_node(node))?;
        slot.inputs.get(field).cloned().ok_or_else(|| undeclared(&slot.input_spec))
    }

    fn result(&self, node: &str, state_index: Option<StateIndex>) -> Result<NodeResult, ContractViolation> {
        let nodes = self.nodes.read().expect("workflow lock poisoned");
        let slot = nodes.get(node).ok_or_else(|| self.unknown_node(node))?;
        let out_of_range = |StateIndex(index): StateIndex| ContractViolation::InvalidIndex {
            node: node.to_string(),
            index: index.to_string(),
        };

        let result = match (&slot.results, state_index) {
            (Slots::Single(None), _) => NodeResult::Pending,
            (Slots::Single(Some(record)), _) => NodeResult::Single(Arc::clone(record)),
            (Slots::Flat(slots), None) => NodeResult::Split(slots.clone()),
            (Slots::Flat(slots), Some(index)) => match slots.get(index.0).ok_or_else(|| out_of_range(index))? {
                Some(record) => NodeResult::Single(Arc::clone(record)),
                None => NodeResult::Pending,
            },
            (Slots::Nested(rows), None) => NodeResult::NestedSplit(rows.clone()),
            (Slots::Nested(rows), Some(index)) => NodeResult::Split(rows.get(index.0).ok_or_else(|| out_of_range(index))?.clone()),
        };
        Ok(result)
    }
}

fn default_values(spec: &SpecInfo) -> IndexMap<String, Value> {
    spec.fields()
        .iter()
        .map(|field| (field.name.clone(), field.default.clone().unwrap_or_default()))
        .collect()
}

fn invalid_index(node: &str, index: ResultIndex) -> ContractViolation {
    ContractViolation::InvalidIndex {
        node: node.to_string(),
        index: format!("{index:?}"),
    }
}
