//! The persisted outcome of a task run.
//!
//! A [`ResultRecord`] bundles the named outputs, optional runtime metrics, and an errored
//! flag. Outputs are stored together with the output spec they were produced against
//! (spec name plus each field's name and declared type), so a record written by one
//! process can be decoded by another and checked against the caller's current output spec.
//!
//! ## Encoding
//!
//! Records are encoded with `postcard`; `Value` keeps its variant tags, so integers stay
//! integers and file paths stay file paths after a round trip.

use chrono::{DateTime, Utc};
use flowcache_types::{FieldType, SpecInfo, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use thiserror::Error;

use crate::error::ContractViolation;

#[derive(Debug, Error)]
pub enum RecordError {
    /// The stored output spec does not describe the caller's output spec.
    #[error("stored outputs do not match spec '{spec}': {reason}")]
    ShapeMismatch { spec: String, reason: String },

    #[error("record encoding failed: {0}")]
    Codec(#[from] postcard::Error),
}

/// Resource usage observed while a task ran. Every metric is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeMetrics {
    pub rss_peak_gb: Option<f64>,
    pub vms_peak_gb: Option<f64>,
    pub cpu_peak_percent: Option<f64>,
    pub duration_secs: Option<f64>,
}

/// One output value together with its declared shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputField {
    pub name: String,
    pub ty: FieldType,
    pub value: Value,
}

/// Output values in output-spec order, tagged with the spec they were produced for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputBundle {
    pub spec_name: String,
    pub fields: Vec<OutputField>,
}

impl OutputBundle {
    /// Check a task's raw outputs against its output spec and put them in declaration order.
    pub fn from_values(spec: &SpecInfo, task: &str, mut values: IndexMap<String, Value>) -> Result<Self, ContractViolation> {
        if values.len() != spec.len() {
            return Err(ContractViolation::OutputCount {
                task: task.to_string(),
                expected: spec.len(),
                got: values.len(),
            });
        }
        if let Some(name) = values.keys().find(|name| !spec.contains(name)) {
            return Err(ContractViolation::UndeclaredOutput {
                task: task.to_string(),
                field: name.clone(),
            });
        }

        let mut fields = Vec::with_capacity(spec.len());
        for declared in spec.fields() {
            let value = values.shift_remove(&declared.name).unwrap_or_default();
            if !declared.ty.admits(&value) {
                return Err(ContractViolation::OutputType {
                    task: task.to_string(),
                    field: declared.name.clone(),
                    expected: declared.ty.to_string(),
                    got: value.kind().to_string(),
                });
            }
            fields.push(OutputField {
                name: declared.name.clone(),
                ty: declared.ty.clone(),
                value,
            });
        }

        Ok(Self {
            spec_name: spec.name().to_string(),
            fields,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|field| field.name == name).map(|field| &field.value)
    }

    /// Rebuild the outputs as a mapping after verifying they match `spec` field for field.
    pub fn reconstruct(&self, spec: &SpecInfo) -> Result<IndexMap<String, Value>, RecordError> {
        let mismatch = |reason: String| RecordError::ShapeMismatch {
            spec: spec.name().to_string(),
            reason,
        };
        if self.spec_name != spec.name() {
            return Err(mismatch(format!("record was produced for '{}'", self.spec_name)));
        }
        if self.fields.len() != spec.len() {
            return Err(mismatch(format!("expected {} fields, record has {}", spec.len(), self.fields.len())));
        }
        for (stored, declared) in self.fields.iter().zip(spec.fields()) {
            if stored.name != declared.name || stored.ty != declared.ty {
                return Err(mismatch(format!(
                    "field '{}: {}' does not match declared '{}: {}'",
                    stored.name, stored.ty, declared.name, declared.ty
                )));
            }
        }
        Ok(self.fields.iter().map(|field| (field.name.clone(), field.value.clone())).collect())
    }
}

/// Outcome of one task run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    output: Option<OutputBundle>,
    runtime: Option<RuntimeMetrics>,
    errored: bool,
    created_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn success(output: OutputBundle, runtime: Option<RuntimeMetrics>) -> Self {
        Self {
            output: Some(output),
            runtime,
            errored: false,
            created_at: Utc::now(),
        }
    }

    /// Record of a failed run. Errored records carry no outputs.
    pub fn failure(runtime: Option<RuntimeMetrics>) -> Self {
        Self {
            output: None,
            runtime,
            errored: true,
            created_at: Utc::now(),
        }
    }

    pub fn output(&self) -> Option<&OutputBundle> {
        self.output.as_ref()
    }

    pub fn runtime(&self) -> Option<&RuntimeMetrics> {
        self.runtime.as_ref()
    }

    pub fn errored(&self) -> bool {
        self.errored
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Value of one output field, if present.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.output.as_ref().and_then(|output| output.get(field))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RecordError> {
        Ok(postcard::to_stdvec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        Ok(postcard::from_bytes(bytes)?)
    }

    /// Human-readable summary used by the CLI.
    pub fn to_json(&self) -> JsonValue {
        let outputs = self.output.as_ref().map(|bundle| {
            let fields = bundle
                .fields
                .iter()
                .map(|field| (field.name.clone(), field.value.to_json()))
                .collect::<serde_json::Map<_, _>>();
            json!({ "spec": bundle.spec_name, "fields": fields })
        });
        json!({
            "errored": self.errored,
            "created_at": self.created_at.to_rfc3339(),
            "output": outputs,
            "runtime": self.runtime,
        })
    }
}
