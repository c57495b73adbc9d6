//! Declared field shapes for task inputs and outputs.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Value;

/// Errors raised while declaring a spec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpecError {
    #[error("spec '{spec}' declares field '{field}' more than once")]
    DuplicateField { spec: String, field: String },
}

/// Declared type tag of a field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FieldType {
    /// Accepts any value, including `None`.
    #[default]
    Any,
    Bool,
    Int,
    Float,
    Str,
    File,
    Directory,
    List(Box<FieldType>),
    Map,
    Optional(Box<FieldType>),
}

impl FieldType {
    pub fn list_of(inner: FieldType) -> Self {
        FieldType::List(Box::new(inner))
    }

    pub fn optional(inner: FieldType) -> Self {
        FieldType::Optional(Box::new(inner))
    }

    /// Whether `value` conforms to this type.
    ///
    /// Integers are admitted by `Float` fields. `None` is only admitted by `Any` and
    /// `Optional` fields.
    pub fn admits(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldType::Any, _) => true,
            (FieldType::Optional(_), Value::None) => true,
            (FieldType::Optional(inner), other) => inner.admits(other),
            (FieldType::Bool, Value::Bool(_)) => true,
            (FieldType::Int, Value::Int(_)) => true,
            (FieldType::Float, Value::Float(_) | Value::Int(_)) => true,
            (FieldType::Str, Value::Str(_)) => true,
            (FieldType::File, Value::File(_)) => true,
            (FieldType::Directory, Value::Directory(_)) => true,
            (FieldType::List(inner), Value::List(items)) => items.iter().all(|item| inner.admits(item)),
            (FieldType::Map, Value::Map(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Any => formatter.write_str("any"),
            FieldType::Bool => formatter.write_str("bool"),
            FieldType::Int => formatter.write_str("int"),
            FieldType::Float => formatter.write_str("float"),
            FieldType::Str => formatter.write_str("str"),
            FieldType::File => formatter.write_str("file"),
            FieldType::Directory => formatter.write_str("directory"),
            FieldType::List(inner) => write!(formatter, "list[{inner}]"),
            FieldType::Map => formatter.write_str("map"),
            FieldType::Optional(inner) => write!(formatter, "optional[{inner}]"),
        }
    }
}

/// A single declared field: name, type, and authoring metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    /// Value the field starts with when a spec is instantiated.
    #[serde(default)]
    pub default: Option<Value>,
    /// Free-form description rendered in help output.
    #[serde(default)]
    pub help: Option<String>,
    /// When true, the field must hold a non-`None` value before the task runs.
    #[serde(default)]
    pub mandatory: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
            help: None,
            mandatory: false,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }
}

/// Named, ordered set of field declarations describing a task's inputs or outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecInfo {
    name: String,
    fields: Vec<FieldDef>,
}

impl SpecInfo {
    /// Declare a spec. Field names must be unique.
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> Result<Self, SpecError> {
        let name = name.into();
        for (position, field) in fields.iter().enumerate() {
            if fields[..position].iter().any(|earlier| earlier.name == field.name) {
                return Err(SpecError::DuplicateField {
                    spec: name,
                    field: field.name.clone(),
                });
            }
        }
        Ok(Self { name, fields })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// One `- name: type` line per field, with the default appended when present.
    pub fn help_lines(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(|field| match &field.default {
                Some(default) => format!("- {}: {} (default: {})", field.name, field.ty, default),
                None => format!("- {}: {}", field.name, field.ty),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_field_names() {
        let error = SpecInfo::new(
            "Inputs",
            vec![FieldDef::new("a", FieldType::Int), FieldDef::new("a", FieldType::Float)],
        )
        .expect_err("duplicate names must be rejected");
        assert_eq!(
            error,
            SpecError::DuplicateField {
                spec: "Inputs".into(),
                field: "a".into()
            }
        );
    }

    #[test]
    fn float_fields_admit_integers_but_not_strings() {
        assert!(FieldType::Float.admits(&Value::Int(1)));
        assert!(FieldType::Float.admits(&Value::Float(1.5)));
        assert!(!FieldType::Float.admits(&Value::from("1.5")));
        assert!(!FieldType::Int.admits(&Value::Float(1.0)));
    }

    #[test]
    fn none_requires_optional_or_any() {
        assert!(!FieldType::Str.admits(&Value::None));
        assert!(FieldType::optional(FieldType::Str).admits(&Value::None));
        assert!(FieldType::Any.admits(&Value::None));
    }

    #[test]
    fn list_types_check_every_item() {
        let ints = FieldType::list_of(FieldType::Int);
        assert!(ints.admits(&Value::from(vec![1, 2, 3])));
        assert!(!ints.admits(&Value::List(vec![Value::Int(1), Value::from("2")])));
    }

    #[test]
    fn renders_help_lines_in_declaration_order() {
        let spec = SpecInfo::new(
            "Inputs",
            vec![
                FieldDef::new("a", FieldType::Int),
                FieldDef::new("b", FieldType::Float).with_default(0.1),
                FieldDef::new("paths", FieldType::list_of(FieldType::File)),
            ],
        )
        .expect("valid spec");

        assert_eq!(
            spec.help_lines(),
            vec!["- a: int", "- b: float (default: 0.1)", "- paths: list[file]"]
        );
        assert_eq!(spec.names().collect::<Vec<_>>(), vec!["a", "b", "paths"]);
    }
}
