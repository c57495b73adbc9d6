//! Shared value model for the flowcache engine.
//!
//! Task inputs and outputs are described by a [`SpecInfo`]: an ordered list of named,
//! typed fields. Concrete field contents are carried as [`Value`]s, a small dynamically
//! shaped value type that every part of the engine (checksums, result records, lazy
//! resolution) agrees on.

pub mod field;
pub mod value;

pub use field::{FieldDef, FieldType, SpecError, SpecInfo};
pub use value::Value;
