//! # Flowcache Engine
//!
//! The Flowcache Engine derives content-based identities for task inputs, caches task
//! results under those identities, and resolves lazy references between the nodes of a
//! workflow by waiting on upstream results.
//!
//! ## Key Features
//!
//! - **Checksums**: SHA-256 over a canonical rendering of a spec's resolved values;
//!   workflow checksums fold in the checksums of every node
//! - **Result Records**: schema-carrying output bundles persisted with `postcard`
//! - **Result Stores**: in-memory and on-disk stores keyed by task checksum
//! - **Lazy Resolution**: bounded polling of upstream results, with all-or-nothing
//!   readiness for split and nested-split fan-out
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use flowcache_engine::{MemoryStore, RunOutput, Task};
//! use flowcache_types::{FieldDef, FieldType, SpecInfo, Value};
//! use indexmap::{IndexMap, indexmap};
//!
//! let inputs = SpecInfo::new("Inputs", vec![FieldDef::new("a", FieldType::Int)])?;
//! let outputs = SpecInfo::new("Output", vec![FieldDef::new("out1", FieldType::Int)])?;
//! let mut task = Task::new("double", "FunctionTask", inputs, outputs, Arc::new(MemoryStore::new()));
//! task.set_input("a", Value::Int(21))?;
//!
//! let double = |inputs: &IndexMap<String, Value>| -> anyhow::Result<RunOutput> {
//!     let a = inputs["a"].as_int().unwrap_or_default();
//!     Ok(indexmap! { "out1".to_string() => Value::Int(a * 2) }.into())
//! };
//! let record = task.run(&double)?;
//! assert_eq!(record.get("out1"), Some(&Value::Int(42)));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`spec`**: instantiated input specs holding concrete values or lazy references
//! - **`checksum`**: canonical text and digests
//! - **`record`** / **`store`**: result records and their persistence
//! - **`lazy`**, **`graph`**, **`workflow`**: lazy references and the graph they read from
//! - **`resolve`**: the polling protocol (blocking and async)
//! - **`task`**: cache-aware execution
//! - **`config`**: cache directory and retry settings

pub mod checksum;
pub mod config;
pub mod error;
pub mod graph;
pub mod lazy;
pub mod record;
pub mod resolve;
pub mod spec;
pub mod store;
pub mod task;
pub mod workflow;

pub use checksum::{Checksum, compute_checksum};
pub use config::{ConfigError, EngineConfig};
pub use error::{ContractViolation, EngineError, ResolveError};
pub use graph::{NodeResult, StateIndex, WorkflowGraph};
pub use lazy::{LazyField, LazyMode};
pub use record::{OutputBundle, OutputField, RecordError, ResultRecord, RuntimeMetrics};
pub use resolve::{Readiness, RetryPolicy, poll_once, resolve, resolve_async};
pub use spec::{FieldValue, Spec};
pub use store::{FsStore, MemoryStore, ResultStore, StoreError};
pub use task::{RunOutput, Task, TaskRunner};
pub use workflow::{Fanout, ResultIndex, Workflow};
