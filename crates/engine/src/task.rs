//! Cache-aware task execution.
//!
//! A [`Task`] pairs declared input/output specs with an instantiated input [`Spec`] and a
//! [`ResultStore`]. Running a task computes its checksum (`<kind>_<input hash>`), reuses a
//! stored successful record when one exists, and otherwise hands the concrete inputs to a
//! [`TaskRunner`], validates what comes back, and stores the record.
//!
//! ## Key Features
//! - **Idempotent runs**: identical inputs never invoke the runner twice.
//! - **Failure records**: a runner error is stored as an errored record and surfaced as
//!   [`EngineError::TaskFailed`]; the next run retries it.
//! - **Workflow integration**: [`Task::run_in_workflow`] resolves lazy inputs against a
//!   [`Workflow`] and publishes the checksum and record back into it. Any failure
//!   publishes an errored record, so downstream nodes fail instead of waiting.

use std::{sync::Arc, time::Instant};

use flowcache_types::{SpecInfo, Value};
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::{
    checksum::Checksum,
    error::{ContractViolation, EngineError, ResolveError},
    record::{OutputBundle, ResultRecord, RuntimeMetrics},
    resolve::RetryPolicy,
    spec::{FieldValue, Spec},
    store::ResultStore,
    workflow::{ResultIndex, Workflow},
};

/// Values and metrics produced by one runner invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutput {
    pub values: IndexMap<String, Value>,
    pub runtime: Option<RuntimeMetrics>,
}

impl RunOutput {
    pub fn new(values: IndexMap<String, Value>) -> Self {
        Self { values, runtime: None }
    }

    pub fn with_runtime(mut self, runtime: RuntimeMetrics) -> Self {
        self.runtime = Some(runtime);
        self
    }
}

impl From<IndexMap<String, Value>> for RunOutput {
    fn from(values: IndexMap<String, Value>) -> Self {
        Self::new(values)
    }
}

/// Performs the actual work of a task.
pub trait TaskRunner {
    /// Compute output values from fully resolved inputs, keyed by output field name.
    fn run(&self, inputs: &IndexMap<String, Value>) -> anyhow::Result<RunOutput>;
}

impl<F> TaskRunner for F
where
    F: Fn(&IndexMap<String, Value>) -> anyhow::Result<RunOutput>,
{
    fn run(&self, inputs: &IndexMap<String, Value>) -> anyhow::Result<RunOutput> {
        self(inputs)
    }
}

pub struct Task {
    name: String,
    kind: String,
    input_spec: SpecInfo,
    output_spec: SpecInfo,
    inputs: Spec,
    store: Arc<dyn ResultStore>,
}

impl Task {
    /// Create a task named `name` of kind `kind` (e.g. `FunctionTask`), with inputs
    /// initialised from the declared defaults.
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        input_spec: SpecInfo,
        output_spec: SpecInfo,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        let inputs = Spec::from_info(&input_spec);
        Self {
            name: name.into(),
            kind: kind.into(),
            input_spec,
            output_spec,
            inputs,
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn input_spec(&self) -> &SpecInfo {
        &self.input_spec
    }

    pub fn output_spec(&self) -> &SpecInfo {
        &self.output_spec
    }

    pub fn inputs(&self) -> &Spec {
        &self.inputs
    }

    /// Set an input to a concrete value or a lazy reference.
    pub fn set_input(&mut self, field: &str, value: impl Into<FieldValue>) -> Result<(), ContractViolation> {
        self.inputs.set(field, value)
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.output_spec.names().collect()
    }

    /// Task identity derived from the current inputs.
    pub fn checksum(&self) -> Result<Checksum, ContractViolation> {
        Ok(Checksum::for_task(&self.kind, &self.inputs.hash()?))
    }

    pub fn help(&self) -> Vec<String> {
        let mut lines = vec![format!("Help for {}", self.kind), "Input Parameters:".to_string()];
        lines.extend(self.input_spec.help_lines());
        lines.push("Output Parameters:".to_string());
        lines.extend(self.output_spec.help_lines());
        lines
    }

    /// Record stored for the current inputs, errored ones included.
    ///
    /// Returns `None` while inputs are still lazy or nothing has been stored for them.
    pub fn result(&self) -> Result<Option<ResultRecord>, EngineError> {
        if !self.inputs.is_resolved() {
            return Ok(None);
        }
        Ok(self.store.load(&self.checksum()?)?)
    }

    /// Run the task, reusing a stored successful record when one exists.
    pub fn run(&self, runner: &dyn TaskRunner) -> Result<ResultRecord, EngineError> {
        self.check_mandatory()?;
        let checksum = self.checksum()?;

        if let Some(record) = self.store.load(&checksum)? {
            if !record.errored() {
                info!(task = %self.name, checksum = %checksum, "reusing stored result");
                return Ok(record);
            }
            debug!(task = %self.name, checksum = %checksum, "stored result is errored; running again");
        }

        let values = self.inputs.concrete_values()?;
        info!(task = %self.name, checksum = %checksum, "running task");
        let started = Instant::now();
        let outcome = runner.run(&values);
        let duration_secs = started.elapsed().as_secs_f64();

        match outcome {
            Ok(output) => {
                let bundle = OutputBundle::from_values(&self.output_spec, &self.name, output.values)?;
                let mut runtime = output.runtime.unwrap_or_default();
                runtime.duration_secs = Some(duration_secs);
                let record = ResultRecord::success(bundle, Some(runtime));
                self.store.save(&checksum, &record)?;
                info!(task = %self.name, checksum = %checksum, duration_secs, "task finished");
                Ok(record)
            }
            Err(reason) => {
                let record = ResultRecord::failure(Some(RuntimeMetrics {
                    duration_secs: Some(duration_secs),
                    ..RuntimeMetrics::default()
                }));
                self.store.save(&checksum, &record)?;
                warn!(task = %self.name, checksum = %checksum, error = %reason, "task failed");
                Err(EngineError::TaskFailed {
                    task: self.name.clone(),
                    reason,
                })
            }
        }
    }

    /// Run the task as node `self.name()` of `workflow`, at slot `index`.
    ///
    /// Lazy inputs are resolved first (using the slot's state index for split upstreams),
    /// then the node's inputs and checksum are published, the task runs, and its record is
    /// published. A failed run still publishes its errored record so downstream readers
    /// fail fast instead of waiting.
    pub fn run_in_workflow(
        &mut self,
        workflow: &Workflow,
        index: ResultIndex,
        runner: &dyn TaskRunner,
        policy: &RetryPolicy,
    ) -> Result<ResultRecord, EngineError> {
        let prepared = self.inputs.retrieve_values(workflow, index.state_index(), policy);
        self.prepare_in_workflow(workflow, index, prepared)?;
        self.finish_in_workflow(workflow, index, runner)
    }

    /// Async counterpart of [`Task::run_in_workflow`]; only the waiting on upstream
    /// results is async, the runner itself is called inline.
    pub async fn run_in_workflow_async(
        &mut self,
        workflow: &Workflow,
        index: ResultIndex,
        runner: &(dyn TaskRunner + Sync),
        policy: &RetryPolicy,
    ) -> Result<ResultRecord, EngineError> {
        let prepared = self
            .inputs
            .retrieve_values_async(workflow, index.state_index(), policy)
            .await;
        self.prepare_in_workflow(workflow, index, prepared)?;
        self.finish_in_workflow(workflow, index, runner)
    }

    /// Publish inputs and checksum once lazy inputs are resolved, or an errored record
    /// when they could not be.
    fn prepare_in_workflow(
        &self,
        workflow: &Workflow,
        index: ResultIndex,
        resolved: Result<(), ResolveError>,
    ) -> Result<(), EngineError> {
        let prepared = resolved.map_err(EngineError::from).and_then(|()| {
            workflow.set_node_inputs(&self.name, &self.inputs.concrete_values()?)?;
            workflow.publish_checksum(&self.name, index, self.checksum()?)?;
            Ok(())
        });
        if let Err(error) = &prepared {
            warn!(task = %self.name, index = ?index, error = %error, "task inputs unavailable");
            self.publish_failure(workflow, index, ResultRecord::failure(None));
        }
        prepared
    }

    fn finish_in_workflow(&self, workflow: &Workflow, index: ResultIndex, runner: &dyn TaskRunner) -> Result<ResultRecord, EngineError> {
        match self.run(runner) {
            Ok(record) => {
                workflow.publish_result(&self.name, index, record.clone())?;
                Ok(record)
            }
            Err(error) => {
                let stored = match &error {
                    EngineError::TaskFailed { .. } => self.result().ok().flatten().filter(ResultRecord::errored),
                    _ => None,
                };
                let record = stored.unwrap_or_else(|| self.store_failure(&error));
                self.publish_failure(workflow, index, record);
                Err(error)
            }
        }
    }

    /// Errored record for a run that failed outside the runner, stored when the store
    /// accepts it.
    fn store_failure(&self, error: &EngineError) -> ResultRecord {
        let record = ResultRecord::failure(None);
        if let Ok(checksum) = self.checksum()
            && let Err(store_error) = self.store.save(&checksum, &record)
        {
            warn!(task = %self.name, checksum = %checksum, error = %store_error, "could not store errored record");
        }
        debug!(task = %self.name, error = %error, "recording failed run");
        record
    }

    fn publish_failure(&self, workflow: &Workflow, index: ResultIndex, record: ResultRecord) {
        if let Err(error) = workflow.publish_result(&self.name, index, record) {
            warn!(task = %self.name, index = ?index, error = %error, "could not publish errored record");
        }
    }

    fn check_mandatory(&self) -> Result<(), ContractViolation> {
        for field in self.input_spec.fields().iter().filter(|field| field.mandatory) {
            if self.inputs.value(&field.name).is_some_and(Value::is_none) {
                return Err(ContractViolation::MissingMandatory {
                    task: self.name.clone(),
                    field: field.name.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use flowcache_types::{FieldDef, FieldType};
    use indexmap::indexmap;

    fn function_task(store: Arc<dyn ResultStore>) -> Task {
        let inputs = SpecInfo::new(
            "Inputs",
            vec![
                FieldDef::new("a", FieldType::Int).mandatory(),
                FieldDef::new("b", FieldType::Float).with_default(0.1),
            ],
        )
        .expect("inputs");
        let outputs = SpecInfo::new("Output", vec![FieldDef::new("out1", FieldType::Float)]).expect("outputs");
        Task::new("testfunc", "FunctionTask", inputs, outputs, store)
    }

    fn add(inputs: &IndexMap<String, Value>) -> anyhow::Result<RunOutput> {
        let a = inputs["a"].as_float().unwrap_or_default();
        let b = inputs["b"].as_float().unwrap_or_default();
        Ok(indexmap! { "out1".to_string() => Value::Float(a + b) }.into())
    }

    #[test]
    fn help_lists_inputs_then_outputs() {
        let task = function_task(Arc::new(MemoryStore::new()));
        assert_eq!(
            task.help(),
            vec![
                "Help for FunctionTask",
                "Input Parameters:",
                "- a: int",
                "- b: float (default: 0.1)",
                "Output Parameters:",
                "- out1: float",
            ]
        );
        assert_eq!(task.output_names(), vec!["out1"]);
    }

    #[test]
    fn checksum_is_prefixed_by_kind() {
        let mut task = function_task(Arc::new(MemoryStore::new()));
        task.set_input("a", Value::Int(3)).expect("set");
        let checksum = task.checksum().expect("checksum");
        assert!(checksum.as_str().starts_with("FunctionTask_"));
        assert_eq!(checksum.as_str().len(), "FunctionTask_".len() + 64);
    }

    #[test]
    fn mandatory_inputs_must_be_set() {
        let task = function_task(Arc::new(MemoryStore::new()));
        match task.run(&add) {
            Err(EngineError::Contract(ContractViolation::MissingMandatory { field, .. })) => assert_eq!(field, "a"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn result_follows_current_inputs() {
        let mut task = function_task(Arc::new(MemoryStore::new()));
        task.set_input("a", Value::Int(3)).expect("set");
        assert!(task.result().expect("result").is_none());

        let record = task.run(&add).expect("run");
        assert_eq!(record.get("out1"), Some(&Value::Float(3.1)));
        assert_eq!(task.result().expect("result"), Some(record));

        task.set_input("a", Value::Int(4)).expect("set");
        assert!(task.result().expect("result").is_none());
    }

    #[test]
    fn runner_errors_are_recorded_and_retried() {
        let mut task = function_task(Arc::new(MemoryStore::new()));
        task.set_input("a", Value::Int(1)).expect("set");

        let failing = |_: &IndexMap<String, Value>| -> anyhow::Result<RunOutput> { anyhow::bail!("boom") };
        let error = task.run(&failing).expect_err("runner fails");
        assert!(error.to_string().contains("boom"), "{error}");
        assert!(task.result().expect("result").expect("errored record").errored());

        let record = task.run(&add).expect("second attempt");
        assert!(!record.errored());
    }

    #[test]
    fn output_count_mismatch_is_a_contract_violation() {
        let mut task = function_task(Arc::new(MemoryStore::new()));
        task.set_input("a", Value::Int(1)).expect("set");
        let too_many = |_: &IndexMap<String, Value>| -> anyhow::Result<RunOutput> {
            Ok(indexmap! {
                "out1".to_string() => Value::Float(1.0),
                "out2".to_string() => Value::Float(2.0),
            }
            .into())
        };
        let error = task.run(&too_many).expect_err("mismatch");
        assert!(error.to_string().contains("expected 1 elements"), "{error}");
        assert!(task.result().expect("result").is_none());
    }
}
