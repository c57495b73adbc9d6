use std::{sync::Arc, thread, time::Duration};

use flowcache_engine::{
    ContractViolation, EngineError, Fanout, LazyField, MemoryStore, OutputBundle, Readiness, ResolveError, ResultIndex, ResultRecord, RetryPolicy,
    RunOutput, StateIndex, Task, Workflow, poll_once, resolve, resolve_async,
};
use flowcache_types::{FieldDef, FieldType, SpecInfo, Value};
use indexmap::{IndexMap, indexmap};

fn a_inputs() -> SpecInfo {
    SpecInfo::new("AInputs", vec![FieldDef::new("a", FieldType::Int)]).expect("inputs")
}

fn a_outputs() -> SpecInfo {
    SpecInfo::new("AOutput", vec![FieldDef::new("out1", FieldType::Int)]).expect("outputs")
}

fn workflow_with(fanout: Fanout) -> Workflow {
    let workflow = Workflow::new("wf", SpecInfo::new("WfInputs", vec![FieldDef::new("x", FieldType::Int)]).expect("inputs"));
    workflow.add_node("A", a_inputs(), a_outputs(), fanout).expect("add node");
    workflow
}

fn record(value: i64) -> ResultRecord {
    let bundle = OutputBundle::from_values(&a_outputs(), "A", indexmap! { "out1".to_string() => Value::Int(value) }).expect("bundle");
    ResultRecord::success(bundle, None)
}

fn out1(workflow: &Workflow) -> LazyField {
    workflow.lzout("A").expect("lzout").field("out1").expect("field")
}

fn patient() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5_000,
        backoff_after: 0,
        interval: Duration::from_millis(1),
    }
}

fn impatient() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        backoff_after: 2,
        interval: Duration::from_millis(1),
    }
}

#[test]
fn split_results_resolve_only_when_every_element_is_ready() {
    let workflow = workflow_with(Fanout::Split(3));
    let lazy = out1(&workflow);

    workflow.publish_result("A", ResultIndex::Flat(0), record(10)).expect("publish");
    workflow.publish_result("A", ResultIndex::Flat(2), record(30)).expect("publish");
    assert_eq!(poll_once(&lazy, &workflow, None).expect("poll"), Readiness::Pending);

    let value = thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(20));
            workflow.publish_result("A", ResultIndex::Flat(1), record(20)).expect("publish");
        });
        resolve(&lazy, &workflow, None, &patient()).expect("resolve")
    });

    assert_eq!(value, Value::from(vec![10, 20, 30]));
}

#[test]
fn nested_split_resolves_to_list_of_lists() {
    let workflow = workflow_with(Fanout::Nested(vec![2, 2]));
    let lazy = out1(&workflow);

    workflow.publish_result("A", ResultIndex::Nested(0, 0), record(1)).expect("publish");
    workflow.publish_result("A", ResultIndex::Nested(0, 1), record(2)).expect("publish");
    workflow.publish_result("A", ResultIndex::Nested(1, 0), record(3)).expect("publish");
    assert_eq!(poll_once(&lazy, &workflow, None).expect("poll"), Readiness::Pending);
    assert_eq!(
        poll_once(&lazy, &workflow, Some(StateIndex(0))).expect("poll"),
        Readiness::Ready(Value::from(vec![1, 2]))
    );

    workflow.publish_result("A", ResultIndex::Nested(1, 1), record(4)).expect("publish");
    let value = resolve(&lazy, &workflow, None, &impatient()).expect("resolve");
    assert_eq!(value, Value::from(vec![vec![1, 2], vec![3, 4]]));
}

#[test]
fn unfinished_upstream_gives_up_after_the_retry_ceiling() {
    let workflow = workflow_with(Fanout::Single);
    let lazy = out1(&workflow);

    let error = resolve(&lazy, &workflow, None, &impatient()).expect_err("never ready");
    assert_eq!(
        error,
        ResolveError::Unresolvable {
            node: "A".into(),
            field: "out1".into(),
            attempts: 5,
        }
    );
}

#[test]
fn errored_upstream_fails_without_waiting() {
    let workflow = workflow_with(Fanout::Split(2));
    workflow.publish_result("A", ResultIndex::Flat(0), record(1)).expect("publish");
    workflow.publish_result("A", ResultIndex::Flat(1), ResultRecord::failure(None)).expect("publish");

    let policy = RetryPolicy {
        max_attempts: u32::MAX,
        backoff_after: 0,
        interval: Duration::from_secs(60),
    };
    let error = resolve(&out1(&workflow), &workflow, None, &policy).expect_err("upstream failed");
    assert!(matches!(error, ResolveError::UpstreamFailed { ref node, .. } if node == "A"));
}

#[test]
fn illegal_field_is_rejected_before_any_resolution() {
    let workflow = workflow_with(Fanout::Single);
    let error = workflow.lzout("A").expect("lzout").field("out3").expect_err("undeclared");
    assert!(matches!(error, ContractViolation::UnknownField { ref field, .. } if field == "out3"));

    let unbound = workflow.lzout("A").expect("lzout");
    assert!(matches!(
        resolve(&unbound, &workflow, None, &impatient()),
        Err(ResolveError::Contract(ContractViolation::UnboundField { .. }))
    ));
}

#[test]
fn empty_split_resolves_to_empty_list() {
    let workflow = workflow_with(Fanout::Split(0));
    let value = resolve(&out1(&workflow), &workflow, None, &impatient()).expect("resolve");
    assert_eq!(value, Value::List(Vec::new()));
}

#[test]
fn input_references_read_current_values_immediately() {
    let workflow = workflow_with(Fanout::Single);
    workflow.set_node_input("A", "a", 5).expect("set");
    workflow.set_input("x", 9).expect("set");

    let node_input = workflow.lzin("A").expect("lzin").field("a").expect("field");
    let own_input = workflow.lzin("wf").expect("lzin").field("x").expect("field");
    assert_eq!(resolve(&node_input, &workflow, None, &impatient()).expect("resolve"), Value::Int(5));
    assert_eq!(resolve(&own_input, &workflow, None, &impatient()).expect("resolve"), Value::Int(9));
}

fn increment(inputs: &IndexMap<String, Value>) -> anyhow::Result<RunOutput> {
    let a = inputs["a"].as_int().unwrap_or_default();
    Ok(indexmap! { "out1".to_string() => Value::Int(a + 1) }.into())
}

#[test]
fn split_tasks_feed_split_consumers_element_by_element() {
    let workflow = workflow_with(Fanout::Split(3));
    workflow
        .add_node(
            "B",
            SpecInfo::new("BInputs", vec![FieldDef::new("a", FieldType::Int)]).expect("inputs"),
            a_outputs(),
            Fanout::Split(3),
        )
        .expect("add node");
    let store = Arc::new(MemoryStore::new());
    let upstream = out1(&workflow);

    let results = thread::scope(|scope| {
        let consumers = (0..3)
            .map(|index| {
                let mut task = Task::new("B", "FunctionTask", a_inputs(), a_outputs(), store.clone());
                task.set_input("a", upstream.clone()).expect("lazy input");
                let workflow = &workflow;
                scope.spawn(move || task.run_in_workflow(workflow, ResultIndex::Flat(index), &increment, &patient()))
            })
            .collect::<Vec<_>>();

        for index in 0..3 {
            let mut task = Task::new("A", "FunctionTask", a_inputs(), a_outputs(), store.clone());
            task.set_input("a", Value::Int(index as i64 * 10)).expect("input");
            task.run_in_workflow(&workflow, ResultIndex::Flat(index), &increment, &patient())
                .expect("upstream run");
        }

        consumers
            .into_iter()
            .map(|handle| handle.join().expect("consumer thread").expect("consumer run"))
            .collect::<Vec<_>>()
    });

    let values = results.iter().map(|record| record.get("out1").cloned()).collect::<Vec<_>>();
    assert_eq!(values, vec![Some(Value::Int(2)), Some(Value::Int(12)), Some(Value::Int(22))]);
    assert_eq!(
        resolve(&workflow.lzout("B").expect("lzout").field("out1").expect("field"), &workflow, None, &impatient()).expect("resolve"),
        Value::from(vec![2, 12, 22])
    );
    assert!(workflow.checksum().is_ok());
}

#[tokio::test]
async fn async_resolution_waits_for_a_concurrent_publisher() {
    let workflow = workflow_with(Fanout::Split(2));
    let lazy = out1(&workflow);
    let policy = patient();

    let publisher = async {
        workflow.publish_result("A", ResultIndex::Flat(0), record(7)).expect("publish");
        tokio::time::sleep(Duration::from_millis(20)).await;
        workflow.publish_result("A", ResultIndex::Flat(1), record(8)).expect("publish");
    };
    let (_, value) = tokio::join!(publisher, resolve_async(&lazy, &workflow, None, &policy));

    assert_eq!(value.expect("resolve"), Value::from(vec![7, 8]));
}

#[tokio::test]
async fn async_task_run_resolves_lazy_inputs() {
    let workflow = workflow_with(Fanout::Single);
    workflow
        .add_node("B", a_inputs(), a_outputs(), Fanout::Single)
        .expect("add node");
    let store = Arc::new(MemoryStore::new());
    let mut consumer = Task::new("B", "FunctionTask", a_inputs(), a_outputs(), store.clone());
    consumer.set_input("a", out1(&workflow)).expect("lazy input");
    let policy = patient();

    let producer = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut task = Task::new("A", "FunctionTask", a_inputs(), a_outputs(), store.clone());
        task.set_input("a", Value::Int(1)).expect("input");
        task.run_in_workflow(&workflow, ResultIndex::Single, &increment, &policy)
            .expect("producer run")
    };
    let (produced, consumed) = tokio::join!(
        producer,
        consumer.run_in_workflow_async(&workflow, ResultIndex::Single, &increment, &policy)
    );

    assert_eq!(produced.get("out1"), Some(&Value::Int(2)));
    assert_eq!(consumed.expect("consumer run").get("out1"), Some(&Value::Int(3)));
    assert!(consumer.inputs().is_resolved());
}

#[test]
fn wrong_output_type_fails_downstream_without_waiting() {
    let workflow = workflow_with(Fanout::Single);
    let store = Arc::new(MemoryStore::new());
    let mut task = Task::new("A", "FunctionTask", a_inputs(), a_outputs(), store.clone());
    task.set_input("a", Value::Int(1)).expect("input");

    let mistyped = |_: &IndexMap<String, Value>| -> anyhow::Result<RunOutput> {
        Ok(indexmap! { "out1".to_string() => Value::from("not an int") }.into())
    };
    let error = task
        .run_in_workflow(&workflow, ResultIndex::Single, &mistyped, &impatient())
        .expect_err("output type mismatch");
    assert!(matches!(error, EngineError::Contract(ContractViolation::OutputType { .. })), "{error}");

    let downstream = resolve(&out1(&workflow), &workflow, None, &impatient()).expect_err("upstream failed");
    assert_eq!(
        downstream,
        ResolveError::UpstreamFailed {
            node: "A".into(),
            field: "out1".into(),
        }
    );
    assert!(task.result().expect("result").expect("errored record").errored());
    assert!(!task.run(&increment).expect("rerun").errored());
}

#[test]
fn failed_upstream_propagates_through_a_chain() {
    let workflow = workflow_with(Fanout::Single);
    workflow.add_node("B", a_inputs(), a_outputs(), Fanout::Single).expect("add node");
    workflow.publish_result("A", ResultIndex::Single, ResultRecord::failure(None)).expect("publish");

    let mut consumer = Task::new("B", "FunctionTask", a_inputs(), a_outputs(), Arc::new(MemoryStore::new()));
    consumer.set_input("a", out1(&workflow)).expect("lazy input");
    let error = consumer
        .run_in_workflow(&workflow, ResultIndex::Single, &increment, &impatient())
        .expect_err("upstream failed");
    assert!(matches!(error, EngineError::Resolve(ResolveError::UpstreamFailed { .. })), "{error}");

    let next = workflow.lzout("B").expect("lzout").field("out1").expect("field");
    assert!(matches!(
        resolve(&next, &workflow, None, &impatient()),
        Err(ResolveError::UpstreamFailed { ref node, .. }) if node == "B"
    ));
}
