//! Lazy field resolution against a workflow graph.
//!
//! Input-mode references read the upstream node's current input value and return at once.
//! Output-mode references poll the upstream node's published result until it is ready:
//!
//! - a single result is ready when it is present and holds a non-`None` value for the
//!   requested field
//! - a split result is ready only when every element is ready; the value is the ordered
//!   list of element values
//! - a nested split applies the same rule across both levels and yields a list of lists
//!
//! A result flagged as errored is never ready and fails the resolution immediately with
//! [`ResolveError::UpstreamFailed`]. Otherwise polling continues under a [`RetryPolicy`]:
//! every poll counts as one attempt, polls after the first `backoff_after` attempts sleep
//! for `interval` first, and at most `max_attempts` polls run before the resolution ends
//! in [`ResolveError::Unresolvable`].

use std::{sync::Arc, thread, time::Duration};

use flowcache_types::Value;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    error::ResolveError,
    graph::{NodeResult, StateIndex, WorkflowGraph},
    lazy::LazyField,
    record::ResultRecord,
};

/// Default ceiling on resolution attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;
/// Attempts allowed before each retry starts sleeping.
pub const DEFAULT_BACKOFF_AFTER: u32 = 16;
/// Default pause between attempts once backoff starts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Bounds on how long output-mode resolution keeps polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_after")]
    pub backoff_after: u32,
    #[serde(default = "default_interval", rename = "interval_ms", with = "duration_millis")]
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_after: DEFAULT_BACKOFF_AFTER,
            interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_after() -> u32 {
    DEFAULT_BACKOFF_AFTER
}

fn default_interval() -> Duration {
    DEFAULT_RETRY_INTERVAL
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Outcome of a single poll.
#[derive(Debug, Clone, PartialEq)]
pub enum Readiness {
    Ready(Value),
    Pending,
}

/// What the retry loop should do next.
enum Step {
    Retry { wait: Option<Duration> },
    GiveUp { attempts: u32 },
}

/// Attempt bookkeeping shared by the blocking and async loops.
struct Attempts<'a> {
    policy: &'a RetryPolicy,
    count: u32,
}

impl<'a> Attempts<'a> {
    fn new(policy: &'a RetryPolicy) -> Self {
        Self { policy, count: 0 }
    }

    /// Record one unsuccessful poll and decide whether to poll again.
    fn next(&mut self) -> Step {
        self.count += 1;
        if self.count >= self.policy.max_attempts {
            return Step::GiveUp { attempts: self.count };
        }
        Step::Retry {
            wait: (self.count > self.policy.backoff_after).then_some(self.policy.interval),
        }
    }
}

/// Poll the upstream node once without waiting.
pub fn poll_once<G>(lazy: &LazyField, graph: &G, state_index: Option<StateIndex>) -> Result<Readiness, ResolveError>
where
    G: WorkflowGraph + ?Sized,
{
    let field = lazy.bound_field()?;
    if let LazyField::Input(_) = lazy {
        return Ok(Readiness::Ready(graph.input_value(lazy.node(), field)?));
    }

    let readiness = match graph.result(lazy.node(), state_index)? {
        NodeResult::Pending => Readiness::Pending,
        NodeResult::Single(record) => match field_value(&record, lazy.node(), field)? {
            Some(value) => Readiness::Ready(value),
            None => Readiness::Pending,
        },
        NodeResult::Split(elements) => match collect_row(&elements, lazy.node(), field)? {
            Some(values) => Readiness::Ready(Value::List(values)),
            None => Readiness::Pending,
        },
        NodeResult::NestedSplit(rows) => {
            let mut nested = Vec::with_capacity(rows.len());
            let mut ready = true;
            for row in &rows {
                match collect_row(row, lazy.node(), field)? {
                    Some(values) => nested.push(Value::List(values)),
                    None => ready = false,
                }
            }
            if ready { Readiness::Ready(Value::List(nested)) } else { Readiness::Pending }
        }
    };
    Ok(readiness)
}

/// Resolve `lazy` to a concrete value, blocking the current thread between attempts.
pub fn resolve<G>(lazy: &LazyField, graph: &G, state_index: Option<StateIndex>, policy: &RetryPolicy) -> Result<Value, ResolveError>
where
    G: WorkflowGraph + ?Sized,
{
    let field = lazy.bound_field()?;
    let mut attempts = Attempts::new(policy);
    loop {
        if let Readiness::Ready(value) = poll_once(lazy, graph, state_index)? {
            if attempts.count > 0 {
                info!(node = %lazy.node(), field = %field, attempts = attempts.count, "upstream result became ready");
            }
            return Ok(value);
        }
        match attempts.next() {
            Step::Retry { wait } => {
                debug!(node = %lazy.node(), field = %field, attempt = attempts.count, "upstream result not ready");
                if let Some(wait) = wait {
                    thread::sleep(wait);
                }
            }
            Step::GiveUp { attempts } => return Err(give_up(lazy, field, attempts)),
        }
    }
}

/// Async counterpart of [`resolve`]; waits with `tokio::time::sleep` instead of blocking.
pub async fn resolve_async<G>(
    lazy: &LazyField,
    graph: &G,
    state_index: Option<StateIndex>,
    policy: &RetryPolicy,
) -> Result<Value, ResolveError>
where
    G: WorkflowGraph + ?Sized,
{
    let field = lazy.bound_field()?;
    let mut attempts = Attempts::new(policy);
    loop {
        if let Readiness::Ready(value) = poll_once(lazy, graph, state_index)? {
            if attempts.count > 0 {
                info!(node = %lazy.node(), field = %field, attempts = attempts.count, "upstream result became ready");
            }
            return Ok(value);
        }
        match attempts.next() {
            Step::Retry { wait } => {
                debug!(node = %lazy.node(), field = %field, attempt = attempts.count, "upstream result not ready");
                match wait {
                    Some(wait) => tokio::time::sleep(wait).await,
                    None => tokio::task::yield_now().await,
                }
            }
            Step::GiveUp { attempts } => return Err(give_up(lazy, field, attempts)),
        }
    }
}

fn give_up(lazy: &LazyField, field: &str, attempts: u32) -> ResolveError {
    warn!(node = %lazy.node(), field = %field, attempts, "gave up waiting for upstream result");
    ResolveError::Unresolvable {
        node: lazy.node().to_string(),
        field: field.to_string(),
        attempts,
    }
}

fn field_value(record: &ResultRecord, node: &str, field: &str) -> Result<Option<Value>, ResolveError> {
    if record.errored() {
        warn!(node = %node, field = %field, "upstream result is errored");
        return Err(ResolveError::UpstreamFailed {
            node: node.to_string(),
            field: field.to_string(),
        });
    }
    Ok(record.get(field).filter(|value| !value.is_none()).cloned())
}

/// Values of one split row, or `None` while any element is not ready.
fn collect_row(elements: &[Option<Arc<ResultRecord>>], node: &str, field: &str) -> Result<Option<Vec<Value>>, ResolveError> {
    let mut values = Vec::with_capacity(elements.len());
    let mut ready = true;
    for element in elements {
        match element {
            Some(record) => match field_value(record, node, field)? {
                Some(value) => values.push(value),
                None => ready = false,
            },
            None => ready = false,
        }
    }
    Ok(ready.then_some(values))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::ContractViolation;

    fn policy(max_attempts: u32, backoff_after: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_after,
            interval: Duration::from_millis(1),
        }
    }

    #[test]
    fn default_policy_matches_documented_bounds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 20);
        assert_eq!(policy.backoff_after, 16);
        assert_eq!(policy.interval, Duration::from_secs(1));
    }

    #[test]
    fn attempts_sleep_only_past_the_backoff_threshold() {
        let policy = policy(5, 2);
        let mut attempts = Attempts::new(&policy);
        let mut waits = Vec::new();
        loop {
            match attempts.next() {
                Step::Retry { wait } => waits.push(wait.is_some()),
                Step::GiveUp { attempts } => {
                    assert_eq!(attempts, 5);
                    break;
                }
            }
        }
        assert_eq!(waits, vec![false, false, true, true]);
    }

    struct CountingGraph {
        polls: AtomicU32,
    }

    impl WorkflowGraph for CountingGraph {
        fn input_value(&self, node: &str, _field: &str) -> Result<Value, ContractViolation> {
            Err(ContractViolation::UnboundField { node: node.to_string() })
        }

        fn result(&self, _node: &str, _state_index: Option<StateIndex>) -> Result<NodeResult, ContractViolation> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(NodeResult::Pending)
        }
    }

    #[test]
    fn default_ceiling_polls_exactly_max_attempts_times() {
        let graph = CountingGraph { polls: Default::default() };
        let lazy = LazyField::output("A", ["out1"]).field("out1").expect("field");
        let policy = RetryPolicy {
            interval: Duration::ZERO,
            ..RetryPolicy::default()
        };

        let error = resolve(&lazy, &graph, None, &policy).expect_err("never ready");
        assert_eq!(
            error,
            ResolveError::Unresolvable {
                node: "A".into(),
                field: "out1".into(),
                attempts: 20,
            }
        );
        assert_eq!(graph.polls.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn policy_reads_interval_in_milliseconds() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 3, "interval_ms": 250}"#).expect("policy");
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_after, DEFAULT_BACKOFF_AFTER);
        assert_eq!(policy.interval, Duration::from_millis(250));
    }
}
