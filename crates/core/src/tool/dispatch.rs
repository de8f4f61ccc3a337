use std::sync::Arc;
use std::time::Duration;

use storm_agent_model::{ToolCallRequest, ToolCallResult};
use tokio::select;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{Error, ToolOutcome, ToolRegistry, validate_arguments};

/// Options for [`dispatch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Time limit of each tool call, measured independently.
    pub timeout: Option<Duration>,
    /// Whether calls in a batch run concurrently. When `false`, calls run
    /// one after another in the order the model requested them.
    pub parallel: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(60)),
            parallel: true,
        }
    }
}

enum Prepared {
    Ready(ToolCallResult),
    Spawned(JoinHandle<ToolOutcome>),
}

/// Executes a batch of tool calls requested by one model response.
///
/// Exactly one result is returned for every call, in call order, whatever
/// happens to the individual tools:
///
/// - an unknown tool name or arguments that don't fit the tool's schema
///   produce a failed result without running anything;
/// - a tool that fails, panics or exceeds its timeout produces a failed
///   result without affecting the other calls;
/// - when `cancel` fires, calls that already finished keep their results
///   and the rest are aborted and reported as cancelled.
pub async fn dispatch(
    registry: &ToolRegistry,
    calls: &[ToolCallRequest],
    options: &DispatchOptions,
    cancel: &CancellationToken,
) -> Vec<ToolCallResult> {
    let span = debug_span!("tool dispatch", calls = calls.len());
    async move {
        let mut results = Vec::with_capacity(calls.len());
        if options.parallel {
            // Fan out everything first, then collect in call order.
            let prepared: Vec<_> = calls
                .iter()
                .map(|call| prepare(registry, call, options.timeout, cancel))
                .collect();
            for (call, prepared) in calls.iter().zip(prepared) {
                results.push(finish(call, prepared, cancel).await);
            }
        } else {
            for call in calls {
                let prepared = prepare(registry, call, options.timeout, cancel);
                results.push(finish(call, prepared, cancel).await);
            }
        }
        results
    }
    .instrument(span)
    .await
}

fn prepare(
    registry: &ToolRegistry,
    call: &ToolCallRequest,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Prepared {
    if cancel.is_cancelled() {
        return Prepared::Ready(into_result(&call.id, Err(Error::cancelled())));
    }

    let Some(tool) = registry.get(&call.name) else {
        warn!("tool not found: {}", call.name);
        let err = Error::not_found()
            .with_reason(format!("no tool named `{}` is available", call.name));
        return Prepared::Ready(into_result(&call.id, Err(err)));
    };

    if let Err(err) = validate_arguments(tool.parameter_schema(), &call.arguments)
    {
        debug!("rejected arguments of {} ({}): {err}", call.name, call.id);
        return Prepared::Ready(into_result(&call.id, Err(err)));
    }

    trace!(
        "spawning a tool {} ({}) with args: {:?}",
        call.name, call.id, call.arguments
    );
    let tool = Arc::clone(tool);
    let arguments = call.arguments.clone();
    let handle = tokio::spawn(async move {
        // `execute` itself may panic before handing out a future.
        let fut = tool.execute(arguments);
        let Some(timeout) = timeout else {
            return fut.await;
        };
        match tokio::time::timeout(timeout, fut).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::timeout()
                .with_reason(format!("no result after {timeout:?}"))),
        }
    });
    Prepared::Spawned(handle)
}

async fn finish(
    call: &ToolCallRequest,
    prepared: Prepared,
    cancel: &CancellationToken,
) -> ToolCallResult {
    let mut handle = match prepared {
        Prepared::Ready(result) => return result,
        Prepared::Spawned(handle) => handle,
    };

    let outcome = select! {
        biased;

        joined = &mut handle => match joined {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => {
                error!("tool {} ({}) panicked", call.name, call.id);
                Err(Error::execution_error().with_reason("the tool panicked"))
            }
            Err(_) => Err(Error::cancelled()),
        },
        _ = cancel.cancelled() => {
            handle.abort();
            Err(Error::cancelled())
        }
    };

    match &outcome {
        Ok(_) => debug!("tool {} ({}) succeeded", call.name, call.id),
        Err(err) => debug!("tool {} ({}) failed: {err}", call.name, call.id),
    }
    into_result(&call.id, outcome)
}

#[inline]
fn into_result(id: &str, outcome: ToolOutcome) -> ToolCallResult {
    match outcome {
        Ok(content) => ToolCallResult::success(id, content),
        Err(err) => ToolCallResult::failure(id, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::Deserialize;
    use serde_json::{Value, json};

    use super::*;
    use crate::tool::Tool;

    #[derive(Deserialize)]
    struct SleepInput {
        millis: u64,
        #[serde(default)]
        fail: bool,
        #[serde(default)]
        panic: bool,
    }

    /// Sleeps for the given time and then echoes it back.
    struct SleepTool {
        schema: Value,
        finished: Arc<AtomicUsize>,
    }

    impl SleepTool {
        fn new() -> Self {
            Self {
                schema: json!({
                    "type": "object",
                    "properties": { "millis": { "type": "integer" } },
                    "required": ["millis"]
                }),
                finished: Default::default(),
            }
        }
    }

    impl Tool for SleepTool {
        type Input = SleepInput;

        fn name(&self) -> &str {
            "sleep"
        }

        fn description(&self) -> &str {
            "Sleeps for a while"
        }

        fn parameter_schema(&self) -> &Value {
            &self.schema
        }

        #[allow(clippy::manual_async_fn)]
        fn execute(
            &self,
            input: SleepInput,
        ) -> impl Future<Output = ToolOutcome> + Send + 'static {
            let finished = Arc::clone(&self.finished);
            async move {
                tokio::time::sleep(Duration::from_millis(input.millis)).await;
                if input.panic {
                    panic!("boom");
                }
                finished.fetch_add(1, Ordering::SeqCst);
                if input.fail {
                    return Err(Error::execution_error().with_reason("failed"));
                }
                Ok(format!("slept {}ms", input.millis))
            }
        }
    }

    static NO_SCHEMA: Value = Value::Null;

    /// Panics as soon as it's asked to run.
    struct EagerPanicTool;

    impl Tool for EagerPanicTool {
        type Input = Value;

        fn name(&self) -> &str {
            "eager_panic"
        }

        fn description(&self) -> &str {
            "Panics before doing anything"
        }

        fn parameter_schema(&self) -> &Value {
            &NO_SCHEMA
        }

        #[allow(unreachable_code)]
        fn execute(
            &self,
            _input: Value,
        ) -> impl Future<Output = ToolOutcome> + Send + 'static {
            panic!("not ready");
            std::future::ready(Ok(String::new()))
        }
    }

    fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_owned(),
            name: name.to_owned(),
            arguments,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_follow_call_order() {
        let mut registry = ToolRegistry::new();
        registry.register(SleepTool::new());

        let calls = vec![
            call("a", "sleep", json!({ "millis": 30 })),
            call("b", "sleep", json!({ "millis": 10 })),
            call("c", "sleep", json!({ "millis": 20 })),
        ];
        let started = tokio::time::Instant::now();
        let results = dispatch(
            &registry,
            &calls,
            &DispatchOptions::default(),
            &CancellationToken::new(),
        )
        .await;

        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(results[0].content, "slept 30ms");
        assert!(results.iter().all(|r| !r.is_error));
        // Concurrent execution takes as long as the slowest call.
        assert!(started.elapsed() < Duration::from_millis(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_isolated() {
        let mut registry = ToolRegistry::new();
        let tool = SleepTool::new();
        let finished = Arc::clone(&tool.finished);
        registry.register(tool);

        let calls = vec![
            call("ok", "sleep", json!({ "millis": 5 })),
            call("fail", "sleep", json!({ "millis": 1, "fail": true })),
            call("panic", "sleep", json!({ "millis": 1, "panic": true })),
            call("unknown", "dig", json!({})),
            call("invalid", "sleep", json!({ "millis": "soon" })),
            call("late", "sleep", json!({ "millis": 10 })),
        ];
        let results = dispatch(
            &registry,
            &calls,
            &DispatchOptions::default(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(results.len(), calls.len());
        for (result, call) in results.iter().zip(&calls) {
            assert_eq!(result.id, call.id);
        }
        assert!(!results[0].is_error);
        assert!(results[1].is_error);
        assert!(results[2].content.contains("panicked"));
        assert!(results[3].is_error);
        assert!(results[3].content.contains("dig"));
        assert!(results[4].is_error);
        assert!(results[4].content.starts_with("Invalid input"));
        assert_eq!(results[5].content, "slept 10ms");
        // ok, fail and late ran to completion.
        assert_eq!(finished.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_while_starting_is_isolated() {
        let mut registry = ToolRegistry::new();
        registry.register(SleepTool::new());
        registry.register(EagerPanicTool);

        for parallel in [true, false] {
            let options = DispatchOptions {
                timeout: None,
                parallel,
            };
            let calls = vec![
                call("before", "sleep", json!({ "millis": 5 })),
                call("boom", "eager_panic", json!({})),
                call("after", "sleep", json!({ "millis": 5 })),
            ];
            let results =
                dispatch(&registry, &calls, &options, &CancellationToken::new())
                    .await;
            assert_eq!(results.len(), 3);
            assert_eq!(results[0].content, "slept 5ms");
            assert_eq!(results[1].id, "boom");
            assert!(results[1].is_error);
            assert!(results[1].content.contains("panicked"));
            assert_eq!(results[2].content, "slept 5ms");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let mut registry = ToolRegistry::new();
        registry.register(SleepTool::new());

        let options = DispatchOptions {
            timeout: Some(Duration::from_millis(50)),
            parallel: true,
        };
        let calls = vec![
            call("slow", "sleep", json!({ "millis": 1000 })),
            call("fast", "sleep", json!({ "millis": 10 })),
        ];
        let results =
            dispatch(&registry, &calls, &options, &CancellationToken::new())
                .await;
        assert!(results[0].is_error);
        assert!(results[0].content.starts_with("Timed out"));
        assert!(!results[1].is_error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_answers_every_call() {
        let mut registry = ToolRegistry::new();
        registry.register(SleepTool::new());

        let cancel = CancellationToken::new();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            }
        });

        let calls = vec![
            call("fast", "sleep", json!({ "millis": 5 })),
            call("slow", "sleep", json!({ "millis": 1000 })),
        ];
        let results =
            dispatch(&registry, &calls, &DispatchOptions::default(), &cancel)
                .await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "slept 5ms");
        assert!(results[1].is_error);
        assert_eq!(results[1].content, "Cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential() {
        let mut registry = ToolRegistry::new();
        registry.register(SleepTool::new());

        let options = DispatchOptions {
            timeout: None,
            parallel: false,
        };
        let calls = vec![
            call("a", "sleep", json!({ "millis": 10 })),
            call("b", "sleep", json!({ "millis": 10 })),
        ];
        let started = tokio::time::Instant::now();
        let results =
            dispatch(&registry, &calls, &options, &CancellationToken::new())
                .await;
        assert_eq!(results.len(), 2);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
