use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use storm_agent_model::{ErrorKind, ModelFinishReason, ModelMessage};
use storm_agent_test_model::{PresetEvent, PresetResponse, TestModelProvider};

use crate::conversation::Role;
use crate::tool::{Error as ToolError, Tool, ToolOutcome};
use crate::{
    AgentBuilder, AgentEvent, CancellationToken, Error, IncompleteReason,
    Outcome, RetryPolicy,
};

#[derive(Deserialize)]
struct EchoInput {
    text: String,
}

struct EchoTool {
    schema: Value,
}

impl Default for EchoTool {
    fn default() -> Self {
        Self {
            schema: json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
        }
    }
}

impl Tool for EchoTool {
    type Input = EchoInput;

    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes the text back"
    }

    fn parameter_schema(&self) -> &Value {
        &self.schema
    }

    fn execute(
        &self,
        input: EchoInput,
    ) -> impl Future<Output = ToolOutcome> + Send + 'static {
        std::future::ready(Ok(input.text))
    }
}

static NO_SCHEMA: Value = Value::Null;

/// Fails or sleeps on demand.
struct FlakyTool;

#[derive(Deserialize)]
struct FlakyInput {
    #[serde(default)]
    sleep_secs: u64,
    #[serde(default)]
    fail: bool,
}

impl Tool for FlakyTool {
    type Input = FlakyInput;

    fn name(&self) -> &str {
        "flaky"
    }

    fn description(&self) -> &str {
        "Fails or sleeps on demand"
    }

    fn parameter_schema(&self) -> &Value {
        &NO_SCHEMA
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: FlakyInput,
    ) -> impl Future<Output = ToolOutcome> + Send + 'static {
        async move {
            tokio::time::sleep(Duration::from_secs(input.sleep_secs)).await;
            if input.fail {
                Err(ToolError::execution_error().with_reason("flaked"))
            } else {
                Ok("fine".to_owned())
            }
        }
    }
}

fn roles(agent: &crate::Agent) -> Vec<Role> {
    agent.conversation().turns().iter().map(|t| t.role()).collect()
}

fn collect_events(
    builder: AgentBuilder,
) -> (AgentBuilder, Arc<Mutex<Vec<AgentEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let builder = builder.on_event({
        let events = Arc::clone(&events);
        move |event| events.lock().unwrap().push(event.clone())
    });
    (builder, events)
}

#[tokio::test]
async fn test_simple_message() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        PresetEvent::MessageDelta("po".to_owned()),
        PresetEvent::MessageDelta("ng".to_owned()),
    ]));

    let (builder, events) =
        collect_events(AgentBuilder::with_model_provider(model_provider.clone()));
    let mut agent = builder.build();
    let outcome = agent.run("ping").await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Final {
            text: "pong".to_owned(),
            usage: Default::default(),
            iterations: 1,
        }
    );
    assert_eq!(agent.conversation().len(), 2);
    assert_eq!(roles(&agent), [Role::User, Role::Assistant]);
    assert_eq!(model_provider.request_count(), 1);

    let request = &model_provider.requests()[0];
    assert!(request.tools.is_empty());
    assert!(request.system.as_deref().unwrap().contains("Agent"));

    let deltas: Vec<_> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            AgentEvent::TextDelta(delta) => Some(delta.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, ["po", "ng"]);
}

#[tokio::test]
async fn test_tool_round_trip() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        PresetEvent::tool_call("call_1", "echo", json!({ "text": "hi" })),
    ]));
    model_provider.add_response(PresetResponse::text("The tool said hi."));

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool(EchoTool::default())
        .build();
    let outcome = agent.run("Say hi through the tool").await.unwrap();
    assert!(outcome.is_final());
    assert_eq!(outcome.iterations(), 2);

    assert_eq!(
        roles(&agent),
        [Role::User, Role::Assistant, Role::ToolResult, Role::Assistant]
    );
    let ModelMessage::Tool(result) = agent.conversation().turns()[2].message()
    else {
        panic!("expected a tool result");
    };
    assert_eq!(result.id, "call_1");
    assert_eq!(result.content, "hi");
    assert!(!result.is_error);

    let requests = model_provider.requests();
    assert_eq!(requests[0].tools.len(), 1);
    assert_eq!(requests[1].messages.len(), 3);
}

#[tokio::test]
async fn test_iteration_limit() {
    let mut model_provider = TestModelProvider::default();
    model_provider.repeat(PresetResponse::with_events([PresetEvent::tool_call(
        "call",
        "echo",
        json!({ "text": "again" }),
    )]));

    let (builder, events) = collect_events(
        AgentBuilder::with_model_provider(model_provider.clone())
            .with_tool(EchoTool::default())
            .with_max_iterations(1),
    );
    let mut agent = builder.build();
    let outcome = agent.run("Loop forever").await.unwrap();

    let Outcome::Incomplete {
        reason, iterations, ..
    } = outcome
    else {
        panic!("expected an incomplete outcome");
    };
    assert_eq!(reason, IncompleteReason::IterationLimit);
    assert_eq!(iterations, 1);
    assert_eq!(model_provider.request_count(), 1);
    // The requested call is still answered.
    assert_eq!(roles(&agent), [Role::User, Role::Assistant, Role::ToolResult]);
    assert!(
        events
            .lock()
            .unwrap()
            .contains(&AgentEvent::IterationLimitReached { iterations: 1 })
    );
}

#[tokio::test]
async fn test_unknown_tool() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        PresetEvent::tool_call("call_x", "teleport", json!({})),
    ]));
    model_provider.add_response(PresetResponse::text("I can't do that."));

    let mut agent = AgentBuilder::with_model_provider(model_provider).build();
    let outcome = agent.run("Teleport me").await.unwrap();
    assert_eq!(outcome.text(), "I can't do that.");

    let ModelMessage::Tool(result) = agent.conversation().turns()[2].message()
    else {
        panic!("expected a tool result");
    };
    assert_eq!(result.id, "call_x");
    assert!(result.is_error);
    assert!(result.content.contains("teleport"));
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_isolation() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        PresetEvent::tool_call("a", "flaky", json!({ "sleep_secs": 2 })),
        PresetEvent::tool_call("b", "flaky", json!({ "fail": true })),
        PresetEvent::tool_call("c", "echo", json!({ "text": "c" })),
        PresetEvent::tool_call("d", "echo", json!({ "wrong": "shape" })),
    ]));
    model_provider.add_response(PresetResponse::text("done"));

    let mut agent = AgentBuilder::with_model_provider(model_provider)
        .with_tool(EchoTool::default())
        .with_tool(FlakyTool)
        .build();
    agent.run("Go").await.unwrap();

    let results: Vec<_> = agent
        .conversation()
        .turns()
        .iter()
        .filter_map(|t| match t.message() {
            ModelMessage::Tool(result) => Some(result.clone()),
            _ => None,
        })
        .collect();
    let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["a", "b", "c", "d"]);
    let failed: Vec<_> = results.iter().map(|r| r.is_error).collect();
    assert_eq!(failed, [false, true, false, true]);
    assert_eq!(results[0].content, "fine");
}

#[tokio::test(start_paused = true)]
async fn test_retry_then_success() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::text("ok").with_failures(2));

    let (builder, events) =
        collect_events(AgentBuilder::with_model_provider(model_provider.clone()));
    let mut agent = builder.build();
    let outcome = agent.run("Hello").await.unwrap();
    assert_eq!(outcome.text(), "ok");
    assert_eq!(model_provider.request_count(), 3);

    let retries: Vec<_> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Retrying { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(retries, [1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::text("never").with_failures(0));

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_retry_policy(RetryPolicy {
            max_attempts: 4,
            ..Default::default()
        })
        .build();
    let err = agent.run("Hello").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Model {
            kind: ErrorKind::RateLimitExceeded,
            attempts: 4,
            ..
        }
    ));
    assert!(err.is_transient());
    assert_eq!(model_provider.request_count(), 4);
    // No assistant turn for a failed request.
    assert_eq!(roles(&agent), [Role::User]);
}

#[tokio::test]
async fn test_configuration_error_is_not_retried() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(
        PresetResponse::text("never")
            .with_failures(0)
            .with_failure_kind(ErrorKind::Authentication),
    );

    let mut agent =
        AgentBuilder::with_model_provider(model_provider.clone()).build();
    let err = agent.run("Hello").await.unwrap_err();
    assert!(err.is_configuration());
    assert!(matches!(err, Error::Model { attempts: 1, .. }));
    assert_eq!(model_provider.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_model_timeout() {
    let mut model_provider = TestModelProvider::default();
    model_provider.set_delay(Duration::from_secs(30));
    model_provider.repeat(PresetResponse::text("too late"));

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_model_timeout(Some(Duration::from_secs(5)))
        .with_retry_policy(RetryPolicy {
            max_attempts: 2,
            ..Default::default()
        })
        .build();
    let err = agent.run("Hello").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Model {
            kind: ErrorKind::Timeout,
            attempts: 2,
            ..
        }
    ));
    assert_eq!(model_provider.request_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_answers_pending_calls() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        PresetEvent::tool_call("fast", "echo", json!({ "text": "quick" })),
        PresetEvent::tool_call("slow", "flaky", json!({ "sleep_secs": 60 })),
    ]));
    model_provider.repeat(PresetResponse::text("unreachable"));

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool(EchoTool::default())
        .with_tool(FlakyTool)
        .build();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        }
    });
    let err = agent
        .run_with_cancellation("Start", cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(model_provider.request_count(), 1);

    assert_eq!(
        roles(&agent),
        [
            Role::User,
            Role::Assistant,
            Role::ToolResult,
            Role::ToolResult
        ]
    );
    let ModelMessage::Tool(slow) = agent.conversation().turns()[3].message()
    else {
        panic!("expected a tool result");
    };
    assert_eq!(slow.id, "slow");
    assert!(slow.is_error);
    assert_eq!(slow.content, "Cancelled");

    // The agent is still usable afterwards.
    let outcome = agent.run("Again").await.unwrap();
    assert_eq!(outcome.text(), "unreachable");
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let model_provider = TestModelProvider::default();
    let mut agent =
        AgentBuilder::with_model_provider(model_provider.clone()).build();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = agent.run_with_cancellation("Hi", cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(agent.conversation().is_empty());
    assert_eq!(model_provider.request_count(), 0);
}

#[tokio::test]
async fn test_truncated_response() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(
        PresetResponse::text("Half an ans")
            .with_finish_reason(ModelFinishReason::MaxTokens),
    );

    let mut agent = AgentBuilder::with_model_provider(model_provider).build();
    let outcome = agent.run("Write a novel").await.unwrap();
    assert!(matches!(
        outcome,
        Outcome::Incomplete {
            reason: IncompleteReason::ResponseTruncated,
            ..
        }
    ));
    assert_eq!(outcome.text(), "Half an ans");
}

#[tokio::test]
async fn test_run_token_limit() {
    let mut model_provider = TestModelProvider::default();
    model_provider.repeat(
        PresetResponse::with_events([PresetEvent::tool_call(
            "call",
            "echo",
            json!({ "text": "more" }),
        )])
        .with_usage(800, 400),
    );

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool(EchoTool::default())
        .with_run_token_limit(2000)
        .build();
    let outcome = agent.run("Spend tokens").await.unwrap();
    assert!(matches!(
        outcome,
        Outcome::Incomplete {
            reason: IncompleteReason::TokenLimit,
            iterations: 2,
            ..
        }
    ));
    assert_eq!(outcome.usage().total(), 2400);
}

#[tokio::test]
async fn test_system_prompt() {
    let mut model_provider = TestModelProvider::default();
    model_provider.repeat(PresetResponse::text("ok"));

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_name("Scout")
        .with_description("Finds things.")
        .with_tool(EchoTool::default())
        .build();
    agent.run("Hi").await.unwrap();
    let system = model_provider.requests()[0].system.clone().unwrap();
    assert!(system.starts_with("You are Scout"));
    assert!(system.contains("Finds things."));
    assert!(system.contains("- echo: Echoes the text back"));

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_system_prompt("Be terse.")
        .build();
    agent.run("Hi").await.unwrap();
    let system = model_provider.requests().last().unwrap().system.clone();
    assert_eq!(system.as_deref(), Some("Be terse."));
}

#[tokio::test]
async fn test_summary() {
    let mut model_provider = TestModelProvider::default();
    model_provider.repeat(PresetResponse::text("ok"));

    let mut agent = AgentBuilder::with_model_provider(model_provider)
        .with_name("Scout")
        .with_tool(EchoTool::default())
        .with_tool(FlakyTool)
        .with_max_iterations(4)
        .build();
    agent.run("Hi").await.unwrap();

    let summary = agent.summary();
    assert_eq!(summary.name, "Scout");
    assert_eq!(summary.tools, ["echo", "flaky"]);
    assert_eq!(summary.turns, 2);
    assert!(summary.estimated_tokens > 0);

    let value = serde_json::to_value(&summary).unwrap();
    assert_eq!(value["config"]["max_iterations"], 4);
    assert_eq!(value["config"]["parallel_tools"], true);

    agent.clear_history();
    assert_eq!(agent.summary().turns, 0);
}
