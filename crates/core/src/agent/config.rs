use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::ExponentialBackoffBuilder;
use serde::Serialize;

use crate::conversation::DEFAULT_TOKEN_BUDGET;

/// How failed model requests are retried.
///
/// Only transient failures (rate limits, overload, timeouts and network
/// errors) are retried. Delays grow exponentially with some jitter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    /// The maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// The delay before the first retry.
    pub initial_interval: Duration,
    /// The upper bound of the delay between two attempts.
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that sends every request exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub(crate) fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            // Attempts are bounded by `max_attempts` instead.
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Limits and execution settings of an agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AgentConfig {
    /// The maximum number of model requests in one run.
    pub max_iterations: usize,
    /// The token budget of the conversation history.
    pub token_budget: usize,
    /// Stop a run once the provider reports this many tokens in total.
    pub run_token_limit: Option<u64>,
    /// Time limit of each model request.
    pub model_timeout: Option<Duration>,
    /// Time limit of each tool call.
    pub tool_timeout: Option<Duration>,
    /// Time limit for starting each external tool server and listing its
    /// tools.
    pub connect_timeout: Option<Duration>,
    /// How failed model requests are retried.
    pub retry_policy: RetryPolicy,
    /// Whether tool calls of one response run concurrently.
    pub parallel_tools: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            token_budget: DEFAULT_TOKEN_BUDGET,
            run_token_limit: None,
            model_timeout: Some(Duration::from_secs(120)),
            tool_timeout: Some(Duration::from_secs(60)),
            connect_timeout: Some(Duration::from_secs(30)),
            retry_policy: RetryPolicy::default(),
            parallel_tools: true,
        }
    }
}
