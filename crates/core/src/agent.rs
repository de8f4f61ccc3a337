mod builder;
mod config;
mod error;
mod event;
mod prompt;
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::Serialize;
use storm_agent_model::{
    AssistantMessage, ErrorKind, ModelFinishReason, ModelMessage, ModelRequest,
    Usage,
};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub use builder::AgentBuilder;
pub use config::{AgentConfig, RetryPolicy};
pub use error::Error;
pub use event::AgentEvent;

use crate::conversation::Conversation;
use crate::mcp::ConnectionManager;
use crate::model_client::{
    ModelClient, ModelClientResponse, ModelError, OnTextDelta,
};
use crate::tool::{DispatchOptions, DynTool, ToolRegistry, dispatch};

type EventHandler = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

/// The result of a run that didn't fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The model produced a final answer.
    Final {
        /// The text of the final answer.
        text: String,
        /// Tokens used by the run.
        usage: Usage,
        /// The number of model requests.
        iterations: usize,
    },
    /// The run stopped before the model produced a final answer.
    Incomplete {
        /// The text of the last model response.
        text: String,
        /// Why the run stopped.
        reason: IncompleteReason,
        /// Tokens used by the run.
        usage: Usage,
        /// The number of model requests.
        iterations: usize,
    },
}

impl Outcome {
    /// Returns the text of the last model response.
    #[inline]
    pub fn text(&self) -> &str {
        match self {
            Outcome::Final { text, .. } | Outcome::Incomplete { text, .. } => {
                text
            }
        }
    }

    /// Returns `true` if the model produced a final answer.
    #[inline]
    pub fn is_final(&self) -> bool {
        matches!(self, Outcome::Final { .. })
    }

    /// Returns the tokens used by the run.
    #[inline]
    pub fn usage(&self) -> Usage {
        match self {
            Outcome::Final { usage, .. } | Outcome::Incomplete { usage, .. } => {
                *usage
            }
        }
    }

    /// Returns the number of model requests in the run.
    #[inline]
    pub fn iterations(&self) -> usize {
        match self {
            Outcome::Final { iterations, .. }
            | Outcome::Incomplete { iterations, .. } => *iterations,
        }
    }
}

/// Why a run stopped without a final answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IncompleteReason {
    /// The iteration ceiling was reached.
    IterationLimit,
    /// The run token limit was reached, or the current exchange no longer
    /// fits the history budget.
    TokenLimit,
    /// The model stopped at its own output limit.
    ResponseTruncated,
}

/// A snapshot of an agent's configuration and state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AgentSummary {
    /// Name of the agent.
    pub name: String,
    /// Description of the agent.
    pub description: String,
    /// Names of the registered tools, sorted.
    pub tools: Vec<String>,
    /// Names of the configured external tool servers.
    pub mcp_servers: Vec<String>,
    /// Limits and execution settings.
    pub config: AgentConfig,
    /// The number of turns in the conversation.
    pub turns: usize,
    /// The estimated token cost of the conversation.
    pub estimated_tokens: usize,
}

/// An agent, which owns a conversation, a tool registry and the
/// connections to external tool servers.
///
/// Running takes `&mut self`, so one agent never advances two iterations
/// at the same time. Use one agent per conversation.
pub struct Agent {
    name: String,
    description: String,
    system_prompt: Option<String>,
    model_client: ModelClient,
    registry: ToolRegistry,
    conversation: Conversation,
    connections: ConnectionManager,
    /// Names of the external tools, each with the tool it replaced.
    connected_tools: Vec<(String, Option<Arc<dyn DynTool>>)>,
    config: AgentConfig,
    on_event: Option<EventHandler>,
}

impl Agent {
    fn from_builder(builder: AgentBuilder) -> Self {
        let AgentBuilder {
            model_client,
            name,
            description,
            system_prompt,
            registry,
            mcp_servers,
            connector,
            config,
            on_event,
        } = builder;

        let mut agent = Self {
            name,
            description,
            system_prompt,
            model_client,
            registry,
            conversation: Conversation::with_budget(config.token_budget),
            connections: ConnectionManager::with_connector(mcp_servers, connector)
                .with_timeout(config.connect_timeout),
            connected_tools: vec![],
            config,
            on_event,
        };
        agent.refresh_system_prompt();
        agent
    }

    /// Returns the name of the agent.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the limits and execution settings.
    #[inline]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Returns the conversation history.
    #[inline]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Returns the tool registry.
    #[inline]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Removes every turn from the conversation.
    #[inline]
    pub fn clear_history(&mut self) {
        self.conversation.clear();
    }

    /// Returns a snapshot of the configuration and state.
    pub fn summary(&self) -> AgentSummary {
        AgentSummary {
            name: self.name.clone(),
            description: self.description.clone(),
            tools: self.registry.names().into_iter().map(Into::into).collect(),
            mcp_servers: self
                .connections
                .configs()
                .iter()
                .map(|c| c.name.clone())
                .collect(),
            config: self.config.clone(),
            turns: self.conversation.len(),
            estimated_tokens: self.conversation.estimated_tokens(),
        }
    }

    /// Runs the agent with a user input until the model produces a final
    /// answer or a limit is reached.
    #[inline]
    pub async fn run<S: Into<String>>(&mut self, input: S) -> Result<Outcome, Error> {
        self.run_with_cancellation(input, CancellationToken::new())
            .await
    }

    /// Same as [`Agent::run`], but stops with [`Error::Cancelled`] once
    /// `cancel` fires.
    ///
    /// A run cancelled while tools are executing still records a result
    /// for every requested call, so the conversation never contains an
    /// unanswered tool call.
    pub async fn run_with_cancellation<S: Into<String>>(
        &mut self,
        input: S,
        cancel: CancellationToken,
    ) -> Result<Outcome, Error> {
        let span = info_span!("agent run", agent = %self.name);
        self.run_inner(input.into(), &cancel).instrument(span).await
    }

    /// Releases the connections to external tool servers and removes their
    /// tools. Tools they had replaced are registered again. Calling this
    /// more than once is fine. A later run connects again.
    pub async fn shutdown(&mut self) {
        self.connections.cleanup().await;
        if self.connected_tools.is_empty() {
            return;
        }
        // Undo in reverse so the earliest replaced tool ends up on top.
        for (name, replaced) in self.connected_tools.drain(..).rev() {
            self.registry.unregister(&name);
            if let Some(replaced) = replaced {
                self.registry.register_dyn(replaced);
            }
        }
        self.refresh_system_prompt();
    }

    async fn run_inner(
        &mut self,
        input: String,
        cancel: &CancellationToken,
    ) -> Result<Outcome, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        select! {
            biased;

            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = self.ensure_connected() => result?,
        }

        debug!("got user input: {input}");
        self.conversation.push(ModelMessage::user(input));

        let mut usage = Usage::default();
        let mut iterations = 0;
        let mut text = String::new();
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if iterations >= self.config.max_iterations {
                warn!("reached the iteration limit ({iterations})");
                self.emit(AgentEvent::IterationLimitReached { iterations });
                return Ok(Outcome::Incomplete {
                    text,
                    reason: IncompleteReason::IterationLimit,
                    usage,
                    iterations,
                });
            }
            iterations += 1;

            let ModelClientResponse {
                text: response_text,
                tool_calls,
                finish_reason,
                usage: response_usage,
            } = self.query_model(cancel).await?;
            usage += response_usage;
            text = response_text.clone();

            self.conversation.push(ModelMessage::Assistant(AssistantMessage {
                content: response_text,
                tool_calls: tool_calls.clone(),
            }));

            if tool_calls.is_empty() {
                if finish_reason == Some(ModelFinishReason::MaxTokens) {
                    return Ok(Outcome::Incomplete {
                        text,
                        reason: IncompleteReason::ResponseTruncated,
                        usage,
                        iterations,
                    });
                }
                debug!("finished after {iterations} iteration(s)");
                return Ok(Outcome::Final {
                    text,
                    usage,
                    iterations,
                });
            }

            for call in &tool_calls {
                self.emit(AgentEvent::ToolCallStarted {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                });
            }
            let options = DispatchOptions {
                timeout: self.config.tool_timeout,
                parallel: self.config.parallel_tools,
            };
            let results =
                dispatch(&self.registry, &tool_calls, &options, cancel).await;
            for (call, result) in tool_calls.into_iter().zip(results) {
                self.emit(AgentEvent::ToolCallFinished {
                    id: result.id.clone(),
                    name: call.name,
                    content: result.content.clone(),
                    is_error: result.is_error,
                });
                self.conversation.push(ModelMessage::Tool(result));
            }

            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let over_run_limit = self
                .config
                .run_token_limit
                .is_some_and(|limit| usage.total() >= limit);
            if over_run_limit || self.conversation.is_over_budget() {
                warn!("stopping at {} tokens", usage.total());
                return Ok(Outcome::Incomplete {
                    text,
                    reason: IncompleteReason::TokenLimit,
                    usage,
                    iterations,
                });
            }
        }
    }

    async fn ensure_connected(&mut self) -> Result<(), Error> {
        if self.connections.configs().is_empty()
            || self.connections.is_connected()
        {
            return Ok(());
        }

        self.connections.connect().await?;
        for tool in self.connections.tools() {
            let replaced = self.registry.register_dyn(Arc::clone(tool));
            self.connected_tools.push((tool.name().to_owned(), replaced));
        }
        self.refresh_system_prompt();
        Ok(())
    }

    async fn query_model(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ModelClientResponse, Error> {
        let request = ModelRequest {
            system: self.conversation.system_prompt().map(ToOwned::to_owned),
            messages: self.conversation.to_messages(),
            tools: self.registry.definitions(),
        };
        let policy = &self.config.retry_policy;
        let timeout = self.config.model_timeout;
        let on_text_delta = self.text_delta_handler();
        let attempts = AtomicU32::new(0);

        let operation = || {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            let can_retry = attempt < policy.max_attempts;
            let fut = self
                .model_client
                .send_request(request.clone(), Arc::clone(&on_text_delta));
            async move {
                let result = match timeout {
                    Some(timeout) => tokio::time::timeout(timeout, fut)
                        .await
                        .unwrap_or_else(|_| {
                            Err(ModelError {
                                kind: ErrorKind::Timeout,
                                message: format!("no response after {timeout:?}"),
                            })
                        }),
                    None => fut.await,
                };
                result.map_err(|err| {
                    if can_retry && err.kind.is_transient() {
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    }
                })
            }
        };
        let notify = |err: ModelError, delay: Duration| {
            let attempt = attempts.load(Ordering::Relaxed);
            warn!("attempt {attempt} failed, retrying in {delay:?}: {err}");
            self.emit(AgentEvent::Retrying {
                attempt,
                delay,
                reason: err.to_string(),
            });
        };
        let retry =
            backoff::future::retry_notify(policy.backoff(), operation, notify);

        select! {
            biased;

            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = retry => result.map_err(|err| Error::Model {
                kind: err.kind,
                message: err.message,
                attempts: attempts.load(Ordering::Relaxed),
            }),
        }
    }

    fn text_delta_handler(&self) -> OnTextDelta {
        match &self.on_event {
            Some(on_event) => {
                let on_event = Arc::clone(on_event);
                Arc::new(move |delta: &str| {
                    on_event(&AgentEvent::TextDelta(delta.to_owned()))
                })
            }
            None => Arc::new(|_: &str| {}),
        }
    }

    fn refresh_system_prompt(&mut self) {
        let prompt = match &self.system_prompt {
            Some(prompt) => prompt.clone(),
            None => prompt::default_system_prompt(
                &self.name,
                &self.description,
                &self.registry,
            ),
        };
        self.conversation.set_system_prompt(Some(prompt));
    }

    #[inline]
    fn emit(&self, event: AgentEvent) {
        if let Some(on_event) = &self.on_event {
            on_event(&event);
        }
    }
}
