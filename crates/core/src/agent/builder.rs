use std::sync::Arc;
use std::time::Duration;

use storm_agent_model::ModelProvider;

use super::{Agent, AgentConfig, AgentEvent, EventHandler, RetryPolicy};
use crate::mcp::{Connector, McpServerConfig, StdioConnector};
use crate::model_client::ModelClient;
use crate::tool::{DynTool, Tool, ToolRegistry};

/// [`Agent`] builder.
pub struct AgentBuilder {
    pub(super) model_client: ModelClient,
    pub(super) name: String,
    pub(super) description: String,
    pub(super) system_prompt: Option<String>,
    pub(super) registry: ToolRegistry,
    pub(super) mcp_servers: Vec<McpServerConfig>,
    pub(super) connector: Arc<dyn Connector>,
    pub(super) config: AgentConfig,
    pub(super) on_event: Option<EventHandler>,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            name: "Agent".to_owned(),
            description: "A configurable AI assistant".to_owned(),
            system_prompt: None,
            registry: ToolRegistry::new(),
            mcp_servers: vec![],
            connector: Arc::new(StdioConnector),
            config: AgentConfig::default(),
            on_event: None,
        }
    }

    /// Sets the name of the agent.
    #[inline]
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the description of the agent.
    #[inline]
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the system prompt. Without one, a prompt is generated from the
    /// name, the description and the available tools.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Registers a tool. A tool registered later replaces an earlier one
    /// with the same name.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.registry.register(tool);
        self
    }

    /// Registers a tool object.
    #[inline]
    pub fn with_dyn_tool(mut self, tool: Arc<dyn DynTool>) -> Self {
        self.registry.register_dyn(tool);
        self
    }

    /// Adds an external tool server. It's connected right before the
    /// first run.
    #[inline]
    pub fn with_mcp_server(mut self, config: McpServerConfig) -> Self {
        self.mcp_servers.push(config);
        self
    }

    /// Replaces how external tool servers are connected.
    #[inline]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Sets the maximum number of model requests in one run.
    #[inline]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations.max(1);
        self
    }

    /// Sets the token budget of the conversation history.
    #[inline]
    pub fn with_token_budget(mut self, budget: usize) -> Self {
        self.config.token_budget = budget;
        self
    }

    /// Stops a run once the provider reports `limit` tokens in total.
    #[inline]
    pub fn with_run_token_limit(mut self, limit: u64) -> Self {
        self.config.run_token_limit = Some(limit);
        self
    }

    /// Sets the time limit of each model request.
    #[inline]
    pub fn with_model_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.model_timeout = timeout;
        self
    }

    /// Sets the time limit of each tool call.
    #[inline]
    pub fn with_tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.tool_timeout = timeout;
        self
    }

    /// Sets the time limit for starting each external tool server.
    #[inline]
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets how failed model requests are retried.
    #[inline]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = policy;
        self
    }

    /// Sets whether tool calls of one response run concurrently.
    #[inline]
    pub fn with_parallel_tools(mut self, parallel: bool) -> Self {
        self.config.parallel_tools = parallel;
        self
    }

    /// Attaches a callback that receives progress events.
    #[inline]
    pub fn on_event(
        mut self,
        on_event: impl Fn(&AgentEvent) + Send + Sync + 'static,
    ) -> Self {
        self.on_event = Some(Arc::new(on_event));
        self
    }

    /// Builds the agent.
    #[inline]
    pub fn build(self) -> Agent {
        Agent::from_builder(self)
    }
}
