use storm_agent_core::mcp::McpServerConfig;
use storm_agent_core::{
    Agent, AgentBuilder, AgentEvent, AgentSummary, CancellationToken, Error,
    Outcome,
};
use storm_agent_model::ModelProvider;

use crate::tools::*;

const DEFAULT_NAME: &str = "Storm";
const DEFAULT_DESCRIPTION: &str = "A research assistant that searches the web \
    and reads pages to answer questions with current, cited information.";

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    agent_builder: AgentBuilder,
    web_tools: bool,
    brave_api_key: Option<String>,
    firecrawl_api_key: Option<String>,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(
        provider: M,
    ) -> Self {
        let agent_builder = AgentBuilder::with_model_provider(provider)
            .with_name(DEFAULT_NAME)
            .with_description(DEFAULT_DESCRIPTION);
        Self {
            agent_builder,
            web_tools: true,
            brave_api_key: None,
            firecrawl_api_key: None,
        }
    }

    /// Customizes the underlying agent, for settings the session builder
    /// does not cover.
    #[inline]
    pub fn configure_agent(
        mut self,
        f: impl FnOnce(AgentBuilder) -> AgentBuilder,
    ) -> Self {
        self.agent_builder = f(self.agent_builder);
        self
    }

    /// Sets the system prompt for the agent.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.agent_builder = self.agent_builder.with_system_prompt(prompt);
        self
    }

    /// Sets the Brave Search API key used by the `web_search` tool.
    #[inline]
    pub fn with_brave_api_key<S: Into<String>>(mut self, api_key: S) -> Self {
        self.brave_api_key = Some(api_key.into());
        self
    }

    /// Sets the Firecrawl API key used by the `extract_content` tool.
    #[inline]
    pub fn with_firecrawl_api_key<S: Into<String>>(
        mut self,
        api_key: S,
    ) -> Self {
        self.firecrawl_api_key = Some(api_key.into());
        self
    }

    /// Enables or disables the built-in web tools. They are enabled by
    /// default, but each one is only added when its API key is set.
    #[inline]
    pub fn with_web_tools(mut self, enabled: bool) -> Self {
        self.web_tools = enabled;
        self
    }

    /// Adds external tool servers.
    #[inline]
    pub fn with_mcp_servers(
        mut self,
        servers: impl IntoIterator<Item = McpServerConfig>,
    ) -> Self {
        for server in servers {
            self.agent_builder = self.agent_builder.with_mcp_server(server);
        }
        self
    }

    /// Attaches a callback that receives the agent's progress events.
    #[inline]
    pub fn on_event(
        mut self,
        on_event: impl Fn(&AgentEvent) + Send + Sync + 'static,
    ) -> Self {
        self.agent_builder = self.agent_builder.on_event(on_event);
        self
    }

    /// Builds a new session.
    pub fn build(self) -> Session {
        let mut agent_builder = self.agent_builder;
        if self.web_tools {
            match self.brave_api_key {
                Some(api_key) => {
                    agent_builder =
                        agent_builder.with_tool(WebSearchTool::new(api_key));
                }
                None => warn!("no Brave Search API key, `web_search` is disabled"),
            }
            match self.firecrawl_api_key {
                Some(api_key) => {
                    agent_builder = agent_builder
                        .with_tool(ExtractContentTool::new(api_key));
                }
                None => warn!("no Firecrawl API key, `extract_content` is disabled"),
            }
        }

        Session {
            agent: agent_builder.build(),
        }
    }
}

/// A chat session, like a window that displays messages and has an input
/// box.
///
/// The session holds a fully configured agent that you can use directly, and
/// it is basically a wrapper around [`Agent`].
pub struct Session {
    agent: Agent,
}

impl Session {
    /// Sends a message to the session and waits for the agent to finish.
    #[inline]
    pub async fn send_message(
        &mut self,
        message: &str,
        cancel: CancellationToken,
    ) -> Result<Outcome, Error> {
        self.agent.run_with_cancellation(message, cancel).await
    }

    /// Forgets the messages exchanged so far.
    #[inline]
    pub fn clear_history(&mut self) {
        self.agent.clear_history();
    }

    /// Describes the agent behind this session.
    #[inline]
    pub fn summary(&self) -> AgentSummary {
        self.agent.summary()
    }

    /// Returns the agent behind this session.
    #[inline]
    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Disconnects the external tool servers.
    #[inline]
    pub async fn close(&mut self) {
        self.agent.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use storm_agent_test_model::{PresetResponse, TestModelProvider};

    use super::*;

    #[tokio::test]
    async fn test_web_tools_need_keys() {
        let session =
            SessionBuilder::with_model_provider(TestModelProvider::default())
                .with_brave_api_key("brave")
                .build();
        let tools = session.summary().tools;
        assert_eq!(tools, ["web_search"]);

        let session =
            SessionBuilder::with_model_provider(TestModelProvider::default())
                .with_brave_api_key("brave")
                .with_firecrawl_api_key("firecrawl")
                .with_web_tools(false)
                .build();
        assert!(session.summary().tools.is_empty());
    }

    #[tokio::test]
    async fn test_send_message() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_response(PresetResponse::text("Hello there."));
        let mut session =
            SessionBuilder::with_model_provider(model_provider.clone())
                .with_brave_api_key("brave")
                .with_firecrawl_api_key("firecrawl")
                .configure_agent(|agent| agent.with_max_iterations(3))
                .build();

        let outcome = session
            .send_message("Hi", CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.text(), "Hello there.");
        assert_eq!(session.summary().name, "Storm");
        assert_eq!(session.agent().config().max_iterations, 3);

        let request = &model_provider.requests()[0];
        let system = request.system.as_deref().unwrap();
        assert!(system.contains("You are Storm"));
        assert!(system.contains("- web_search:"));
        assert!(system.contains("- extract_content:"));

        session.clear_history();
        assert!(session.agent().conversation().is_empty());
        session.close().await;
    }
}
