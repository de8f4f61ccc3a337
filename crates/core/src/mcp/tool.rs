use std::sync::{Arc, Weak};

use serde_json::Value;

use super::{McpSession, ToolInfo};
use crate::tool::{BoxedToolFuture, DynTool, Error as ToolError};

/// A tool provided by an external server.
///
/// The tool only holds a weak link to its session: once the connection
/// is released, calls fail instead of keeping the server alive.
pub struct McpTool {
    name: String,
    description: String,
    schema: Value,
    session: Weak<dyn McpSession>,
}

impl McpTool {
    /// Wraps a tool reported by `session`.
    pub fn new(info: ToolInfo, session: &Arc<dyn McpSession>) -> Self {
        Self {
            description: info.description.unwrap_or_else(|| {
                format!("{} (from {})", info.name, session.server_name())
            }),
            name: info.name,
            schema: info.input_schema,
            session: Arc::downgrade(session),
        }
    }

    /// Returns `true` while the connection that provides this tool is open.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.session.strong_count() > 0
    }
}

impl DynTool for McpTool {
    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    fn description(&self) -> &str {
        &self.description
    }

    #[inline]
    fn parameter_schema(&self) -> &Value {
        &self.schema
    }

    fn execute(&self, arguments: Value) -> BoxedToolFuture {
        let name = self.name.clone();
        let session = self.session.upgrade();
        Box::pin(async move {
            let Some(session) = session else {
                return Err(ToolError::execution_error()
                    .with_reason("connection closed"));
            };
            let output = session
                .call_tool(&name, arguments)
                .await
                .map_err(|err| ToolError::execution_error().with_reason(err.to_string()))?;
            if output.is_error {
                return Err(ToolError::execution_error().with_reason(output.text));
            }
            Ok(output.text)
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::mcp::connector::tests::connect_calculator;

    #[tokio::test]
    async fn test_tool_invalid_after_release() {
        let session: Arc<dyn McpSession> =
            Arc::new(connect_calculator("calc").await);
        let info = session.list_tools().await.unwrap().remove(0);
        let tool = McpTool::new(info, &session);
        assert_eq!(tool.description(), "Adds two numbers");

        let output = tool.execute(json!({ "a": 2, "b": 3 })).await.unwrap();
        assert_eq!(output, "5");
        let err = tool.execute(json!({ "a": "x", "b": 3 })).await.unwrap_err();
        assert_eq!(err.reason(), "not numbers");

        session.close().await;
        drop(session);
        assert!(!tool.is_connected());
        let err = tool.execute(json!({ "a": 2, "b": 3 })).await.unwrap_err();
        assert_eq!(err.reason(), "connection closed");
    }
}
