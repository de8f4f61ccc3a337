use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::Mutex as AsyncMutex;

use super::rpc::RpcClient;
use super::{Error, McpServerConfig};

const PROTOCOL_VERSION: &str = "2025-06-18";

/// A tool as reported by a server.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ToolInfo {
    /// Name of the tool.
    pub name: String,
    /// Description of the tool.
    #[serde(default)]
    pub description: Option<String>,
    /// The JSON schema of the tool's arguments.
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// The output of a tool call on a server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallToolOutput {
    /// The text content of the result.
    pub text: String,
    /// Whether the server reported the call as failed.
    pub is_error: bool,
}

/// An open connection to a tool server.
#[async_trait]
pub trait McpSession: Send + Sync {
    /// Returns the name of the server.
    fn server_name(&self) -> &str;

    /// Lists the tools provided by the server.
    async fn list_tools(&self) -> Result<Vec<ToolInfo>, Error>;

    /// Calls a tool on the server.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<CallToolOutput, Error>;

    /// Closes the connection. Later calls fail with [`Error::Closed`].
    async fn close(&self);
}

/// Opens sessions to tool servers.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a session to the server described by `config`.
    async fn connect(
        &self,
        config: &McpServerConfig,
    ) -> Result<Arc<dyn McpSession>, Error>;
}

/// Launches servers as child processes and talks to them over their
/// standard input and output.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdioConnector;

#[async_trait]
impl Connector for StdioConnector {
    async fn connect(
        &self,
        config: &McpServerConfig,
    ) -> Result<Arc<dyn McpSession>, Error> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &config.workdir {
            command.current_dir(dir);
        }

        debug!("spawning tool server {}: {}", config.name, config.command);
        let mut child = command.spawn().map_err(|source| Error::Spawn {
            server: config.name.clone(),
            source,
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take())
        else {
            return Err(Error::Transport {
                server: config.name.clone(),
                message: "failed to capture the server's stdio".to_owned(),
            });
        };

        let mut session =
            StreamSession::connect(config.name.clone(), stdout, stdin).await?;
        session.child = AsyncMutex::new(Some(child));
        Ok(Arc::new(session))
    }
}

/// A session over a pair of byte streams.
pub struct StreamSession {
    server: String,
    rpc: RpcClient,
    instructions: Option<String>,
    child: AsyncMutex<Option<Child>>,
}

impl StreamSession {
    /// Performs the protocol handshake over the given streams.
    pub async fn connect<R, W>(
        server: String,
        reader: R,
        writer: W,
    ) -> Result<Self, Error>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let rpc = RpcClient::new(server.clone(), reader, writer);
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {},
        });
        let init = match rpc.request("initialize", params).await {
            Ok(init) => init,
            Err(err) => {
                rpc.close().await;
                return Err(err);
            }
        };
        if let Some(version) = init.get("protocolVersion").and_then(Value::as_str)
        {
            debug!("[{server}] negotiated protocol version {version}");
        }
        rpc.notify("notifications/initialized", json!({})).await?;

        let instructions = init
            .get("instructions")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);
        Ok(Self {
            server,
            rpc,
            instructions,
            child: AsyncMutex::new(None),
        })
    }

    /// Returns the usage instructions sent by the server, if any.
    #[inline]
    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    fn invalid_response(&self, message: impl Into<String>) -> Error {
        Error::InvalidResponse {
            server: self.server.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl McpSession for StreamSession {
    fn server_name(&self) -> &str {
        &self.server
    }

    async fn list_tools(&self) -> Result<Vec<ToolInfo>, Error> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let mut result = self.rpc.request("tools/list", params).await?;
            let page = result
                .get_mut("tools")
                .map(Value::take)
                .ok_or_else(|| self.invalid_response("missing `tools`"))?;
            let page: Vec<ToolInfo> = serde_json::from_value(page)
                .map_err(|err| self.invalid_response(err.to_string()))?;
            tools.extend(page);

            let next = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned);
            if next.is_some() && next == cursor {
                return Err(self.invalid_response("`nextCursor` did not advance"));
            }
            match next {
                Some(next) => cursor = Some(next),
                None => return Ok(tools),
            }
        }
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<CallToolOutput, Error> {
        let arguments = match arguments {
            Value::Null => json!({}),
            other => other,
        };
        let params = json!({ "name": name, "arguments": arguments });
        let result = self.rpc.request("tools/call", params).await?;
        Ok(parse_call_result(&result))
    }

    async fn close(&self) {
        self.rpc.close().await;
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        if let Err(err) = child.kill().await {
            debug!("[{}] failed to kill the server: {err}", self.server);
        }
    }
}

fn parse_call_result(result: &Value) -> CallToolOutput {
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let text = match result.get("content").and_then(Value::as_array) {
        Some(blocks) => blocks
            .iter()
            .map(|block| match block.get("text").and_then(Value::as_str) {
                Some(text) => text.to_owned(),
                None => block.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => result
            .get("structuredContent")
            .unwrap_or(result)
            .to_string(),
    };
    CallToolOutput { text, is_error }
}
