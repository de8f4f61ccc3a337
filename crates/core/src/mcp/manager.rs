use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;

use super::{Connector, Error, McpServerConfig, McpSession, McpTool, StdioConnector};
use crate::tool::DynTool;

/// Owns the connections to a set of external tool servers.
///
/// The lifecycle has two phases. Servers are configured when the manager
/// is created, but nothing is launched until [`connect`] is called, which
/// the agent does right before its first run. [`cleanup`] releases every
/// connection; calling it again is a no-op, and the manager can connect
/// again afterwards.
///
/// Dropping a connected manager without calling [`cleanup`] still
/// terminates the server processes, since child processes are killed
/// when their handles are dropped.
///
/// [`connect`]: ConnectionManager::connect
/// [`cleanup`]: ConnectionManager::cleanup
pub struct ConnectionManager {
    configs: Vec<McpServerConfig>,
    connector: Arc<dyn Connector>,
    sessions: Vec<Arc<dyn McpSession>>,
    tools: Vec<Arc<dyn DynTool>>,
    timeout: Option<Duration>,
    connected: bool,
}

impl ConnectionManager {
    /// Creates a manager that launches the servers as child processes.
    #[inline]
    pub fn new(configs: Vec<McpServerConfig>) -> Self {
        Self::with_connector(configs, Arc::new(StdioConnector))
    }

    /// Creates a manager that opens sessions with a custom connector.
    pub fn with_connector(
        configs: Vec<McpServerConfig>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            configs,
            connector,
            sessions: vec![],
            tools: vec![],
            timeout: None,
            connected: false,
        }
    }

    /// Limits how long each server may take to start, finish the handshake
    /// and list its tools.
    #[inline]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the configured servers.
    #[inline]
    pub fn configs(&self) -> &[McpServerConfig] {
        &self.configs
    }

    /// Returns `true` if the servers have been connected and not released
    /// yet.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Returns the tools discovered by the last [`connect`](Self::connect).
    #[inline]
    pub fn tools(&self) -> &[Arc<dyn DynTool>] {
        &self.tools
    }

    /// Connects to every configured server and discovers their tools.
    ///
    /// Does nothing if already connected. If any server fails, the
    /// sessions opened so far are closed and the error is returned.
    pub async fn connect(&mut self) -> Result<(), Error> {
        if self.connected {
            return Ok(());
        }
        if !self.sessions.is_empty() {
            // Left over from a connect that was interrupted.
            self.release().await;
        }

        let mut failure = None;
        for config in &self.configs {
            match self.open(config).await {
                Ok((session, tools)) => {
                    info!(
                        "connected to tool server {} ({} tools)",
                        config.name,
                        tools.len()
                    );
                    self.sessions.push(session);
                    self.tools.extend(tools);
                }
                Err(err) => {
                    error!("failed to connect to {}: {err}", config.name);
                    failure = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = failure {
            self.release().await;
            return Err(err);
        }

        self.connected = true;
        Ok(())
    }

    async fn open(
        &self,
        config: &McpServerConfig,
    ) -> Result<(Arc<dyn McpSession>, Vec<Arc<dyn DynTool>>), Error> {
        let Some(timeout) = self.timeout else {
            return self.open_session(config).await;
        };
        tokio::time::timeout(timeout, self.open_session(config))
            .await
            .unwrap_or_else(|_| {
                Err(Error::Timeout {
                    server: config.name.clone(),
                    timeout,
                })
            })
    }

    async fn open_session(
        &self,
        config: &McpServerConfig,
    ) -> Result<(Arc<dyn McpSession>, Vec<Arc<dyn DynTool>>), Error> {
        let session = self.connector.connect(config).await?;
        let infos = match session.list_tools().await {
            Ok(infos) => infos,
            Err(err) => {
                session.close().await;
                return Err(err);
            }
        };
        let tools = infos
            .into_iter()
            .map(|info| Arc::new(McpTool::new(info, &session)) as Arc<dyn DynTool>)
            .collect();
        Ok((session, tools))
    }

    /// Releases every connection exactly once. Calling this again, or on
    /// a manager that never connected, does nothing.
    pub async fn cleanup(&mut self) {
        if self.sessions.is_empty() && !self.connected {
            trace!("nothing to clean up");
            return;
        }
        self.release().await;
        info!("released all tool server connections");
    }

    async fn release(&mut self) {
        self.tools.clear();
        for session in self.sessions.drain(..) {
            debug!("closing {}", session.server_name());
            session.close().await;
        }
        self.connected = false;
    }

    /// Connects, runs `f` with the discovered tools, and releases the
    /// connections afterwards, whether `f` succeeded or not.
    ///
    /// If the returned future is dropped before completion, the server
    /// processes are still terminated when the manager is dropped.
    pub async fn scoped<F, Fut, T>(&mut self, f: F) -> Result<T, Error>
    where
        F: FnOnce(Vec<Arc<dyn DynTool>>) -> Fut,
        Fut: Future<Output = T>,
    {
        self.connect().await?;
        let output = f(self.tools.clone()).await;
        self.cleanup().await;
        Ok(output)
    }
}

impl Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("configs", &self.configs)
            .field("connected", &self.connected)
            .field("tools", &self.tools.len())
            .finish_non_exhaustive()
    }
}
