//! Connections to external tool servers speaking the Model Context
//! Protocol over stdio.
//!
//! A [`ConnectionManager`] is configured with a list of servers up front
//! and connects to them on demand. Every tool a server reports is exposed
//! as an [`McpTool`], which implements [`DynTool`](crate::tool::DynTool)
//! and can be registered like any other tool. Tools stop working once the
//! connection that produced them is released.

mod config;
mod connector;
mod error;
mod manager;
mod rpc;
mod tool;

pub use config::McpServerConfig;
pub use connector::{
    CallToolOutput, Connector, McpSession, StdioConnector, StreamSession,
    ToolInfo,
};
pub use error::Error;
pub use manager::ConnectionManager;
pub use tool::McpTool;
