//! Core logic including the agent loop, tool dispatch, conversation
//! history and connections to external tool servers.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod conversation;
pub mod mcp;
mod model_client;
pub mod tool;

pub use agent::{
    Agent, AgentBuilder, AgentConfig, AgentEvent, AgentSummary, Error,
    IncompleteReason, Outcome, RetryPolicy,
};
pub use tokio_util::sync::CancellationToken;
