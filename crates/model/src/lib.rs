//! A provider-neutral protocol between the agent and hosted LLMs.
//!
//! This crate establishes a unified protocol for the agent to talk to
//! any supported model provider, so that the agent loop can switch
//! between providers without modifying the core codebase.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.
//!
//! Users of this crate may add some extra functionalities or wrappers,
//! depending on their own use cases. Those extra code should be placed
//! in their own crate.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
