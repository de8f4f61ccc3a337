//! An out-of-the-box research agent that assembles the web tools, external
//! tool servers and the Anthropic model provider.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to bring agent functionality into your own host apps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod session;
pub mod tools;

pub use session::{Session, SessionBuilder};

/// Re-exports of [`storm_agent_core`] crate.
pub mod core {
    pub use storm_agent_core::*;
}
