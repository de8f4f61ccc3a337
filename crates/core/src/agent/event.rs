use std::time::Duration;

use serde_json::Value;

/// Progress reported while an agent is running.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentEvent {
    /// A piece of text streamed from the model.
    TextDelta(String),
    /// A tool call is about to be dispatched.
    ToolCallStarted {
        /// The identifier of the call.
        id: String,
        /// The name of the tool.
        name: String,
        /// The arguments generated by the model.
        arguments: Value,
    },
    /// A tool call has produced its result.
    ToolCallFinished {
        /// The identifier of the call.
        id: String,
        /// The name of the tool.
        name: String,
        /// The output, or the reason of the failure.
        content: String,
        /// Whether the call failed.
        is_error: bool,
    },
    /// A model request failed and will be sent again.
    Retrying {
        /// The attempt that failed, starting from 1.
        attempt: u32,
        /// How long until the next attempt.
        delay: Duration,
        /// Why the attempt failed.
        reason: String,
    },
    /// The run stopped because it reached the iteration ceiling.
    IterationLimitReached {
        /// The number of iterations performed.
        iterations: usize,
    },
}
