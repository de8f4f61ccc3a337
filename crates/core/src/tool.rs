//! Tool call supports.

mod dispatch;
mod error;
mod object;
mod registry;
mod schema;

use serde::de::DeserializeOwned;
use serde_json::Value;

pub use dispatch::{DispatchOptions, dispatch};
pub use error::{Error, ErrorKind};
pub use object::{BoxedToolFuture, DynTool};
pub(crate) use object::TypedTool;
pub use registry::ToolRegistry;
pub use schema::validate_arguments;

/// The outcome of executing a tool: the output content on success, or an
/// error describing why the call failed.
pub type ToolOutcome = Result<String, Error>;

/// A tool that can be called by the model.
///
/// Implementations of this trait should be stateless, and may not maintain any
/// internal state.
///
/// The tool can be context-aware, meaning it can access additional information
/// about the current execution context, such as credentials or an HTTP client.
/// To do this, make the context an immutable state of the tool, which can be
/// set during initialization, and clone it when executing.
///
/// Tools whose shape is only known at runtime can implement [`DynTool`]
/// directly instead.
pub trait Tool: Send + Sync + 'static {
    /// The type of input that the tool accepts.
    type Input: DeserializeOwned;

    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool.
    fn parameter_schema(&self) -> &Value;

    /// Executes the tool with the given input.
    ///
    /// This method must return a future that is fully independent of `self`,
    /// and the future should be cancellation safe.
    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolOutcome> + Send + 'static;
}
