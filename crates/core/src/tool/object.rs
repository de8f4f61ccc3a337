use std::pin::Pin;

use serde_json::Value;
use storm_agent_model::ModelTool;
use tracing::Instrument;

use super::{Error, Tool, ToolOutcome};

/// A boxed future returned by [`DynTool::execute`].
pub type BoxedToolFuture = Pin<Box<dyn Future<Output = ToolOutcome> + Send>>;

/// An object-safe tool that takes raw JSON arguments.
///
/// Every [`Tool`] is adapted to this trait when it's registered. Tools
/// discovered at runtime, such as the ones exposed by an external tool
/// server, implement it directly.
pub trait DynTool: Send + Sync + 'static {
    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool.
    fn parameter_schema(&self) -> &Value;

    /// Executes the tool with raw arguments.
    ///
    /// Arguments have already been checked against
    /// [`DynTool::parameter_schema`] when this is called from the
    /// dispatcher. The returned future must be independent of `self`.
    fn execute(&self, arguments: Value) -> BoxedToolFuture;

    /// Returns the definition sent to the model.
    fn definition(&self) -> ModelTool {
        ModelTool {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            parameters: self.parameter_schema().clone(),
        }
    }
}

pub(crate) struct TypedTool<T: Tool>(pub T);

impl<T: Tool> DynTool for TypedTool<T> {
    #[inline]
    fn name(&self) -> &str {
        self.0.name()
    }

    #[inline]
    fn description(&self) -> &str {
        self.0.description()
    }

    #[inline]
    fn parameter_schema(&self) -> &Value {
        self.0.parameter_schema()
    }

    fn execute(&self, arguments: Value) -> BoxedToolFuture {
        let input: T::Input = match serde_json::from_value(arguments) {
            Ok(input) => input,
            Err(err) => {
                let reason = format!("{err}");
                return Box::pin(std::future::ready(ToolOutcome::Err(
                    Error::invalid_input().with_reason(reason),
                )));
            }
        };
        Box::pin(
            self.0
                .execute(input)
                .instrument(debug_span!("tool execute", name = self.0.name())),
        )
    }
}
