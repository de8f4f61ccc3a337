//! A set of built-in tools that models can use.

mod extract_content;
mod web_search;

pub use extract_content::ExtractContentTool;
pub use web_search::WebSearchTool;

use reqwest::StatusCode;
use storm_agent_core::tool::Error as ToolError;

/// Turns a failed HTTP status from a web API into a tool error the model
/// can act on.
fn status_error(service: &str, key_var: &str, status: StatusCode) -> ToolError {
    let reason = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            format!("{service} rejected the request ({status}), check that {key_var} is valid")
        }
        StatusCode::TOO_MANY_REQUESTS => {
            format!("{service} rate limit exceeded, try again later")
        }
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            format!("{service} rejected the parameters ({status})")
        }
        _ => format!("{service} request failed with {status}"),
    };
    ToolError::execution_error().with_reason(reason)
}

fn request_error(service: &str, err: reqwest::Error) -> ToolError {
    let reason = if err.is_timeout() {
        format!("{service} did not respond in time")
    } else {
        format!("{service} request failed: {err}")
    };
    ToolError::execution_error().with_reason(reason)
}
