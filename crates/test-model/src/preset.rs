use serde::{Deserialize, Serialize};
use storm_agent_model::{ErrorKind, ModelFinishReason, ToolCallRequest, Usage};

/// The events in a preset response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "message_delta")]
    MessageDelta(String),
    #[serde(rename = "tool_call")]
    ToolCall(ToolCallRequest),
}

impl PresetEvent {
    /// Shorthand for a tool call event.
    #[inline]
    pub fn tool_call<S1: Into<String>, S2: Into<String>>(
        id: S1,
        name: S2,
        arguments: serde_json::Value,
    ) -> Self {
        PresetEvent::ToolCall(ToolCallRequest {
            id: id.into(),
            name: name.into(),
            arguments,
        })
    }
}

/// The preset response for one model request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// If set, the request will fail in the first `failures` attempts.
    /// `Some(0)` means the request will fail infinitely.
    pub failures: Option<u64>,
    /// The kind of the injected failures.
    #[serde(skip)]
    pub failure_kind: Option<ErrorKind>,
    /// Overrides the inferred finish reason.
    pub finish_reason: Option<ModelFinishReason>,
    /// Usage reported before completion.
    pub usage: Option<Usage>,
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            failures: None,
            failure_kind: None,
            finish_reason: None,
            usage: None,
        }
    }

    /// Creates a text-only `PresetResponse`.
    #[inline]
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self::with_events([PresetEvent::MessageDelta(text.into())])
    }

    /// Sets failure times before a successful response. `0` means the
    /// response will always be a failure.
    #[inline]
    pub fn with_failures(mut self, failures: u64) -> Self {
        self.failures = Some(failures);
        self
    }

    /// Sets the error kind of the injected failures, which defaults to
    /// [`ErrorKind::RateLimitExceeded`].
    #[inline]
    pub fn with_failure_kind(mut self, kind: ErrorKind) -> Self {
        self.failure_kind = Some(kind);
        self
    }

    /// Sets the finish reason reported at completion.
    #[inline]
    pub fn with_finish_reason(mut self, reason: ModelFinishReason) -> Self {
        self.finish_reason = Some(reason);
        self
    }

    /// Sets the usage reported before completion.
    #[inline]
    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Some(Usage {
            input_tokens,
            output_tokens,
        });
        self
    }

    pub(crate) fn inferred_finish_reason(&self) -> ModelFinishReason {
        if let Some(reason) = self.finish_reason {
            return reason;
        }
        let has_tool_call = self
            .events
            .iter()
            .any(|event| matches!(event, PresetEvent::ToolCall(_)));
        if has_tool_call {
            ModelFinishReason::ToolCalls
        } else {
            ModelFinishReason::Stop
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_serialize_deserialize() {
        let response = PresetResponse::with_events([
            PresetEvent::MessageDelta("Let me look that up.".to_string()),
            PresetEvent::tool_call(
                "1",
                "web_search",
                json!({ "query": "rust async traits" }),
            ),
        ])
        .with_usage(10, 5);

        let serialized = serde_json::to_string(&response).unwrap();
        let deserialized: PresetResponse =
            serde_json::from_str(&serialized).unwrap();

        assert_eq!(response, deserialized);
        assert_eq!(
            deserialized.inferred_finish_reason(),
            ModelFinishReason::ToolCalls
        );
    }
}
