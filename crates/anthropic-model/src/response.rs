use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use pin_project_lite::pin_project;
use serde_json::{Map, Value};
use storm_agent_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    ToolCallRequest, Usage,
};

use crate::Error;
use crate::io::{Sse, SseError};
use crate::proto::{
    ContentBlockStart, ContentDelta, StreamEvent, UsageDelta,
};

struct PartialToolUse {
    id: String,
    name: String,
    input_json: String,
}

struct PartialState {
    sse: Sse,
    // Tool use blocks that are still streaming their input, by block index.
    tool_uses: HashMap<usize, PartialToolUse>,
    usage: Usage,
    finish_reason: Option<ModelFinishReason>,
    completed: bool,
}

impl PartialState {
    fn apply_usage(&mut self, delta: UsageDelta) -> Usage {
        if let Some(input_tokens) = delta.input_tokens {
            self.usage.input_tokens = input_tokens;
        }
        if let Some(output_tokens) = delta.output_tokens {
            self.usage.output_tokens = output_tokens;
        }
        self.usage
    }
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    /// A streaming response from the Messages API.
    pub struct AnthropicResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
    }
}

impl AnthropicResponse {
    #[inline]
    pub(crate) fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            tool_uses: HashMap::new(),
            usage: Usage::default(),
            finish_reason: None,
            completed: false,
        };
        let next_event_fut = async move { next_event(partial_state).await };
        Self {
            next_event_fut: Some(Box::pin(next_event_fut)),
        }
    }
}

impl ModelResponse for AnthropicResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, _)) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        let next_event_fut = async move { next_event(partial_state).await };
        *this.next_event_fut = Some(Box::pin(next_event_fut));

        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(
    mut partial_state: PartialState,
) -> Result<(Option<ModelResponseEvent>, PartialState), Error> {
    loop {
        if partial_state.completed {
            return Ok((None, partial_state));
        }

        let sse_event = match partial_state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                return Err(Error::new(
                    "the stream ended before the message was complete",
                    ErrorKind::Network,
                ));
            }
            Err(SseError::Chunks(err)) => return Err(err),
            Err(SseError::InvalidPayload) => {
                return Err(Error::new(
                    "received a malformed event stream",
                    ErrorKind::Other,
                ));
            }
        };
        trace!("got sse event: {:?} {}", sse_event.event, sse_event.data);

        let event = serde_json::from_str::<StreamEvent>(&sse_event.data)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
        let model_event = match event {
            StreamEvent::MessageStart { message } => {
                debug!("message {} started", message.id);
                message
                    .usage
                    .map(|u| ModelResponseEvent::Usage(partial_state.apply_usage(u)))
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlockStart::Text { text } if !text.is_empty() => {
                    Some(ModelResponseEvent::MessageDelta(text))
                }
                ContentBlockStart::ToolUse { id, name } => {
                    partial_state.tool_uses.insert(
                        index,
                        PartialToolUse {
                            id,
                            name,
                            input_json: String::new(),
                        },
                    );
                    None
                }
                _ => None,
            },
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                ContentDelta::TextDelta { text } => {
                    Some(ModelResponseEvent::MessageDelta(text))
                }
                ContentDelta::InputJsonDelta { partial_json } => {
                    if let Some(tool_use) = partial_state.tool_uses.get_mut(&index)
                    {
                        tool_use.input_json.push_str(&partial_json);
                    }
                    None
                }
                ContentDelta::Unsupported => None,
            },
            StreamEvent::ContentBlockStop { index } => partial_state
                .tool_uses
                .remove(&index)
                .map(|tool_use| ModelResponseEvent::ToolCall(finish_tool_use(tool_use))),
            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(stop_reason) = delta.stop_reason {
                    partial_state.finish_reason =
                        Some(finish_reason(&stop_reason));
                }
                usage.map(|u| ModelResponseEvent::Usage(partial_state.apply_usage(u)))
            }
            StreamEvent::MessageStop => {
                partial_state.completed = true;
                let finish_reason = partial_state
                    .finish_reason
                    .take()
                    .unwrap_or(ModelFinishReason::Stop);
                Some(ModelResponseEvent::Completed(finish_reason))
            }
            StreamEvent::Error { error } => {
                warn!("stream failed: {}: {}", error.r#type, error.message);
                return Err(Error::new(
                    format!("{}: {}", error.r#type, error.message),
                    error_kind_for_type(&error.r#type),
                ));
            }
            StreamEvent::Ping | StreamEvent::Unknown => None,
        };

        if let Some(model_event) = model_event {
            return Ok((Some(model_event), partial_state));
        }
    }
}

fn finish_tool_use(tool_use: PartialToolUse) -> ToolCallRequest {
    let arguments = if tool_use.input_json.trim().is_empty() {
        Value::Object(Map::new())
    } else {
        match serde_json::from_str(&tool_use.input_json) {
            Ok(arguments) => arguments,
            Err(err) => {
                // Passed through so that the tool call fails validation and
                // the model gets to see what went wrong.
                warn!("invalid input for tool call {}: {err}", tool_use.id);
                Value::String(tool_use.input_json)
            }
        }
    };
    ToolCallRequest {
        id: tool_use.id,
        name: tool_use.name,
        arguments,
    }
}

fn finish_reason(stop_reason: &str) -> ModelFinishReason {
    match stop_reason {
        "tool_use" => ModelFinishReason::ToolCalls,
        "max_tokens" => ModelFinishReason::MaxTokens,
        _ => ModelFinishReason::Stop,
    }
}

fn error_kind_for_type(ty: &str) -> ErrorKind {
    match ty {
        "authentication_error" | "permission_error" => ErrorKind::Authentication,
        "invalid_request_error" | "not_found_error" | "request_too_large" => {
            ErrorKind::InvalidRequest
        }
        "rate_limit_error" => ErrorKind::RateLimitExceeded,
        "overloaded_error" => ErrorKind::Overloaded,
        "api_error" => ErrorKind::Network,
        _ => ErrorKind::Other,
    }
}
