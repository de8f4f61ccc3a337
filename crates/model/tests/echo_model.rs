use std::collections::VecDeque;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::future::{poll_fn, ready};
use std::pin::Pin;
use std::task::{self, Poll, ready};
use std::time::Duration;

use serde_json::json;
use storm_agent_model::{
    ErrorKind, ModelFinishReason, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent,
    ToolCallRequest, Usage,
};
use tokio::time::{Sleep, sleep};

#[derive(Debug)]
struct EchoModelError(ErrorKind);

impl Display for EchoModelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for EchoModelError {}

impl ModelProviderError for EchoModelError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

/// Echoes the last user message word by word. If the message starts with
/// `!`, the rest of it is turned into an `echo` tool call instead.
#[derive(Debug)]
struct EchoModelResponse {
    events: VecDeque<ModelResponseEvent>,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl EchoModelResponse {
    fn new(input: &str) -> Self {
        let mut events = VecDeque::new();
        let finish_reason = if let Some(text) = input.strip_prefix('!') {
            events.push_back(ModelResponseEvent::ToolCall(ToolCallRequest {
                id: "call:0".to_owned(),
                name: "echo".to_owned(),
                arguments: json!({ "text": text }),
            }));
            ModelFinishReason::ToolCalls
        } else {
            let words: Vec<_> = input.split(' ').collect();
            for (idx, word) in words.iter().enumerate() {
                let mut delta = word.to_string();
                if idx + 1 < words.len() {
                    delta.push(' ');
                }
                events.push_back(ModelResponseEvent::MessageDelta(delta));
            }
            ModelFinishReason::Stop
        };
        events.push_back(ModelResponseEvent::Usage(Usage {
            input_tokens: input.len() as u64,
            output_tokens: events.len() as u64,
        }));
        events.push_back(ModelResponseEvent::Completed(finish_reason));
        Self {
            events,
            sleep: None,
        }
    }
}

impl ModelResponse for EchoModelResponse {
    type Error = EchoModelError;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        // SAFETY: This type does not require to be pinned.
        let this = unsafe { self.get_unchecked_mut() };
        if let Some(sleep) = &mut this.sleep {
            ready!(sleep.as_mut().poll(cx));
            this.sleep = None;
            return Poll::Ready(Ok(this.events.pop_front()));
        }
        this.sleep = Some(Box::pin(sleep(Duration::from_millis(1))));
        Pin::new(this).poll_next_event(cx)
    }
}

struct EchoModelProvider;

impl ModelProvider for EchoModelProvider {
    type Error = EchoModelError;
    type Response = EchoModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let last_user = req.messages.iter().rev().find_map(|msg| match msg {
            ModelMessage::User { content } => Some(content.as_str()),
            _ => None,
        });
        let result = match last_user {
            Some(input) => Ok(EchoModelResponse::new(input)),
            None => Err(EchoModelError(ErrorKind::InvalidRequest)),
        };
        ready(result)
    }
}

async fn collect(
    mut resp: EchoModelResponse,
) -> (String, Vec<ToolCallRequest>, Usage, ModelFinishReason) {
    let mut text = String::new();
    let mut tool_calls = vec![];
    let mut usage = Usage::default();
    let mut finish_reason = None;
    loop {
        let event = poll_fn(|cx| Pin::new(&mut resp).poll_next_event(cx))
            .await
            .unwrap();
        match event {
            Some(ModelResponseEvent::MessageDelta(delta)) => {
                text.push_str(&delta)
            }
            Some(ModelResponseEvent::ToolCall(req)) => tool_calls.push(req),
            Some(ModelResponseEvent::Usage(u)) => usage = u,
            Some(ModelResponseEvent::Completed(reason)) => {
                finish_reason = Some(reason)
            }
            None => break,
        }
    }
    (text, tool_calls, usage, finish_reason.unwrap())
}

#[tokio::test]
async fn test_text_completion() {
    let req = ModelRequest {
        system: Some("Repeat after the user.".to_owned()),
        messages: vec![ModelMessage::user("Good morning")],
        tools: vec![],
    };
    let resp = EchoModelProvider.send_request(&req).await.unwrap();
    let (text, tool_calls, usage, reason) = collect(resp).await;
    assert_eq!(text, "Good morning");
    assert!(tool_calls.is_empty());
    assert_eq!(usage.total(), 12 + 2);
    assert_eq!(reason, ModelFinishReason::Stop);
}

#[tokio::test]
async fn test_tool_call_completion() {
    let req = ModelRequest {
        messages: vec![ModelMessage::user("!hi")],
        ..Default::default()
    };
    let resp = EchoModelProvider.send_request(&req).await.unwrap();
    let (text, tool_calls, _, reason) = collect(resp).await;
    assert!(text.is_empty());
    assert_eq!(tool_calls.len(), 1);
    assert_eq!(tool_calls[0].arguments, json!({ "text": "hi" }));
    assert_eq!(reason, ModelFinishReason::ToolCalls);
}

#[tokio::test]
async fn test_error() {
    let req = ModelRequest::default();
    let err = EchoModelProvider.send_request(&req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert!(err.kind().is_configuration());
}
