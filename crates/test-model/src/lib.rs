//! A local scripted model for testing purpose.

mod preset;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use storm_agent_model::{
    ErrorKind, ModelProvider, ModelProviderError, ModelRequest, ModelResponse,
    ModelResponseEvent,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    events: VecDeque<ModelResponseEvent>,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        // SAFETY: This type does not require to be pinned.
        let this = unsafe { self.get_unchecked_mut() };

        if let Some(sleep) = &mut this.sleep {
            ready!(sleep.as_mut().poll(cx));
            this.sleep = None;
            return Poll::Ready(Ok(this.events.pop_front()));
        }
        if this.events.is_empty() {
            // In case this method is called after completion.
            return Poll::Ready(Ok(None));
        }
        this.sleep = Some(Box::pin(sleep(this.delay)));
        Pin::new(this).poll_next_event(cx)
    }
}

#[derive(Default)]
struct Script {
    responses: VecDeque<PresetResponse>,
    repeat: Option<PresetResponse>,
    requests: Vec<ModelRequest>,
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup the script, which is how
/// the model should respond to each request. Responses are consumed in
/// the order they were added. Once the script runs out, the response set
/// by [`TestModelProvider::repeat`] is returned forever, or an error
/// with [`ErrorKind::Other`] if there is none.
///
/// Clones share the same script, so a test can keep a clone around to
/// inspect the requests the agent sent.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone)]
pub struct TestModelProvider {
    script: Arc<Mutex<Script>>,
    delay: Duration,
}

impl Default for TestModelProvider {
    fn default() -> Self {
        Self {
            script: Default::default(),
            delay: Duration::from_millis(1),
        }
    }
}

impl TestModelProvider {
    /// Appends a response to the script.
    #[inline]
    pub fn add_response(&mut self, preset: PresetResponse) {
        self.lock().responses.push_back(preset);
    }

    /// Sets a response that is returned once the script is exhausted.
    #[inline]
    pub fn repeat(&mut self, preset: PresetResponse) {
        self.lock().repeat = Some(preset);
    }

    /// Sets the delay before each event is delivered.
    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = duration;
    }

    /// Returns all requests received so far, including failed ones.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.lock().requests.clone()
    }

    /// Returns the number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        // A poisoned script only happens when a test already panicked.
        self.script.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn next_response(
        &self,
        req: &ModelRequest,
    ) -> Result<PresetResponse, Error> {
        let mut guard = self.lock();
        let script = &mut *guard;
        script.requests.push(req.clone());

        if let Some(preset) = script.responses.front_mut() {
            let kind =
                preset.failure_kind.unwrap_or(ErrorKind::RateLimitExceeded);
            match preset.failures {
                Some(0) => {
                    return Err(Error {
                        message: "injected permanent failure",
                        kind,
                    });
                }
                Some(remaining) => {
                    preset.failures = (remaining > 1).then(|| remaining - 1);
                    return Err(Error {
                        message: "injected failure",
                        kind,
                    });
                }
                None => {}
            }
        }

        script
            .responses
            .pop_front()
            .or_else(|| script.repeat.clone())
            .ok_or(Error {
                message: "no enough responses",
                kind: ErrorKind::Other,
            })
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let result = self.next_response(req).map(|preset| {
            let finish_reason = preset.inferred_finish_reason();
            let mut events: VecDeque<_> = preset
                .events
                .into_iter()
                .map(|event| match event {
                    PresetEvent::MessageDelta(msg) => {
                        ModelResponseEvent::MessageDelta(msg)
                    }
                    PresetEvent::ToolCall(req) => {
                        ModelResponseEvent::ToolCall(req)
                    }
                })
                .collect();
            if let Some(usage) = preset.usage {
                events.push_back(ModelResponseEvent::Usage(usage));
            }
            events.push_back(ModelResponseEvent::Completed(finish_reason));
            TestModelResponse {
                events,
                delay: self.delay,
                sleep: None,
            }
        });
        ready(result)
    }
}
