//! A minimal JSON-RPC 2.0 client over newline-delimited streams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;

use super::Error;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type Responder = oneshot::Sender<Result<Value, Error>>;

const METHOD_NOT_FOUND: i64 = -32601;

pub(crate) struct RpcClient {
    shared: Arc<Shared>,
    reader_task: JoinHandle<()>,
}

struct Shared {
    server: String,
    writer: AsyncMutex<Option<BoxedWriter>>,
    pending: Mutex<Pending>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct Pending {
    closed: bool,
    responders: HashMap<u64, Responder>,
}

impl RpcClient {
    /// Starts a client that reads responses from `reader` in a background
    /// task and writes requests to `writer`.
    pub(crate) fn new<R, W>(server: String, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            server,
            writer: AsyncMutex::new(Some(Box::new(writer))),
            pending: Default::default(),
            next_id: AtomicU64::new(1),
        });
        let reader_task = tokio::spawn(Arc::clone(&shared).reader_loop(reader));
        Self {
            shared,
            reader_task,
        }
    }

    /// Sends a request and waits for its result.
    pub(crate) async fn request(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Value, Error> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.lock_pending();
            if pending.closed {
                return Err(self.shared.closed());
            }
            pending.responders.insert(id, tx);
        }
        let _pending = PendingGuard {
            shared: &self.shared,
            id,
        };

        trace!("[{}] -> {method} #{id}", self.shared.server);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        self.shared.write_message(&payload).await?;

        rx.await.unwrap_or_else(|_| Err(self.shared.closed()))
    }

    /// Sends a notification, which has no response.
    pub(crate) async fn notify(
        &self,
        method: &str,
        params: Value,
    ) -> Result<(), Error> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.shared.write_message(&payload).await
    }

    /// Stops reading, drops the writer and fails every pending request.
    pub(crate) async fn close(&self) {
        self.reader_task.abort();
        self.shared.writer.lock().await.take();
        self.shared.fail_all_pending();
    }

    #[cfg(test)]
    fn pending_requests(&self) -> usize {
        self.shared.lock_pending().responders.len()
    }
}

/// Forgets a request once its caller stops waiting, whether it got a
/// response or not.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.lock_pending().responders.remove(&self.id);
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

impl Shared {
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn closed(&self) -> Error {
        Error::Closed {
            server: self.server.clone(),
        }
    }

    fn transport_error(&self, message: impl Into<String>) -> Error {
        Error::Transport {
            server: self.server.clone(),
            message: message.into(),
        }
    }

    async fn write_message(&self, message: &Value) -> Result<(), Error> {
        let mut encoded = message.to_string();
        encoded.push('\n');

        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or_else(|| self.closed())?;
        stream
            .write_all(encoded.as_bytes())
            .await
            .map_err(|err| self.transport_error(err.to_string()))?;
        stream
            .flush()
            .await
            .map_err(|err| self.transport_error(err.to_string()))
    }

    fn fail_all_pending(&self) {
        let mut pending = self.lock_pending();
        pending.closed = true;
        for (_, responder) in pending.responders.drain() {
            responder.send(Err(self.closed())).ok();
        }
    }

    async fn reader_loop<R: AsyncRead + Unpin>(self: Arc<Self>, reader: R) {
        let mut lines = BufReader::new(reader).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    warn!("[{}] failed to read: {err}", self.server);
                    break;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => self.process_inbound_message(value).await,
                Err(err) => {
                    // Servers occasionally log to stdout.
                    debug!("[{}] skipping a non-JSON line: {err}", self.server);
                }
            }
        }

        debug!("[{}] stream ended", self.server);
        self.fail_all_pending();
    }

    async fn process_inbound_message(&self, value: Value) {
        let method = value.get("method").and_then(Value::as_str);
        match (value.get("id"), method) {
            (Some(id), Some(method)) => {
                self.handle_server_request(id.clone(), method).await;
            }
            (Some(id), None) => self.handle_response(id, &value),
            (None, Some(method)) => {
                debug!("[{}] notification: {method}", self.server);
            }
            (None, None) => {}
        }
    }

    fn handle_response(&self, id: &Value, value: &Value) {
        let Some(id) = id.as_u64() else {
            debug!("[{}] response with a foreign id: {id}", self.server);
            return;
        };
        let Some(responder) = self.lock_pending().responders.remove(&id) else {
            debug!("[{}] response for unknown request #{id}", self.server);
            return;
        };

        let result = match (value.get("error"), value.get("result")) {
            (Some(error), _) => Err(Error::Rpc {
                server: self.server.clone(),
                code: error.get("code").and_then(Value::as_i64).unwrap_or(-32000),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_owned(),
            }),
            (None, Some(result)) => Ok(result.clone()),
            (None, None) => Err(Error::InvalidResponse {
                server: self.server.clone(),
                message: format!("response #{id} has neither result nor error"),
            }),
        };
        responder.send(result).ok();
    }

    async fn handle_server_request(&self, id: Value, method: &str) {
        let payload = if method == "ping" {
            json!({ "jsonrpc": "2.0", "id": id, "result": {} })
        } else {
            debug!("[{}] unsupported server request: {method}", self.server);
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": METHOD_NOT_FOUND,
                    "message": format!("client does not implement `{method}`"),
                },
            })
        };
        if let Err(err) = self.write_message(&payload).await {
            warn!("[{}] failed to answer {method}: {err}", self.server);
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, duplex, split};
    use tokio::select;

    use super::*;

    #[tokio::test]
    async fn test_request_and_error() {
        let (client_io, server_io) = duplex(4096);
        let (client_read, client_write) = split(client_io);
        let client = RpcClient::new("test".to_owned(), client_read, client_write);

        let server = tokio::spawn(async move {
            let (read, mut write) = split(server_io);
            let mut lines = BufReader::new(read).lines();

            let req: Value =
                serde_json::from_str(&lines.next_line().await.unwrap().unwrap())
                    .unwrap();
            assert_eq!(req["method"], "echo");
            let resp = json!({ "jsonrpc": "2.0", "id": req["id"], "result": req["params"] });
            write.write_all(format!("{resp}\nnot json\n").as_bytes()).await.unwrap();

            let req: Value =
                serde_json::from_str(&lines.next_line().await.unwrap().unwrap())
                    .unwrap();
            let resp = json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "error": { "code": -32602, "message": "bad params" },
            });
            write.write_all(format!("{resp}\n").as_bytes()).await.unwrap();
        });

        let result = client.request("echo", json!({ "a": 1 })).await.unwrap();
        assert_eq!(result, json!({ "a": 1 }));

        let err = client.request("fail", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Rpc { code: -32602, .. }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_stream_fails_pending_requests() {
        let (client_io, server_io) = duplex(4096);
        let (client_read, client_write) = split(client_io);
        let client = RpcClient::new("test".to_owned(), client_read, client_write);

        let server = tokio::spawn(async move {
            let (read, _write) = split(server_io);
            let mut lines = BufReader::new(read).lines();
            // Read the request, then hang up without answering.
            lines.next_line().await.unwrap();
        });

        let err = client.request("never", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Closed { .. }));
        server.await.unwrap();

        client.close().await;
        let err = client.request("again", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Closed { .. }));
    }

    #[tokio::test]
    async fn test_abandoned_request_is_forgotten() {
        let (client_io, server_io) = duplex(4096);
        let (client_read, client_write) = split(client_io);
        let client = RpcClient::new("test".to_owned(), client_read, client_write);

        let (seen_tx, seen_rx) = oneshot::channel();
        let server = tokio::spawn(async move {
            let (read, _write) = split(server_io);
            let mut lines = BufReader::new(read).lines();
            lines.next_line().await.unwrap();
            seen_tx.send(()).unwrap();
            // Never answer, just wait for the client to hang up.
            while let Ok(Some(_)) = lines.next_line().await {}
        });

        {
            let request = client.request("slow", json!({}));
            tokio::pin!(request);
            select! {
                _ = &mut request => panic!("the server never answers"),
                _ = seen_rx => {}
            }
            assert_eq!(client.pending_requests(), 1);
        }
        assert_eq!(client.pending_requests(), 0);

        client.close().await;
        server.await.unwrap();
    }
}
