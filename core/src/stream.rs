use crate::config::ClientConfig;
use crate::credentials::CredentialStore;
use crate::error::ClientError;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One event on an open chat stream. `Error` and `Complete` are terminal:
/// nothing is delivered after either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Chunk(String),
    Error(String),
    Complete,
}

/// Incremental decoder for `text/event-stream` bodies.
///
/// Feed it transport chunks as they arrive; completed `data` payloads come
/// back in arrival order. Payloads are opaque text fragments, passed through
/// verbatim.
#[derive(Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event_data: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw[..newline]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            self.accept_line(line, &mut payloads);
        }
        payloads
    }

    fn accept_line(&mut self, line: &str, payloads: &mut Vec<String>) {
        // Blank line dispatches the pending event.
        if line.is_empty() {
            if let Some(data) = self.event_data.take() {
                payloads.push(data);
            }
            return;
        }
        // Comment lines double as keep-alives.
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, rest)) => (field, rest.strip_prefix(' ').unwrap_or(rest)),
            None => (line, ""),
        };
        if field != "data" {
            return;
        }
        match &mut self.event_data {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => self.event_data = Some(value.to_owned()),
        }
    }

    /// Payload of an event the server never terminated with a blank line.
    pub fn finish(&mut self) -> Option<String> {
        self.buffer.clear();
        self.event_data.take()
    }
}

/// Seam for opening one chat stream per turn. The production implementation
/// speaks SSE over HTTP; tests and the smoke task script their own events.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    async fn open(
        &self,
        message: &str,
        user_id: &str,
        cancel: CancellationToken,
    ) -> Result<UnboundedReceiver<StreamEvent>, ClientError>;
}

/// Opens `POST /chat/message` with streaming response semantics.
///
/// The bearer token is read from the credential store at open time and never
/// re-attached mid-stream; if it expires while the stream is open the failure
/// surfaces as an `Error` event and the whole turn is retried by the caller.
pub struct SseChunkSource {
    client: reqwest::Client,
    base_url: String,
    credentials: CredentialStore,
}

impl SseChunkSource {
    pub fn new(
        client: reqwest::Client,
        config: &ClientConfig,
        credentials: CredentialStore,
    ) -> Self {
        Self {
            client,
            base_url: config.base(),
            credentials,
        }
    }
}

#[async_trait]
impl ChunkSource for SseChunkSource {
    async fn open(
        &self,
        message: &str,
        user_id: &str,
        cancel: CancellationToken,
    ) -> Result<UnboundedReceiver<StreamEvent>, ClientError> {
        let token = self
            .credentials
            .get()
            .map(|credential| credential.access_token)
            .ok_or_else(|| ClientError::Validation("not signed in".into()))?;

        let request = self
            .client
            .post(format!("{}/chat/message", self.base_url))
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&json!({ "message": message, "userId": user_id }));

        let (tx, rx) = unbounded_channel();
        tokio::spawn(async move {
            tokio::select! {
                _ = pump_stream(request, &tx) => {}
                _ = cancel.cancelled() => {
                    debug!("chat stream cancelled");
                }
            }
        });
        Ok(rx)
    }
}

async fn pump_stream(request: reqwest::RequestBuilder, tx: &UnboundedSender<StreamEvent>) {
    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            let _ = tx.send(StreamEvent::Error(err.to_string()));
            return;
        }
    };

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        warn!(status, "chat stream rejected");
        let _ = tx.send(StreamEvent::Error(describe_rejection(status, &body)));
        return;
    }

    let mut parser = SseParser::new();
    let mut body = response.bytes_stream();
    while let Some(next) = body.next().await {
        match next {
            Ok(bytes) => {
                for payload in parser.push(&bytes) {
                    let _ = tx.send(StreamEvent::Chunk(payload));
                }
            }
            Err(err) => {
                let _ = tx.send(StreamEvent::Error(err.to_string()));
                return;
            }
        }
    }
    if let Some(payload) = parser.finish() {
        let _ = tx.send(StreamEvent::Chunk(payload));
    }
    let _ = tx.send(StreamEvent::Complete);
}

fn describe_rejection(status: u16, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| body.trim().to_owned());
    if detail.is_empty() {
        format!("stream rejected with status {status}")
    } else {
        format!("stream rejected with status {status}: {detail}")
    }
}

/// Plays back queued event scripts, one script per opened stream. Stands in
/// for the backend in tests and the xtask smoke run.
#[derive(Default)]
pub struct ScriptedChunkSource {
    scripts: Mutex<VecDeque<Vec<StreamEvent>>>,
}

impl ScriptedChunkSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, events: Vec<StreamEvent>) {
        self.scripts.lock().push_back(events);
    }
}

#[async_trait]
impl ChunkSource for ScriptedChunkSource {
    async fn open(
        &self,
        _message: &str,
        _user_id: &str,
        _cancel: CancellationToken,
    ) -> Result<UnboundedReceiver<StreamEvent>, ClientError> {
        let events = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| vec![StreamEvent::Complete]);
        let (tx, rx) = unbounded_channel();
        tokio::spawn(async move {
            for event in events {
                tokio::task::yield_now().await;
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}
