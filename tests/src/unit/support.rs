use async_trait::async_trait;
use moneta_core::gateway::{ApiCall, ApiReply, HttpExchange};
use moneta_core::storage::MemoryStore;
use moneta_core::stream::{ChunkSource, StreamEvent};
use moneta_core::{ClientError, Credential, CredentialStore, User};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub fn sample_user() -> User {
    serde_json::from_value(json!({
        "id": "u-1",
        "email": "ada@example.com",
        "username": "ada",
        "firstName": "Ada",
        "lastName": "Lovelace"
    }))
    .expect("user")
}

pub fn seeded_credentials() -> CredentialStore {
    let store = CredentialStore::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()));
    store
        .set(
            &Credential {
                access_token: "access-1".into(),
                refresh_token: Some("refresh-1".into()),
            },
            &sample_user(),
            false,
        )
        .expect("seed credentials");
    store
}

/// Transport fake: replies are scripted per path and every call is recorded.
#[derive(Default)]
pub struct ScriptedExchange {
    replies: Mutex<HashMap<String, VecDeque<ApiReply>>>,
    calls: Mutex<Vec<ApiCall>>,
}

impl ScriptedExchange {
    pub fn enqueue(&self, path: &str, status: u16, body: Value) {
        self.replies
            .lock()
            .entry(path.to_owned())
            .or_default()
            .push_back(ApiReply { status, body });
    }

    pub fn calls_to(&self, path: &str) -> Vec<ApiCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.path == path)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HttpExchange for ScriptedExchange {
    async fn execute(&self, call: ApiCall) -> Result<ApiReply, ClientError> {
        tokio::task::yield_now().await;
        let reply = self
            .replies
            .lock()
            .get_mut(&call.path)
            .and_then(VecDeque::pop_front);
        self.calls.lock().push(call);
        Ok(reply.unwrap_or(ApiReply {
            status: 404,
            body: json!({ "message": "no scripted reply" }),
        }))
    }
}

/// Chunk source that keeps the stream open until `release()` and honors the
/// cancellation token, for exercising the busy guard and cancellation.
pub struct HoldingChunkSource {
    gate: Arc<Notify>,
    script: Mutex<Vec<StreamEvent>>,
}

impl HoldingChunkSource {
    pub fn new(script: Vec<StreamEvent>) -> Self {
        Self {
            gate: Arc::new(Notify::new()),
            script: Mutex::new(script),
        }
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl ChunkSource for HoldingChunkSource {
    async fn open(
        &self,
        _message: &str,
        _user_id: &str,
        cancel: CancellationToken,
    ) -> Result<UnboundedReceiver<StreamEvent>, ClientError> {
        let gate = self.gate.clone();
        let script = self.script.lock().clone();
        let (tx, rx) = unbounded_channel();
        tokio::spawn(async move {
            tokio::select! {
                _ = gate.notified() => {
                    for event in script {
                        let _ = tx.send(event);
                    }
                }
                _ = cancel.cancelled() => {}
            }
        });
        Ok(rx)
    }
}

/// Wait until the session leaves the streaming phase.
pub async fn wait_idle(session: &moneta_core::ChatSession) {
    for _ in 0..500 {
        if session.phase() == moneta_core::SessionPhase::Idle {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    panic!("session never returned to idle");
}
