use crate::error::ClientError;
use crate::gateway::{ApiEnvelope, AuthGateway, SessionEvent};
use crate::stream::{ChunkSource, StreamEvent};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Pending,
    Streaming,
    Complete,
    Failed,
}

/// One user message or its paired assistant reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub role: TurnRole,
    pub text: String,
    pub status: TurnStatus,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    fn user(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: TurnRole::User,
            text: text.into(),
            status: TurnStatus::Complete,
            created_at: Utc::now(),
        }
    }

    fn assistant() -> Self {
        Self {
            id: Uuid::new_v4(),
            role: TurnRole::Assistant,
            text: String::new(),
            status: TurnStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Streaming,
}

/// One stored exchange as the history endpoint returns it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub id: i64,
    pub user_id: String,
    pub user_message: String,
    pub agent_response: String,
    pub created_at: String,
    #[serde(default)]
    pub message_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStats {
    pub total_messages: u64,
    pub session_active: bool,
    pub last_activity: String,
}

/// The one live stream of a conversation; a new send is rejected while it
/// exists.
struct StreamHandle {
    generation: u64,
    cancel: CancellationToken,
}

struct InnerSession {
    turns: Vec<ConversationTurn>,
    phase: SessionPhase,
    generation: u64,
    active: Option<StreamHandle>,
}

/// Orchestrates the turn lifecycle: compose, stream, finalize.
///
/// At most one stream is open per session; chunks are applied to the paired
/// assistant turn strictly in arrival order.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<RwLock<InnerSession>>,
    gateway: AuthGateway,
    source: Arc<dyn ChunkSource>,
    events: UnboundedSender<SessionEvent>,
}

impl ChatSession {
    pub fn new(gateway: AuthGateway, source: Arc<dyn ChunkSource>) -> Self {
        let events = gateway.event_sender();
        Self {
            inner: Arc::new(RwLock::new(InnerSession {
                turns: Vec::new(),
                phase: SessionPhase::Idle,
                generation: 0,
                active: None,
            })),
            gateway,
            source,
            events,
        }
    }

    pub fn turns(&self) -> Vec<ConversationTurn> {
        self.inner.read().turns.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.read().phase
    }

    /// Submit a user message and open its reply stream.
    ///
    /// Returns `Ok(false)` without side effects while a stream is active.
    /// Empty input and a missing sign-in are rejected before any network call.
    pub async fn send(&self, text: impl Into<String>) -> Result<bool, ClientError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ClientError::Validation("message is empty".into()));
        }
        let user = self
            .gateway
            .credentials()
            .user()
            .ok_or_else(|| ClientError::Validation("not signed in".into()))?;

        let (assistant_id, cancel, generation) = {
            let mut inner = self.inner.write();
            if inner.phase == SessionPhase::Streaming {
                debug!("send ignored, a turn is already streaming");
                return Ok(false);
            }
            inner.phase = SessionPhase::Streaming;
            inner.generation += 1;
            let generation = inner.generation;
            let cancel = CancellationToken::new();
            inner.active = Some(StreamHandle {
                generation,
                cancel: cancel.clone(),
            });
            inner.turns.push(ConversationTurn::user(text.as_str()));
            let assistant = ConversationTurn::assistant();
            let assistant_id = assistant.id;
            inner.turns.push(assistant);
            (assistant_id, cancel, generation)
        };

        let rx = match self.source.open(&text, &user.id, cancel).await {
            Ok(rx) => rx,
            Err(err) => {
                self.finish_turn(generation, assistant_id, TurnStatus::Failed);
                return Err(err);
            }
        };

        let session = self.clone();
        tokio::spawn(async move {
            session.pump(generation, assistant_id, rx).await;
        });
        Ok(true)
    }

    async fn pump(
        &self,
        generation: u64,
        assistant_id: Uuid,
        mut rx: UnboundedReceiver<StreamEvent>,
    ) {
        let mut outcome = None;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Chunk(delta) => {
                    self.append_chunk(generation, assistant_id, &delta);
                }
                StreamEvent::Error(reason) => {
                    warn!(%reason, "chat stream failed");
                    outcome = Some(TurnStatus::Failed);
                    break;
                }
                StreamEvent::Complete => {
                    outcome = Some(TurnStatus::Complete);
                    break;
                }
            }
        }
        // A closed channel without a terminal event means the stream was
        // cancelled or its task died; either way the turn did not finish.
        let status = outcome.unwrap_or(TurnStatus::Failed);
        if self.finish_turn(generation, assistant_id, status) && status == TurnStatus::Complete {
            let _ = self.events.send(SessionEvent::TurnCompleted {
                turn_id: assistant_id,
            });
        }
    }

    fn append_chunk(&self, generation: u64, assistant_id: Uuid, delta: &str) {
        let mut inner = self.inner.write();
        if !is_current(&inner, generation) {
            return;
        }
        if let Some(turn) = inner.turns.iter_mut().find(|turn| turn.id == assistant_id) {
            turn.text.push_str(delta);
            turn.status = TurnStatus::Streaming;
        }
    }

    /// Returns false when a stale stream tried to finalize a superseded turn.
    fn finish_turn(&self, generation: u64, assistant_id: Uuid, status: TurnStatus) -> bool {
        let mut inner = self.inner.write();
        if !is_current(&inner, generation) {
            return false;
        }
        if let Some(turn) = inner.turns.iter_mut().find(|turn| turn.id == assistant_id) {
            turn.status = status;
        }
        inner.phase = SessionPhase::Idle;
        inner.active = None;
        true
    }

    /// Tear down the active stream, if any. The pending turn ends `Failed`.
    pub fn cancel(&self) {
        let inner = self.inner.read();
        if let Some(handle) = &inner.active {
            handle.cancel.cancel();
        }
    }

    /// Clear all turns and ask the server to drop its session state. Only
    /// meaningful while idle.
    pub async fn reset(&self) -> Result<(), ClientError> {
        {
            let inner = self.inner.read();
            if inner.phase == SessionPhase::Streaming {
                return Err(ClientError::Validation("a turn is still streaming".into()));
            }
        }
        if let Some(user) = self.gateway.credentials().user() {
            self.gateway
                .post("/chat/reset", json!({ "userId": user.id }))
                .await?;
        }
        self.inner.write().turns.clear();
        Ok(())
    }

    /// Replace the local transcript with the server-side history. Each stored
    /// record becomes a completed user/assistant pair.
    pub async fn load_history(&self) -> Result<usize, ClientError> {
        let user = self
            .gateway
            .credentials()
            .user()
            .ok_or_else(|| ClientError::Validation("not signed in".into()))?;
        let reply = self
            .gateway
            .get(&format!("/chat/history/{}", user.id))
            .await?;
        let envelope: ApiEnvelope<Vec<ChatRecord>> = serde_json::from_value(reply)?;

        let mut turns = Vec::with_capacity(envelope.data.len() * 2);
        for record in &envelope.data {
            turns.push(ConversationTurn::user(record.user_message.clone()));
            let mut assistant = ConversationTurn::assistant();
            assistant.text = record.agent_response.clone();
            assistant.status = TurnStatus::Complete;
            turns.push(assistant);
        }

        let mut inner = self.inner.write();
        if inner.phase == SessionPhase::Streaming {
            return Err(ClientError::Validation("a turn is still streaming".into()));
        }
        let count = envelope.data.len();
        inner.turns = turns;
        Ok(count)
    }

    pub async fn stats(&self) -> Result<ChatStats, ClientError> {
        let user = self
            .gateway
            .credentials()
            .user()
            .ok_or_else(|| ClientError::Validation("not signed in".into()))?;
        let reply = self
            .gateway
            .get(&format!("/chat/stats/{}", user.id))
            .await?;
        let envelope: ApiEnvelope<ChatStats> = serde_json::from_value(reply)?;
        Ok(envelope.data)
    }
}

fn is_current(inner: &InnerSession, generation: u64) -> bool {
    inner
        .active
        .as_ref()
        .map(|handle| handle.generation == generation)
        .unwrap_or(false)
}
