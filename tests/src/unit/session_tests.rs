use super::support::{seeded_credentials, wait_idle, HoldingChunkSource, ScriptedExchange};
use moneta_core::gateway::AuthGateway;
use moneta_core::storage::MemoryStore;
use moneta_core::stream::{ChunkSource, ScriptedChunkSource, StreamEvent};
use moneta_core::{
    ChatSession, ClientError, CredentialStore, SessionEvent, SessionPhase, TurnRole, TurnStatus,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

fn build_session(
    source: Arc<dyn ChunkSource>,
) -> (
    ChatSession,
    Arc<ScriptedExchange>,
    UnboundedReceiver<SessionEvent>,
) {
    let exchange = Arc::new(ScriptedExchange::default());
    let (gateway, events) = AuthGateway::new(exchange.clone(), seeded_credentials());
    (ChatSession::new(gateway, source), exchange, events)
}

#[tokio::test]
async fn chunks_concatenate_in_arrival_order() {
    let source = Arc::new(ScriptedChunkSource::new());
    source.enqueue(vec![
        StreamEvent::Chunk("Hel".into()),
        StreamEvent::Chunk("lo, ".into()),
        StreamEvent::Chunk("world".into()),
        StreamEvent::Complete,
    ]);
    let (session, _exchange, mut events) = build_session(source);

    assert!(session.send("what did I spend?").await.expect("send"));
    wait_idle(&session).await;

    let turns = session.turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, TurnRole::User);
    assert_eq!(turns[0].text, "what did I spend?");
    assert_eq!(turns[1].role, TurnRole::Assistant);
    assert_eq!(turns[1].text, "Hello, world");
    assert_eq!(turns[1].status, TurnStatus::Complete);

    match events.try_recv() {
        Ok(SessionEvent::TurnCompleted { turn_id }) => assert_eq!(turn_id, turns[1].id),
        other => panic!("expected TurnCompleted, got {other:?}"),
    }
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn stream_error_marks_turn_failed_and_keeps_partial_text() {
    let source = Arc::new(ScriptedChunkSource::new());
    source.enqueue(vec![
        StreamEvent::Chunk("Par".into()),
        StreamEvent::Error("connection reset".into()),
    ]);
    let (session, _exchange, mut events) = build_session(source);

    assert!(session.send("hello").await.expect("send"));
    wait_idle(&session).await;

    let turns = session.turns();
    assert_eq!(turns[1].text, "Par");
    assert_eq!(turns[1].status, TurnStatus::Failed);
    // A failed turn never completes.
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn send_while_streaming_is_a_noop() {
    let source = Arc::new(HoldingChunkSource::new(vec![
        StreamEvent::Chunk("done".into()),
        StreamEvent::Complete,
    ]));
    let (session, _exchange, _events) = build_session(source.clone());

    assert!(session.send("first").await.expect("first send"));
    assert_eq!(session.phase(), SessionPhase::Streaming);

    // The second send must not open a stream or create turns.
    assert!(!session.send("second").await.expect("second send"));
    assert_eq!(session.turns().len(), 2);

    source.release();
    wait_idle(&session).await;
    let turns = session.turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].text, "done");

    // Idle again: sending works once more.
    assert_eq!(session.turns()[1].status, TurnStatus::Complete);
}

#[tokio::test]
async fn empty_message_is_rejected_without_side_effects() {
    let source = Arc::new(ScriptedChunkSource::new());
    let (session, exchange, _events) = build_session(source);

    let err = session.send("   ").await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));
    assert!(session.turns().is_empty());
    assert_eq!(session.phase(), SessionPhase::Idle);
    assert!(exchange.calls_to("/chat/message").is_empty());
}

#[tokio::test]
async fn send_requires_a_signed_in_user() {
    let exchange = Arc::new(ScriptedExchange::default());
    let credentials =
        CredentialStore::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()));
    let (gateway, _events) = AuthGateway::new(exchange, credentials);
    let session = ChatSession::new(gateway, Arc::new(ScriptedChunkSource::new()));

    let err = session.send("hello").await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));
    assert!(session.turns().is_empty());
}

#[tokio::test]
async fn cancel_fails_the_pending_turn() {
    let source = Arc::new(HoldingChunkSource::new(vec![StreamEvent::Complete]));
    let (session, _exchange, mut events) = build_session(source);

    assert!(session.send("slow question").await.expect("send"));
    session.cancel();
    wait_idle(&session).await;

    let turns = session.turns();
    assert_eq!(turns[1].status, TurnStatus::Failed);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn reset_clears_turns_and_invalidates_server_session() {
    let source = Arc::new(ScriptedChunkSource::new());
    source.enqueue(vec![
        StreamEvent::Chunk("hi".into()),
        StreamEvent::Complete,
    ]);
    let (session, exchange, _events) = build_session(source);
    exchange.enqueue("/chat/reset", 200, json!({ "success": true, "data": null }));

    assert!(session.send("hello").await.expect("send"));
    wait_idle(&session).await;
    assert_eq!(session.turns().len(), 2);

    session.reset().await.expect("reset");
    assert!(session.turns().is_empty());

    let calls = exchange.calls_to("/chat/reset");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].body, Some(json!({ "userId": "u-1" })));
}

#[tokio::test]
async fn reset_is_rejected_while_streaming() {
    let source = Arc::new(HoldingChunkSource::new(vec![StreamEvent::Complete]));
    let (session, exchange, _events) = build_session(source.clone());

    assert!(session.send("hello").await.expect("send"));
    let err = session.reset().await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));
    assert!(exchange.calls_to("/chat/reset").is_empty());

    source.release();
    wait_idle(&session).await;
}

#[tokio::test]
async fn load_history_builds_completed_turn_pairs() {
    let source = Arc::new(ScriptedChunkSource::new());
    let (session, exchange, _events) = build_session(source);
    exchange.enqueue(
        "/chat/history/u-1",
        200,
        json!({
            "success": true,
            "data": [
                {
                    "id": 1,
                    "userId": "u-1",
                    "userMessage": "how much on groceries?",
                    "agentResponse": "You spent $240 on groceries.",
                    "createdAt": "2026-08-01T10:00:00Z"
                },
                {
                    "id": 2,
                    "userId": "u-1",
                    "userMessage": "and on rent?",
                    "agentResponse": "$1,200 this month.",
                    "createdAt": "2026-08-02T09:30:00Z",
                    "messageType": "expense"
                }
            ]
        }),
    );

    let count = session.load_history().await.expect("history");
    assert_eq!(count, 2);

    let turns = session.turns();
    assert_eq!(turns.len(), 4);
    assert_eq!(turns[0].role, TurnRole::User);
    assert_eq!(turns[0].text, "how much on groceries?");
    assert_eq!(turns[1].role, TurnRole::Assistant);
    assert_eq!(turns[1].text, "You spent $240 on groceries.");
    assert!(turns
        .iter()
        .all(|turn| turn.status == TurnStatus::Complete));
}

#[tokio::test]
async fn stats_passthrough_decodes_envelope() {
    let source = Arc::new(ScriptedChunkSource::new());
    let (session, exchange, _events) = build_session(source);
    exchange.enqueue(
        "/chat/stats/u-1",
        200,
        json!({
            "success": true,
            "data": {
                "totalMessages": 12,
                "sessionActive": true,
                "lastActivity": "2026-08-07T08:00:00Z"
            }
        }),
    );

    let stats = session.stats().await.expect("stats");
    assert_eq!(stats.total_messages, 12);
    assert!(stats.session_active);
}
