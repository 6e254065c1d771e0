//! Duplex-turn orchestration (§4.5 steps 1-7): glues the session store, the agent
//! adapter, and the stream processor together for a single client message. The
//! WebSocket upgrade itself lives in the binary; this module is transport-agnostic —
//! it only needs somewhere to send [`ServerFrame`]s.

use crate::session::SessionStore;
use crate::wire::{IncomingFrame, ServerFrame};
use futures::StreamExt;
use gateway_core::{
    process_stream, AgentAdapter, AgentInput, ErrorKind, GatewayError, Message, MessageStatus,
    ProcessedEvent, ProcessorConfig,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Transport-boundary content cap (§4.5), tighter than the adapter's own 25 000-unit
/// ceiling on `message` (§4.2).
const MAX_CONTENT_LEN: usize = 2_000;

#[derive(Clone)]
pub struct TurnContext {
    pub store: Arc<SessionStore>,
    pub adapter: AgentAdapter,
    pub processor_config: ProcessorConfig,
}

/// Parses, validates, and drives one client message to its terminal frame,
/// streaming every intermediate frame to `out` as it becomes available. Never
/// panics and never leaves the connection without a caller-visible frame.
///
/// `cancel` is the connection's scoped lifetime (§5): if it fires while the
/// remote invocation or the stream drain is in flight, both are abandoned
/// without emitting any further frame — the transport is already gone.
pub async fn process_client_message(
    ctx: &TurnContext,
    raw: &str,
    out: &mpsc::Sender<ServerFrame>,
    cancel: &CancellationToken,
) {
    let frame: IncomingFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(_) => {
            send(out, ServerFrame::error(&GatewayError::new(
                ErrorKind::MalformedResponse,
                "could not parse client frame",
            )))
            .await;
            return;
        }
    };

    if let Err(err) = validate_content(&frame.content) {
        send(out, ServerFrame::error(&err)).await;
        return;
    }

    let Some(session) = ctx.store.find(frame.session_id) else {
        send(out, ServerFrame::error(&GatewayError::new(
            ErrorKind::InvalidSession,
            "no such session",
        )))
        .await;
        return;
    };

    let user_message = Message::user(session.id, frame.content.clone());
    if ctx.store.append_message(user_message).is_err() {
        send(out, ServerFrame::error(&GatewayError::new(
            ErrorKind::InvalidSession,
            "session no longer exists",
        )))
        .await;
        return;
    }

    let input = AgentInput {
        session_id: session.id.to_string(),
        message: frame.content,
        knowledge_base_ids: ctx.adapter.default_knowledge_base_ids().to_vec(),
        action_group_ids: vec![],
    };

    let reader = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        result = ctx.adapter.invoke_stream(&input) => result,
    };
    let reader = match reader {
        Ok(reader) => reader,
        Err(err) => {
            send_aggregated(ctx, out, session.id, err).await;
            return;
        }
    };

    let mut stream = Box::pin(process_stream(reader, ctx.processor_config, cancel.clone()));
    let mut accumulated = String::new();
    let mut citations = Vec::new();
    let mut had_error = false;

    while let Some(event) = stream.next().await {
        match event {
            ProcessedEvent::Content(text) => {
                accumulated.push_str(&text);
                send(out, ServerFrame::content(text)).await;
            }
            ProcessedEvent::Citation(citation) => {
                citations.push(citation.clone());
                send(out, ServerFrame::citation(citation)).await;
            }
            ProcessedEvent::Done => {
                send(out, ServerFrame::Done).await;
            }
            ProcessedEvent::Error(err) => {
                had_error = true;
                send_aggregated(ctx, out, session.id, err).await;
            }
        }
    }

    // §4.3 content preservation: whatever arrived before a terminal error is still
    // recorded, so a later `get_messages` reflects exactly what the client saw.
    let mut agent_message = Message::agent(session.id, accumulated, citations);
    if had_error {
        agent_message.status = MessageStatus::Error;
    }
    let _ = ctx.store.append_message(agent_message);
}

/// Records `err` against `session_id`'s own aggregation window (§4.4) before
/// forwarding it to the client, attaching a repeat count once a burst of the
/// same code has been seen more than once.
async fn send_aggregated(
    ctx: &TurnContext,
    out: &mpsc::Sender<ServerFrame>,
    session_id: uuid::Uuid,
    err: GatewayError,
) {
    let err = match ctx.store.record_error(session_id, err.kind()) {
        Ok(count) if count > 1 => err.with_details(serde_json::json!({ "repeat_count": count })),
        _ => err,
    };
    send(out, ServerFrame::error(&err)).await;
}

fn validate_content(content: &str) -> Result<(), GatewayError> {
    if content.trim().is_empty() {
        return Err(GatewayError::new(ErrorKind::InvalidInput, "content is empty"));
    }
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(GatewayError::new(
            ErrorKind::InvalidInput,
            format!("content exceeds {MAX_CONTENT_LEN} code units"),
        ));
    }
    Ok(())
}

async fn send(out: &mpsc::Sender<ServerFrame>, frame: ServerFrame) {
    if out.send(frame).await.is_err() {
        tracing::debug!("client transport gone, dropping frame");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use gateway_core::{AdapterConfig, BackoffConfig};
    use std::time::Duration;

    async fn context_without_adapter_calls() -> (Arc<SessionStore>, Session) {
        let store = Arc::new(SessionStore::new(Duration::from_secs(1800)));
        let session = Session::new();
        store.create(session.clone()).unwrap();
        (store, session)
    }

    #[tokio::test]
    async fn malformed_json_emits_malformed_response_and_leaves_store_untouched() {
        let (store, session) = context_without_adapter_calls().await;
        let (tx, mut rx) = mpsc::channel(8);
        let ctx = TurnContext {
            store: store.clone(),
            adapter: unreachable_adapter(),
            processor_config: ProcessorConfig::default(),
        };

        process_client_message(&ctx, "not-json{", &tx, &CancellationToken::new()).await;
        drop(tx);

        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame, ServerFrame::Error { .. }));
        assert_eq!(store.get_messages(session.id).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn blank_content_is_rejected_before_any_adapter_call() {
        let (store, session) = context_without_adapter_calls().await;
        let (tx, mut rx) = mpsc::channel(8);
        let ctx = TurnContext {
            store: store.clone(),
            adapter: unreachable_adapter(),
            processor_config: ProcessorConfig::default(),
        };
        let raw = serde_json::json!({ "session_id": session.id, "content": "   " }).to_string();

        process_client_message(&ctx, &raw, &tx, &CancellationToken::new()).await;
        drop(tx);

        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame, ServerFrame::Error { .. }));
    }

    #[tokio::test]
    async fn unknown_session_is_rejected() {
        let store = Arc::new(SessionStore::new(Duration::from_secs(1800)));
        let (tx, mut rx) = mpsc::channel(8);
        let ctx = TurnContext {
            store,
            adapter: unreachable_adapter(),
            processor_config: ProcessorConfig::default(),
        };
        let raw = serde_json::json!({ "session_id": uuid::Uuid::new_v4(), "content": "hi" }).to_string();

        process_client_message(&ctx, &raw, &tx, &CancellationToken::new()).await;
        drop(tx);

        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame, ServerFrame::Error { .. }));
    }

    /// Builds an adapter pointed at a client that will never actually be invoked in
    /// these tests (all three scenarios above fail validation before reaching it).
    fn unreachable_adapter() -> AgentAdapter {
        AgentAdapter::new(
            aws_sdk_bedrockagentruntime::Client::from_conf(
                aws_sdk_bedrockagentruntime::Config::builder()
                    .behavior_version(aws_sdk_bedrockagentruntime::config::BehaviorVersion::latest())
                    .region(aws_sdk_bedrockagentruntime::config::Region::new("us-east-1"))
                    .credentials_provider(aws_sdk_bedrockagentruntime::config::Credentials::new(
                        "test", "test", None, None, "test",
                    ))
                    .build(),
            ),
            AdapterConfig {
                agent_id: "test-agent".to_string(),
                agent_alias_id: "test-alias".to_string(),
                backoff: BackoffConfig::default(),
                knowledge_base_ids: vec![],
            },
        )
    }
}
