//! Agent Adapter (§4.2): the only component that knows how to reach the remote agent.
//! Validates input, attaches a request id, retries transient failures, and never lets
//! a remote type escape past this module.

use crate::bedrock::{self, BedrockStreamReader, StreamReader};
use crate::error::{ErrorKind, GatewayError};
use crate::retry::{retry_with_backoff, BackoffConfig};
use crate::types::{AgentInput, AgentResponse, Citation};
use aws_sdk_bedrockagentruntime::Client;
use std::collections::HashMap;
use uuid::Uuid;

const MAX_MESSAGE_CHARS: usize = 25_000;

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub agent_id: String,
    pub agent_alias_id: String,
    pub backoff: BackoffConfig,
    /// Knowledge bases attached to every invocation unless the caller overrides
    /// them on the `AgentInput` itself (§6 `knowledge_base_id`).
    pub knowledge_base_ids: Vec<String>,
}

/// Thin, cloneable handle shared across every connection's duplex task.
///
/// Error aggregation (§4.4) is deliberately *not* owned here: this adapter is
/// shared process-wide, and counting errors against a process-wide key would
/// make it cross-connection mutable state beyond the Session Store (§5). The
/// caller aggregates per-session instead, keyed off its own session record.
#[derive(Clone)]
pub struct AgentAdapter {
    client: Client,
    config: AdapterConfig,
}

impl AgentAdapter {
    pub fn new(client: Client, config: AdapterConfig) -> Self {
        Self { client, config }
    }

    /// Knowledge bases configured as the default for every invocation (§6).
    pub fn default_knowledge_base_ids(&self) -> &[String] {
        &self.config.knowledge_base_ids
    }

    pub async fn connect(region: &str, config: AdapterConfig) -> Self {
        let client = bedrock::build_client(region).await;
        Self::new(client, config)
    }

    /// A single non-streaming turn. Retries transient failures with backoff.
    pub async fn invoke(&self, input: &AgentInput) -> Result<AgentResponse, GatewayError> {
        validate_input(input)?;
        let request_id = Uuid::new_v4().to_string();

        retry_with_backoff(self.config.backoff, "invoke_agent", &request_id, || {
            self.invoke_once(input, &request_id)
        })
        .await
    }

    /// Opens a streaming turn and returns the pull interface the stream processor
    /// consumes. Only the initial invoke call (establishing the stream) is retried;
    /// once bytes start flowing, a mid-stream failure is the processor's concern.
    pub async fn invoke_stream(
        &self,
        input: &AgentInput,
    ) -> Result<Box<dyn StreamReader>, GatewayError> {
        validate_input(input)?;
        let request_id = Uuid::new_v4().to_string();

        let reader = retry_with_backoff(self.config.backoff, "invoke_agent_stream", &request_id, || {
            self.open_stream(input, &request_id)
        })
        .await?;

        Ok(Box::new(reader))
    }

    async fn invoke_once(
        &self,
        input: &AgentInput,
        request_id: &str,
    ) -> Result<AgentResponse, GatewayError> {
        let reader = self.open_stream(input, request_id).await?;
        collect_stream(reader, request_id).await
    }

    async fn open_stream(
        &self,
        input: &AgentInput,
        request_id: &str,
    ) -> Result<BedrockStreamReader, GatewayError> {
        let mut req = self
            .client
            .invoke_agent()
            .agent_id(&self.config.agent_id)
            .agent_alias_id(&self.config.agent_alias_id)
            .session_id(&input.session_id)
            .input_text(&input.message)
            .enable_trace(false);

        let mut session_state = None;
        if !input.knowledge_base_ids.is_empty() {
            let mut builder = aws_sdk_bedrockagentruntime::types::SessionState::builder();
            for kb_id in &input.knowledge_base_ids {
                builder = builder.knowledge_base_configurations(
                    aws_sdk_bedrockagentruntime::types::KnowledgeBaseConfiguration::builder()
                        .knowledge_base_id(kb_id)
                        .build()
                        .map_err(|e| GatewayError::new(ErrorKind::InvalidInput, e.to_string()))?,
                );
            }
            session_state = Some(builder);
        }
        if !input.action_group_ids.is_empty() {
            let builder = session_state
                .take()
                .unwrap_or_else(aws_sdk_bedrockagentruntime::types::SessionState::builder);
            let mut attrs = HashMap::new();
            attrs.insert(
                "requested_action_group_ids".to_string(),
                input.action_group_ids.join(","),
            );
            session_state = Some(builder.session_attributes(attrs));
        }
        if let Some(builder) = session_state {
            req = req.session_state(builder.build());
        }

        let output = req
            .send()
            .await
            .map_err(|err| bedrock::classify_invoke_error(err, request_id))?;

        Ok(BedrockStreamReader::new(
            output.completion,
            request_id.to_string(),
        ))
    }
}

/// Drains a reader to completion for the non-streaming invoke path.
async fn collect_stream(
    mut reader: BedrockStreamReader,
    request_id: &str,
) -> Result<AgentResponse, GatewayError> {
    let mut content = String::new();
    let mut citations: Vec<Citation> = Vec::new();

    loop {
        match reader.read().await? {
            bedrock::ReadOutcome::Chunk(chunk) => {
                content.push_str(&chunk);
                while let Some(citation) = reader.read_citation().await {
                    citations.push(citation);
                }
            }
            bedrock::ReadOutcome::Done => break,
        }
    }
    reader.close().await?;

    Ok(AgentResponse {
        content,
        citations,
        metadata: Default::default(),
        request_id: request_id.to_string(),
    })
}

/// Rejects obviously-invalid input before it ever reaches the network (§4.2 edge cases).
/// All three rules here produce `invalid_input`: `invalid_session` (§4.4) is reserved for
/// "no such session or expired", a Session Store lookup this adapter never performs.
fn validate_input(input: &AgentInput) -> Result<(), GatewayError> {
    if input.session_id.trim().is_empty() {
        return Err(GatewayError::new(ErrorKind::InvalidInput, "session_id is empty"));
    }
    if input.message.trim().is_empty() {
        return Err(GatewayError::new(ErrorKind::InvalidInput, "message is empty"));
    }
    if input.message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(GatewayError::new(
            ErrorKind::InvalidInput,
            format!("message exceeds {MAX_MESSAGE_CHARS} characters"),
        ));
    }
    if Uuid::parse_str(&input.session_id).is_err() {
        return Err(GatewayError::new(ErrorKind::InvalidInput, "malformed session id"));
    }
    for kb_id in &input.knowledge_base_ids {
        if kb_id.is_empty() || kb_id.chars().any(|c| c.is_control()) {
            return Err(GatewayError::new(
                ErrorKind::InvalidInput,
                "knowledge_base_id is empty or contains control characters",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_message() {
        let input = AgentInput {
            session_id: Uuid::new_v4().to_string(),
            message: "   ".to_string(),
            knowledge_base_ids: vec![],
            action_group_ids: vec![],
        };
        let err = validate_input(&input).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn rejects_oversized_message() {
        let input = AgentInput {
            session_id: Uuid::new_v4().to_string(),
            message: "a".repeat(MAX_MESSAGE_CHARS + 1),
            knowledge_base_ids: vec![],
            action_group_ids: vec![],
        };
        let err = validate_input(&input).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn rejects_malformed_session_id() {
        let input = AgentInput {
            session_id: "not-a-uuid".to_string(),
            message: "hello".to_string(),
            knowledge_base_ids: vec![],
            action_group_ids: vec![],
        };
        let err = validate_input(&input).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn rejects_knowledge_base_id_with_control_chars() {
        let input = AgentInput {
            session_id: Uuid::new_v4().to_string(),
            message: "hello".to_string(),
            knowledge_base_ids: vec!["kb\n1".to_string()],
            action_group_ids: vec![],
        };
        let err = validate_input(&input).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn rejects_empty_knowledge_base_id() {
        let input = AgentInput {
            session_id: Uuid::new_v4().to_string(),
            message: "hello".to_string(),
            knowledge_base_ids: vec!["".to_string()],
            action_group_ids: vec![],
        };
        let err = validate_input(&input).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn accepts_well_formed_input() {
        let input = AgentInput {
            session_id: Uuid::new_v4().to_string(),
            message: "hello there".to_string(),
            knowledge_base_ids: vec!["kb-1".to_string()],
            action_group_ids: vec![],
        };
        assert!(validate_input(&input).is_ok());
    }
}
