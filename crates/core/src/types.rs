use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A single conversational turn element, owned exclusively by its [`Session`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Agent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Never constructed by the gateway itself: the Session Store only ever
    /// persists a Message once it is already committed, so this state exists
    /// for a client's own optimistic local copy before that commit lands.
    Sending,
    Sent,
    Error,
}

impl Message {
    pub fn user(session_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            role: MessageRole::User,
            content: content.into(),
            timestamp: Utc::now(),
            status: MessageStatus::Sent,
            citations: Vec::new(),
        }
    }

    pub fn agent(session_id: Uuid, content: impl Into<String>, citations: Vec<Citation>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            role: MessageRole::Agent,
            content: content.into(),
            timestamp: Utc::now(),
            status: MessageStatus::Sent,
            citations,
        }
    }
}

/// A retrieved-knowledge reference attached to an agent chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Citation {
    pub source_id: String,
    pub source_name: String,
    pub excerpt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Value type at the adapter boundary: what a caller asks the remote agent to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInput {
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub knowledge_base_ids: Vec<String>,
    #[serde(default)]
    pub action_group_ids: Vec<String>,
}

/// A complete (non-streaming) agent reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub content: String,
    pub citations: Vec<Citation>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub request_id: String,
}

/// One event pulled off an agent stream, as delivered by the reader to the processor.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Content(String),
    Citation(Citation),
    Done,
}
