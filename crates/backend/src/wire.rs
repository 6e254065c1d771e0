//! Client-frame wire protocol (§6): the JSON shapes that cross the duplex transport.

use gateway_core::{Citation, GatewayError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the client sends on the duplex connection.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingFrame {
    pub session_id: Uuid,
    pub content: String,
}

/// What the server writes back, one tagged variant per §6.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Content { content: String },
    Citation { citation: Citation },
    Done,
    Error { error: ErrorBody },
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&GatewayError> for ErrorBody {
    fn from(err: &GatewayError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            retryable: err.retryable,
            details: err.details.clone(),
        }
    }
}

impl ServerFrame {
    pub fn content(text: impl Into<String>) -> Self {
        ServerFrame::Content { content: text.into() }
    }

    pub fn citation(citation: Citation) -> Self {
        ServerFrame::Citation { citation }
    }

    pub fn error(err: &GatewayError) -> Self {
        ServerFrame::Error { error: err.into() }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ServerFrame is always serializable")
    }
}
