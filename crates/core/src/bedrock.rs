//! Thin wrapper around `aws-sdk-bedrockagentruntime`. This is the only module that
//! knows the remote SDK exists; everything above it sees [`StreamReader`] and
//! [`GatewayError`] only (§4.2: "the adapter never exposes remote-SDK types to callers").

use crate::error::{ErrorKind, GatewayError, RemoteFault};
use crate::types::Citation;
use async_trait::async_trait;
use aws_sdk_bedrockagentruntime::error::SdkError;
use aws_sdk_bedrockagentruntime::operation::invoke_agent::InvokeAgentError;
use aws_sdk_bedrockagentruntime::types::{ResponseStream, RetrievalResultContent};
use aws_sdk_bedrockagentruntime::Client;
use std::collections::HashMap;
use uuid::Uuid;

/// One fully-materialized pull from the remote stream.
pub enum ReadOutcome {
    Chunk(String),
    Done,
}

/// Pull interface consumed by the stream processor. A `read()` call may also make a
/// citation available; `read_citation()` drains whatever arrived alongside the last
/// content read (best-effort pairing, see spec Open Questions).
#[async_trait]
pub trait StreamReader: Send {
    async fn read(&mut self) -> Result<ReadOutcome, GatewayError>;
    async fn read_citation(&mut self) -> Option<Citation>;
    async fn close(&mut self) -> Result<(), GatewayError>;
}

pub struct BedrockStreamReader {
    inner: aws_sdk_bedrockagentruntime::event_receiver::EventReceiver<
        ResponseStream,
        aws_sdk_bedrockagentruntime::types::error::ResponseStreamError,
    >,
    pending_citations: Vec<Citation>,
    request_id: String,
}

impl BedrockStreamReader {
    pub fn new(
        inner: aws_sdk_bedrockagentruntime::event_receiver::EventReceiver<
            ResponseStream,
            aws_sdk_bedrockagentruntime::types::error::ResponseStreamError,
        >,
        request_id: String,
    ) -> Self {
        Self {
            inner,
            pending_citations: Vec::new(),
            request_id,
        }
    }
}

#[async_trait]
impl StreamReader for BedrockStreamReader {
    async fn read(&mut self) -> Result<ReadOutcome, GatewayError> {
        loop {
            match self.inner.recv().await {
                Ok(Some(ResponseStream::Chunk(part))) => {
                    if let Some(attribution) = part.attribution() {
                        for citation in attribution.citations() {
                            self.pending_citations
                                .push(translate_citation(citation));
                        }
                    }
                    let text = part
                        .bytes()
                        .map(|blob| String::from_utf8_lossy(blob.as_ref()).into_owned())
                        .unwrap_or_default();
                    if !text.is_empty() {
                        return Ok(ReadOutcome::Chunk(text));
                    }
                    // An empty/metadata-only chunk; keep draining.
                }
                Ok(Some(_other)) => {
                    // Trace / return-control / files events carry no client-visible content.
                    continue;
                }
                Ok(None) => return Ok(ReadOutcome::Done),
                Err(err) => return Err(classify_stream_error(err, &self.request_id)),
            }
        }
    }

    async fn read_citation(&mut self) -> Option<Citation> {
        if self.pending_citations.is_empty() {
            None
        } else {
            Some(self.pending_citations.remove(0))
        }
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        // The SDK stream has no explicit close; dropping the receiver releases the
        // underlying HTTP/2 stream. Nothing to flush.
        Ok(())
    }
}

fn translate_citation(citation: &aws_sdk_bedrockagentruntime::types::Citation) -> Citation {
    let mut out = Citation::default();
    let Some(retrieved_refs) = citation.retrieved_references().first() else {
        return out;
    };

    if let Some(location) = retrieved_refs.location() {
        if let Some(s3) = location.s3_location() {
            out.url = s3.uri().map(str::to_string);
        }
    }

    if let Some(content) = retrieved_refs.content() {
        out.excerpt = extract_text(content);
    }

    if let Some(metadata) = retrieved_refs.metadata() {
        let mut map = HashMap::new();
        for (k, v) in metadata {
            map.insert(k.clone(), document_to_json(v));
        }
        out.source_name = map
            .get("x-amz-bedrock-kb-source-uri")
            .and_then(|v| v.as_str())
            .unwrap_or("knowledge-base")
            .to_string();
        out.metadata = Some(map);
    }

    out.source_id = Uuid::new_v4().to_string();
    if out.source_name.is_empty() {
        out.source_name = "knowledge-base".to_string();
    }
    out
}

fn extract_text(content: &RetrievalResultContent) -> String {
    content.text().unwrap_or_default().to_string()
}

fn document_to_json(doc: &aws_smithy_types::Document) -> serde_json::Value {
    serde_json::to_value(doc).unwrap_or(serde_json::Value::Null)
}

/// Classifies any invoke-time SDK error (§4.4 translation rules).
pub fn classify_invoke_error(err: SdkError<InvokeAgentError>, request_id: &str) -> GatewayError {
    let fault = match err.as_service_error() {
        Some(e) if e.is_throttling_exception() => RemoteFault::Throttling,
        Some(e) if e.is_validation_exception() => RemoteFault::Validation,
        Some(e) if e.is_access_denied_exception() => RemoteFault::AccessDenied,
        Some(e) if e.is_service_quota_exceeded_exception() => RemoteFault::ServiceUnavailable,
        Some(e) if e.is_internal_server_exception() => RemoteFault::ServiceUnavailable,
        Some(e) if e.is_dependency_failed_exception() => RemoteFault::ServiceUnavailable,
        None if err.is_timeout_error() => {
            tracing::warn!(request_id, "bedrock invoke timed out locally");
            return GatewayError::new(ErrorKind::Timeout, "request timed out");
        }
        None if err.is_io_error() => RemoteFault::ServiceUnavailable,
        _ => RemoteFault::Other,
    };
    tracing::error!(request_id, cause = %err, "bedrock invoke failed");
    GatewayError::new(ErrorKind::from(fault), err.to_string())
}

fn classify_stream_error(
    err: SdkError<aws_sdk_bedrockagentruntime::types::error::ResponseStreamError>,
    request_id: &str,
) -> GatewayError {
    tracing::error!(request_id, cause = %err, "bedrock response stream errored");
    GatewayError::new(ErrorKind::StreamInterrupted, err.to_string())
}

/// Constructs an AWS SDK Bedrock Agent Runtime client from the ambient config chain.
pub async fn build_client(region: &str) -> Client {
    let shared_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()))
        .load()
        .await;
    Client::new(&shared_config)
}
