//! Gateway core: domain types, the closed error taxonomy, the retry combinator, and
//! the agent adapter/stream processor that talk to the remote agent. Nothing in this
//! crate knows about sessions, WebSockets, or HTTP — that lives in `gateway-backend`.

pub mod adapter;
pub mod bedrock;
pub mod error;
pub mod processor;
pub mod retry;
pub mod types;

pub use adapter::{AdapterConfig, AgentAdapter};
pub use bedrock::{ReadOutcome, StreamReader};
pub use error::{ErrorAggregator, ErrorKind, GatewayError, RemoteFault};
pub use processor::{process_stream, to_stream_event, ProcessedEvent, ProcessorConfig};
pub use retry::{retry_with_backoff, BackoffConfig};
pub use types::{AgentInput, AgentResponse, Citation, Message, MessageRole, MessageStatus, StreamEvent};
