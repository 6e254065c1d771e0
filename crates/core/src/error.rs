//! The closed error taxonomy that crosses every public boundary in the gateway.
//!
//! Every component translates foreign errors *inbound* into an [`ErrorKind`]; nothing
//! outbound-facing ever exposes a remote SDK type, a file path, or a stack frame.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// The entire vocabulary of domain errors. No open inheritance, no catch-all string enum.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, Error)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[error("invalid input")]
    InvalidInput,
    #[error("invalid or expired session")]
    InvalidSession,
    #[error("rate limited")]
    RateLimit,
    #[error("server error")]
    ServerError,
    #[error("network error")]
    NetworkError,
    #[error("timeout")]
    Timeout,
    #[error("stream interrupted")]
    StreamInterrupted,
    #[error("malformed response")]
    MalformedResponse,
    #[error("unauthorized")]
    Unauthorized,
    #[error("unknown error")]
    Unknown,
}

impl ErrorKind {
    /// Whether a caller may sensibly resubmit the same request later.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit
                | ErrorKind::ServerError
                | ErrorKind::NetworkError
                | ErrorKind::Timeout
                | ErrorKind::StreamInterrupted
        )
    }

    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::InvalidSession => "invalid_session",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::ServerError => "server_error",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::StreamInterrupted => "stream_interrupted",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Unknown => "unknown_error",
        }
    }
}

/// A classified, sanitized error ready to cross a public boundary.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayError {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: kind.code(),
            message: sanitize(&message.into()),
            retryable: kind.retryable(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        // The code is always produced by `ErrorKind::code`, so this round-trips exactly.
        match self.code {
            "invalid_input" => ErrorKind::InvalidInput,
            "invalid_session" => ErrorKind::InvalidSession,
            "rate_limit" => ErrorKind::RateLimit,
            "server_error" => ErrorKind::ServerError,
            "network_error" => ErrorKind::NetworkError,
            "timeout" => ErrorKind::Timeout,
            "stream_interrupted" => ErrorKind::StreamInterrupted,
            "malformed_response" => ErrorKind::MalformedResponse,
            "unauthorized" => ErrorKind::Unauthorized,
            _ => ErrorKind::Unknown,
        }
    }
}

/// Strips anything that would leak implementation details from a user-visible message:
/// absolute file paths, `at file:line:col` stack frames, and bare HTTP status numbers.
/// The raw cause should already have been logged with a request id before calling this.
pub fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if is_stack_frame(trimmed) || is_file_path(trimmed) {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(trimmed);
    }
    let out = strip_status_codes(&out);
    if out.is_empty() {
        "an internal error occurred".to_string()
    } else {
        out
    }
}

fn is_stack_frame(s: &str) -> bool {
    // "at path/to/file.rs:12:5" style frames.
    if let Some(rest) = s.strip_prefix("at ") {
        return rest
            .rsplit_once(':')
            .map(|(_, col)| col.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false)
            || rest.contains(".rs:")
            || rest.contains(".go:");
    }
    false
}

fn is_file_path(s: &str) -> bool {
    s.starts_with('/') && s.len() > 1
}

fn strip_status_codes(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for word in s.split_whitespace() {
        let bare = word.trim_matches(|c: char| !c.is_ascii_alphanumeric());
        let looks_like_status = bare.len() == 3
            && bare.chars().all(|c| c.is_ascii_digit())
            && matches!(bare.as_bytes()[0], b'1'..=b'5');
        if looks_like_status {
            continue;
        }
        if !result.is_empty() {
            result.push(' ');
        }
        result.push_str(word);
    }
    result
}

/// Translation rules from a remote agent's discriminable error kind (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFault {
    Throttling,
    Validation,
    AccessDenied,
    ServiceUnavailable,
    Other,
}

impl From<RemoteFault> for ErrorKind {
    fn from(fault: RemoteFault) -> Self {
        match fault {
            RemoteFault::Throttling => ErrorKind::RateLimit,
            RemoteFault::Validation => ErrorKind::InvalidInput,
            RemoteFault::AccessDenied => ErrorKind::Unauthorized,
            RemoteFault::ServiceUnavailable => ErrorKind::ServerError,
            RemoteFault::Other => ErrorKind::Unknown,
        }
    }
}

/// Aggregates bursts of same-code errors within a short window so a consumer sees a
/// count instead of N duplicate frames. Window length is an implementation choice
/// (spec leaves 2s vs 5s unresolved); fixed at 2s here, see DESIGN.md.
pub struct ErrorAggregator {
    window: Duration,
    inner: Mutex<HashMap<&'static str, (Instant, usize)>>,
}

impl ErrorAggregator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Records one occurrence of `kind` and returns the count to attach to the
    /// emitted error (1 on a fresh window, otherwise the running count).
    pub fn record(&self, kind: ErrorKind) -> usize {
        let mut guard = self.inner.lock().expect("error aggregator poisoned");
        let now = Instant::now();
        let entry = guard.entry(kind.code()).or_insert((now, 0));
        if now.duration_since(entry.0) > self.window {
            *entry = (now, 1);
        } else {
            entry.1 += 1;
        }
        entry.1
    }
}

impl Default for ErrorAggregator {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}
