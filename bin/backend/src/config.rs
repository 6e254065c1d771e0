//! Typed configuration assembled from process environment variables (§6). Parsing
//! failures and missing required fields are reported as a single [`ConfigError`] so
//! `main` can abort the process with one descriptive message before the listener
//! binds (§7 "fatal classes").

use gateway_core::{AdapterConfig, BackoffConfig};
use gateway_backend::session::SessionStore;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl std::str::FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(Environment::Development),
            "production" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(ConfigError::InvalidValue {
                key: "environment",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub server_host: String,
    pub server_port: u16,
    pub aws_region: String,
    pub agent_id: String,
    pub agent_alias_id: String,
    pub knowledge_base_id: Option<String>,
    pub bedrock_max_retries: u32,
    pub bedrock_initial_backoff: Duration,
    pub bedrock_max_backoff: Duration,
    pub bedrock_request_timeout: Duration,
    pub ws_timeout: Duration,
    pub ws_stream_timeout: Duration,
    pub ws_chunk_timeout: Duration,
    pub ws_buffer_size: usize,
    pub session_timeout: Duration,
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl Config {
    /// Loads `.env` (if present) then reads process environment, validating every
    /// required field up front so a single error describes every problem found.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let environment: Environment = require("environment")?.parse()?;

        let agent_required = environment == Environment::Production;
        let agent_id = optional("agent_id").unwrap_or_default();
        let agent_alias_id = optional("agent_alias_id").unwrap_or_default();
        if agent_required && agent_id.is_empty() {
            return Err(ConfigError::Missing("agent_id"));
        }
        if agent_required && agent_alias_id.is_empty() {
            return Err(ConfigError::Missing("agent_alias_id"));
        }

        Ok(Self {
            environment,
            server_host: optional("server_host").unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port: parse_or_default("server_port", 8080)?,
            aws_region: require("aws_region")?,
            agent_id,
            agent_alias_id,
            knowledge_base_id: optional("knowledge_base_id"),
            bedrock_max_retries: parse_or_default("bedrock_max_retries", 3)?,
            bedrock_initial_backoff: secs_or_default("bedrock_initial_backoff", 1)?,
            bedrock_max_backoff: secs_or_default("bedrock_max_backoff", 30)?,
            bedrock_request_timeout: secs_or_default("bedrock_request_timeout", 60)?,
            ws_timeout: secs_or_default("ws_timeout", 60)?,
            ws_stream_timeout: secs_or_default("ws_stream_timeout", 300)?,
            ws_chunk_timeout: secs_or_default("ws_chunk_timeout", 30)?,
            ws_buffer_size: parse_or_default("ws_buffer_size", 64)?,
            session_timeout: secs_or_default("session_timeout", 1800)?,
            log_level: optional("log_level").unwrap_or_else(|| "info".to_string()),
            log_format: match optional("log_format").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Compact,
            },
        })
    }

    pub fn adapter_config(&self) -> AdapterConfig {
        AdapterConfig {
            agent_id: self.agent_id.clone(),
            agent_alias_id: self.agent_alias_id.clone(),
            backoff: BackoffConfig {
                initial: self.bedrock_initial_backoff,
                max: self.bedrock_max_backoff,
                max_retries: self.bedrock_max_retries,
            },
            knowledge_base_ids: self.knowledge_base_id.clone().into_iter().collect(),
        }
    }

    pub fn session_store(&self) -> SessionStore {
        SessionStore::new(self.session_timeout)
    }
}

fn env_key(key: &str) -> String {
    format!("GATEWAY_{}", key.to_uppercase())
}

fn optional(key: &str) -> Option<String> {
    std::env::var(env_key(key)).ok().filter(|v| !v.is_empty())
}

fn require(key: &'static str) -> Result<String, ConfigError> {
    optional(key).ok_or(ConfigError::Missing(key))
}

fn parse_or_default<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key,
            value: raw,
        }),
        None => Ok(default),
    }
}

fn secs_or_default(key: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    parse_or_default::<u64>(key, default_secs).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable mutation is process-global; serialize config tests.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_gateway_env() {
        for (k, _) in std::env::vars() {
            if k.starts_with("GATEWAY_") {
                std::env::remove_var(k);
            }
        }
    }

    #[test]
    fn missing_environment_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_gateway_env();
        let err = Config::load().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("environment")));
    }

    #[test]
    fn development_does_not_require_agent_ids() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_gateway_env();
        std::env::set_var("GATEWAY_ENVIRONMENT", "development");
        std::env::set_var("GATEWAY_AWS_REGION", "us-east-1");
        let cfg = Config::load().unwrap();
        assert_eq!(cfg.environment, Environment::Development);
        assert_eq!(cfg.server_port, 8080);
        clear_gateway_env();
    }

    #[test]
    fn production_requires_agent_ids() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_gateway_env();
        std::env::set_var("GATEWAY_ENVIRONMENT", "production");
        std::env::set_var("GATEWAY_AWS_REGION", "us-east-1");
        let err = Config::load().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("agent_id")));
        clear_gateway_env();
    }

    #[test]
    fn invalid_environment_value_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_gateway_env();
        std::env::set_var("GATEWAY_ENVIRONMENT", "staging");
        std::env::set_var("GATEWAY_AWS_REGION", "us-east-1");
        let err = Config::load().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "environment", .. }));
        clear_gateway_env();
    }
}
