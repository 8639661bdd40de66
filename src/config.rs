//! Environment-driven configuration.
//!
//! Everything is read once at startup via [`Config::from_env`]; components
//! receive their slice of the config by value. `.env` files are honored in
//! `main` through `dotenvy` before this module runs.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Top-level configuration for the binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub transport: TransportConfig,
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    url: String,
    pub pool_size: usize,
}

impl DatabaseConfig {
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Settings for the OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[redacted]"))
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
}

/// Orchestration knobs.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Retries after the initial retrieval attempt before the self-RAG loop
    /// gives up. Total retrieval attempts = this value + 1.
    pub max_rag_retries: u32,
    /// Upper bound on reasoning-step invocations per submission. Guards
    /// against a model that never stops calling tools; the graph itself has
    /// no cycle limit.
    pub max_reason_turns: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rag_retries: 2,
            max_reason_turns: 8,
        }
    }
}

/// Per-tracker transport pool settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Fixed retry count for transient failures (5xx, connect errors).
    pub retries: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 8,
            idle_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            retries: 2,
        }
    }
}

fn require(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnv(key.to_string()))
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        reason: format!("could not parse '{value}'"),
    })
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database = DatabaseConfig {
            url: require("DATABASE_URL")?,
            pool_size: match optional("DATABASE_POOL_SIZE") {
                Some(v) => parse("DATABASE_POOL_SIZE", v)?,
                None => 16,
            },
        };

        let llm = LlmConfig {
            base_url: optional("LLM_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            model: optional("LLM_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
            api_key: optional("LLM_API_KEY").map(SecretString::from),
            request_timeout: Duration::from_secs(120),
        };

        let server = ServerConfig {
            bind_addr: optional("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let mut agent = AgentConfig::default();
        if let Some(v) = optional("AGENT_MAX_RAG_RETRIES") {
            agent.max_rag_retries = parse("AGENT_MAX_RAG_RETRIES", v)?;
        }
        if let Some(v) = optional("AGENT_MAX_REASON_TURNS") {
            agent.max_reason_turns = parse("AGENT_MAX_REASON_TURNS", v)?;
        }

        Ok(Self {
            database,
            llm,
            server,
            agent,
            transport: TransportConfig::default(),
        })
    }
}
