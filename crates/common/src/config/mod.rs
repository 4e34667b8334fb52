//! Configuration management for DisasterShift services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values

use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Precomputed model output datasets
    #[serde(default)]
    pub data: DataConfig,

    /// Knowledge index configuration
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Generation backend configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds (non-streaming endpoints)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Allowed CORS origins; empty allows any
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataConfig {
    /// Employment-impact predictions (one entry per disaster x county)
    #[serde(default = "default_predictions_path")]
    pub predictions_path: PathBuf,

    /// Seasonal frequency forecasts keyed "{STATE}_{Type}"
    #[serde(default = "default_forecasts_path")]
    pub forecasts_path: PathBuf,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeBackend {
    /// JSON snapshot loaded into memory
    Memory,
    /// Postgres table with a pgvector column
    Pgvector,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_knowledge_backend")]
    pub backend: KnowledgeBackend,

    /// Snapshot path for the memory backend
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    /// Database URL for the pgvector backend
    pub database_url: Option<String>,

    /// Table holding the chunks for the pgvector backend
    #[serde(default = "default_knowledge_table")]
    pub table: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Default number of chunks retrieved per question
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: ollama, openai, hashing
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key (openai-compatible endpoints)
    pub api_key: Option<String>,

    /// API base URL
    pub api_base: Option<String>,

    /// Model to use; must match the model the knowledge index was built with
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    /// Ollama running next to the service
    Local,
    /// Anthropic Messages API
    Claude,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: LlmProvider,

    #[serde(default = "default_ollama_base_url")]
    pub ollama_base_url: String,

    #[serde(default = "default_ollama_model")]
    pub ollama_model: String,

    pub anthropic_api_key: Option<String>,

    #[serde(default = "default_anthropic_base_url")]
    pub anthropic_base_url: String,

    #[serde(default = "default_anthropic_model")]
    pub anthropic_model: String,

    #[serde(default = "default_anthropic_version")]
    pub anthropic_version: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Connect timeout; generation itself is externally paced and unbounded
    #[serde(default = "default_llm_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (global)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://localhost:3000".to_string(),
    ]
}
fn default_predictions_path() -> PathBuf { PathBuf::from("data/model_predictions.json") }
fn default_forecasts_path() -> PathBuf { PathBuf::from("data/prophet_state_forecasts.json") }
fn default_knowledge_backend() -> KnowledgeBackend { KnowledgeBackend::Memory }
fn default_snapshot_path() -> PathBuf { PathBuf::from("data/knowledge_index.json") }
fn default_knowledge_table() -> String { "knowledge_chunks".to_string() }
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_connect_timeout() -> u64 { 10 }
fn default_top_k() -> usize { 6 }
fn default_embedding_provider() -> String { "ollama".to_string() }
fn default_embedding_model() -> String { "all-minilm".to_string() }
fn default_embedding_dimension() -> usize { 384 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_llm_provider() -> LlmProvider { LlmProvider::Local }
fn default_ollama_base_url() -> String { "http://localhost:11434".to_string() }
fn default_ollama_model() -> String { "gemma3:1b".to_string() }
fn default_anthropic_base_url() -> String { "https://api.anthropic.com".to_string() }
fn default_anthropic_model() -> String { "claude-sonnet-4-5".to_string() }
fn default_anthropic_version() -> String { "2023-06-01".to_string() }
fn default_max_tokens() -> u32 { 1500 }
fn default_llm_connect_timeout() -> u64 { 10 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "disastershift".to_string() }
fn default_rate_limit() -> u32 { 20 }
fn default_burst() -> u32 { 40 }
fn default_enabled() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            cors_origins: default_cors_origins(),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            predictions_path: default_predictions_path(),
            forecasts_path: default_forecasts_path(),
        }
    }
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            backend: default_knowledge_backend(),
            snapshot_path: default_snapshot_path(),
            database_url: None,
            table: default_knowledge_table(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            top_k: default_top_k(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            ollama_base_url: default_ollama_base_url(),
            ollama_model: default_ollama_model(),
            anthropic_api_key: None,
            anthropic_base_url: default_anthropic_base_url(),
            anthropic_model: default_anthropic_model(),
            anthropic_version: default_anthropic_version(),
            max_tokens: default_max_tokens(),
            connect_timeout_secs: default_llm_connect_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            data: DataConfig::default(),
            knowledge: KnowledgeConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__LLM__PROVIDER=claude
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject combinations that cannot serve traffic
    pub fn validate(&self) -> Result<()> {
        if self.knowledge.top_k == 0 {
            return Err(AppError::Configuration {
                message: "knowledge.top_k must be greater than zero".to_string(),
            });
        }

        if self.knowledge.backend == KnowledgeBackend::Pgvector
            && self.knowledge.database_url.as_deref().map_or(true, str::is_empty)
        {
            return Err(AppError::Configuration {
                message: "knowledge.database_url is required for the pgvector backend".to_string(),
            });
        }

        if !matches!(self.embedding.provider.as_str(), "ollama" | "openai" | "hashing") {
            return Err(AppError::Configuration {
                message: format!(
                    "unknown embedding.provider '{}' (expected ollama, openai or hashing)",
                    self.embedding.provider
                ),
            });
        }

        if self.embedding.provider == "openai"
            && self.embedding.api_key.as_deref().map_or(true, str::is_empty)
        {
            return Err(AppError::Configuration {
                message: "embedding.api_key is required for the openai provider".to_string(),
            });
        }

        if self.llm.provider == LlmProvider::Claude
            && self.llm.anthropic_api_key.as_deref().map_or(true, str::is_empty)
        {
            return Err(AppError::Configuration {
                message: "llm.anthropic_api_key is required when llm.provider = \"claude\""
                    .to_string(),
            });
        }

        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.knowledge.top_k, 6);
        assert_eq!(config.llm.provider, LlmProvider::Local);
        assert_eq!(config.llm.ollama_model, "gemma3:1b");
        assert_ok!(config.validate());
    }

    #[test]
    fn test_claude_requires_api_key() {
        let mut config = AppConfig::default();
        config.llm.provider = LlmProvider::Claude;
        assert!(matches!(
            config.validate(),
            Err(AppError::Configuration { .. })
        ));

        config.llm.anthropic_api_key = Some("sk-test".to_string());
        assert_ok!(config.validate());
    }

    #[test]
    fn test_pgvector_requires_database_url() {
        let mut config = AppConfig::default();
        config.knowledge.backend = KnowledgeBackend::Pgvector;
        assert_err!(config.validate());

        config.knowledge.database_url = Some("postgres://localhost/disastershift".to_string());
        assert_ok!(config.validate());
    }

    #[test]
    fn test_unknown_embedding_provider_rejected() {
        let mut config = AppConfig::default();
        config.embedding.provider = "sentence-transformers".to_string();
        assert_err!(config.validate());
    }

    #[test]
    fn test_zero_top_k_rejected() {
        let mut config = AppConfig::default();
        config.knowledge.top_k = 0;
        assert_err!(config.validate());
    }
}
