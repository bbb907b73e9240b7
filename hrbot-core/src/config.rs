//! Configuration system for the HR assistant.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment.
//! The file is taken from an explicit path, else `./hrbot.toml`, else the user
//! config directory (`~/.config/hrbot/config.toml` on Linux).

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::channels::whatsapp::WhatsAppConfig;
use crate::error::ConfigError;
use crate::escalation::EscalationConfig;
use crate::gateway::ServerConfig;

/// Top-level configuration for the bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub llm: LlmConfig,
    pub embeddings: EmbeddingsConfig,
    pub documents: DocumentsConfig,
    /// Ordered policy catalog shown to the router.
    pub catalog: Vec<CatalogEntry>,
    pub store: StoreConfig,
    pub retrieval: RetrievalConfig,
    pub agent: AgentConfig,
    pub history: HistoryConfig,
    pub interaction_log: InteractionLogConfig,
    pub escalation: EscalationConfig,
    pub whatsapp: WhatsAppConfig,
    pub server: ServerConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            embeddings: EmbeddingsConfig::default(),
            documents: DocumentsConfig::default(),
            catalog: default_catalog(),
            store: StoreConfig::default(),
            retrieval: RetrievalConfig::default(),
            agent: AgentConfig::default(),
            history: HistoryConfig::default(),
            interaction_log: InteractionLogConfig::default(),
            escalation: EscalationConfig::default(),
            whatsapp: WhatsAppConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Configuration for the chat-completion provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name. Only OpenAI-compatible endpoints are supported.
    pub provider: String,
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    pub base_url: Option<String>,
    pub max_tokens: Option<usize>,
    pub timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            max_tokens: None,
            timeout_secs: 60,
            retry: RetryConfig::default(),
        }
    }
}

/// Exponential backoff settings for transient provider errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Configuration for the embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    /// `"openai"` or `"local"` (hashed term frequency, offline).
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    pub base_url: Option<String>,
    /// Requested vector size; 0 keeps the model default.
    pub dimensions: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            dimensions: 0,
            timeout_secs: 60,
        }
    }
}

/// Where policy documents live and how they are chunked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentsConfig {
    pub dir: PathBuf,
    /// File extensions (without dot, lowercase) picked up by ingestion.
    pub extensions: Vec<String>,
    /// Prefix of every chunk id.
    pub id_prefix: String,
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks.
    pub chunk_overlap: usize,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("files"),
            extensions: vec!["pdf".to_string()],
            id_prefix: "politica".to_string(),
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

/// A document the router may select, with the description it sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub description: String,
}

impl CatalogEntry {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// The catalog shipped with the default deployment.
pub fn default_catalog() -> Vec<CatalogEntry> {
    vec![
        CatalogEntry::new(
            "beca_estudio.pdf",
            "Contiene información sobre beneficios y becas para estudios superiores para los \
             empleados y sus familias.",
        ),
        CatalogEntry::new(
            "centro_recreacion.pdf",
            "Describe las reglas para pertenecer al centro de recreación de la empresa.",
        ),
        CatalogEntry::new(
            "mutuo_acuerdo.pdf",
            "Explica los procedimientos y condiciones para la terminación del contrato laboral \
             de mutuo acuerdo.",
        ),
    ]
}

/// Vector store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the store database.
    pub path: PathBuf,
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("db_politicas"),
            collection: "politicas_empresariales".to_string(),
        }
    }
}

impl StoreConfig {
    /// Full path of the SQLite database file.
    pub fn database_file(&self) -> PathBuf {
        self.path.join("vectors.db")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 5 }
    }
}

/// How the answering stage talks to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    /// Model calls the HR tools itself, bounded by `max_tool_iterations`.
    #[default]
    ToolLoop,
    /// Model returns one JSON decision; side effects are run from its flags.
    JsonDecision,
}

/// Answer engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_tool_iterations: usize,
    pub temperature: f32,
    pub router_temperature: f32,
    pub answer_mode: AnswerMode,
    /// Company name used in the answering prompt.
    pub company_name: String,
    /// Dialogue turns kept per user (oldest dropped first).
    pub max_history_messages: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 10,
            temperature: 0.1,
            router_temperature: 0.0,
            answer_mode: AnswerMode::ToolLoop,
            company_name: "Cramer".to_string(),
            max_history_messages: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Idle time after which a conversation is forgotten.
    pub ttl_secs: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { ttl_secs: 3600 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionLogConfig {
    pub path: PathBuf,
}

impl Default for InteractionLogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("hrbot_logs.db"),
        }
    }
}

impl BotConfig {
    /// Reject settings that would break chunking, retrieval, or the tool loop.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.documents.chunk_size == 0 {
            return Err(ConfigError::Invalid {
                message: "documents.chunk_size must be greater than 0".into(),
            });
        }
        if self.documents.chunk_overlap >= self.documents.chunk_size {
            return Err(ConfigError::Invalid {
                message: format!(
                    "documents.chunk_overlap ({}) must be smaller than chunk_size ({})",
                    self.documents.chunk_overlap, self.documents.chunk_size
                ),
            });
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid {
                message: "retrieval.top_k must be greater than 0".into(),
            });
        }
        if self.agent.max_tool_iterations == 0 {
            return Err(ConfigError::Invalid {
                message: "agent.max_tool_iterations must be greater than 0".into(),
            });
        }
        Ok(())
    }

    /// Effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid {
            message: format!("cannot render configuration: {e}"),
        })
    }
}

/// Path of the user-level config file, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "hrbot", "hrbot")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `HRBOT_`, `__` separates sections)
/// 2. `explicit` file, or `./hrbot.toml`, or the user config file
/// 3. Built-in defaults
///
/// An explicit path that does not exist is an error; the implicit ones are optional.
pub fn load_config(explicit: Option<&Path>) -> Result<BotConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(BotConfig::default()));

    match explicit {
        Some(path) => {
            figment = figment.merge(Toml::file_exact(path));
        }
        None => {
            let local = PathBuf::from("hrbot.toml");
            if local.exists() {
                figment = figment.merge(Toml::file(&local));
            } else if let Some(user) = user_config_path().filter(|p| p.exists()) {
                figment = figment.merge(Toml::file(&user));
            }
        }
    }

    // HRBOT_AGENT__MAX_TOOL_ITERATIONS, HRBOT_WHATSAPP__PHONE_NUMBER_ID, etc.
    figment = figment.merge(Env::prefixed("HRBOT_").split("__"));

    figment.extract().map_err(Box::new)
}

/// Read a required environment variable.
pub fn require_env(var: &str) -> Result<String, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::EnvVarMissing {
            var: var.to_string(),
        }),
    }
}
