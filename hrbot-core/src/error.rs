//! Error types for the HR assistant core.
//!
//! Uses `thiserror` for public API error types with structured error variants
//! covering LLM, embedding, storage, ingestion, tool, configuration, and
//! channel domains.

use std::path::PathBuf;

/// Top-level error type for the hrbot core library.
#[derive(Debug, thiserror::Error)]
pub enum HrBotError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from LLM provider interactions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from the embedding service.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding request failed: {message}")]
    Request { message: String },

    #[error("Embedding response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Environment variable not set: {var}")]
    MissingApiKey { var: String },
}

/// Errors from the vector store and the interaction log.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to open store at {path}: {message}")]
    Open { path: PathBuf, message: String },

    #[error("Corrupt embedding for id '{id}'")]
    CorruptEmbedding { id: String },

    #[error("Background task failed: {message}")]
    Task { message: String },
}

/// Errors from the ingestion pipeline.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Documents directory not readable: {path}")]
    DirectoryUnreadable { path: PathBuf },

    #[error("Failed to extract text from {path}: {message}")]
    Extraction { path: PathBuf, message: String },

    #[error("Embedding failed, nothing was stored: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Store write failed: {0}")]
    Store(#[from] StoreError),
}

/// Errors from passage retrieval. The two variants are handled differently
/// by the answer engine.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector store query failed: {0}")]
    Store(#[from] StoreError),
}

/// Errors from tool registration and execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool not found: {name}")]
    NotFound { name: String },

    #[error("Invalid arguments for tool '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("Tool '{name}' execution failed: {message}")]
    ExecutionFailed { name: String, message: String },

    #[error("Tool '{name}' timed out after {timeout_secs}s")]
    Timeout { name: String, timeout_secs: u64 },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {0}")]
    Parse(#[from] Box<figment::Error>),
}

/// Errors from messaging channels and outbound mail.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Send failed on {channel}: {message}")]
    SendFailed { channel: String, message: String },

    #[error("Connection failed on {channel}: {message}")]
    ConnectionFailed { channel: String, message: String },

    #[error("Channel {channel} is not configured: {message}")]
    NotConfigured { channel: String, message: String },
}

/// A type alias for results using the top-level `HrBotError`.
pub type Result<T> = std::result::Result<T, HrBotError>;
