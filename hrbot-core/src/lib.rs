//! # HR Bot Core
//!
//! Core library for the HR policy assistant.
//! Provides document ingestion and retrieval, LLM routing and grounded
//! answering, the HR tools, interaction logging, escalation mail, and the
//! WhatsApp webhook service.

pub mod answer;
pub mod brain;
pub mod channels;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod escalation;
pub mod gateway;
pub mod history;
pub mod interaction_log;
pub mod monitor;
pub mod providers;
pub mod rag;
pub mod service;
pub mod tools;
pub mod types;

// Re-export commonly used types at the crate root.
pub use answer::{AnswerEngine, AnswerOutcome, AnswerSettings};
pub use brain::{Brain, LlmProvider, MockLlmProvider};
pub use config::{AnswerMode, BotConfig, load_config};
pub use error::{HrBotError, Result};
pub use history::{ConversationStore, InMemoryConversationStore};
pub use interaction_log::{InteractionLog, SqliteInteractionLog};
pub use monitor::SideEffectMonitor;
pub use service::ChatService;
pub use tools::ToolRegistry;
pub use types::{CompletionRequest, CompletionResponse, Content, LlmReply, Message, Role};
