//! Brain module: LLM provider abstraction and the shared completion front-end.
//!
//! The `LlmProvider` trait is the seam to concrete backends. `Brain` adds
//! retry with backoff, usage accounting, and classification of every reply
//! into an `LlmReply`.

use crate::config::RetryConfig;
use crate::error::LlmError;
use crate::providers::with_retry;
use crate::types::{
    CompletionRequest, CompletionResponse, Content, LlmReply, Message, Role, TokenUsage,
    ToolDefinition,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// Wraps a provider with retry and usage tracking. Shared across tasks.
pub struct Brain {
    provider: Arc<dyn LlmProvider>,
    retry: RetryConfig,
    input_tokens: AtomicUsize,
    output_tokens: AtomicUsize,
    requests: AtomicUsize,
}

impl Brain {
    pub fn new(provider: Arc<dyn LlmProvider>, retry: RetryConfig) -> Self {
        Self {
            provider,
            retry,
            input_tokens: AtomicUsize::new(0),
            output_tokens: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Send a completion request, retrying transient failures.
    pub async fn complete(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<ToolDefinition>>,
        temperature: f32,
    ) -> Result<CompletionResponse, LlmError> {
        debug!(
            model = self.provider.model_name(),
            messages = messages.len(),
            tools = tools.as_ref().map_or(0, |t| t.len()),
            "Sending completion request"
        );

        let request = CompletionRequest {
            messages,
            tools,
            temperature,
            ..Default::default()
        };

        let response = with_retry(&self.retry, || self.provider.complete(request.clone())).await?;
        self.track_usage(&response.usage);

        debug!(
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            finish_reason = ?response.finish_reason,
            "Completion received"
        );

        Ok(response)
    }

    /// Complete and classify the result. Never fails; errors become `LlmReply::Error`.
    pub async fn reply(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<ToolDefinition>>,
        temperature: f32,
    ) -> (LlmReply, Option<Message>) {
        match self.complete(messages, tools, temperature).await {
            Ok(response) => {
                let message = response.message.clone();
                (LlmReply::classify(Ok(response)), Some(message))
            }
            Err(e) => (LlmReply::Error(e), None),
        }
    }

    /// Single-prompt completion returning the reply text.
    pub async fn complete_text(
        &self,
        messages: Vec<Message>,
        temperature: f32,
    ) -> Result<String, LlmError> {
        let response = self.complete(messages, None, temperature).await?;
        match LlmReply::classify(Ok(response)) {
            LlmReply::Text(text) => Ok(text),
            LlmReply::ToolCalls { text, .. } => Ok(text.unwrap_or_default()),
            LlmReply::Error(e) => Err(e),
        }
    }

    fn track_usage(&self, usage: &TokenUsage) {
        self.input_tokens
            .fetch_add(usage.input_tokens, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(usage.output_tokens, Ordering::Relaxed);
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Total tokens consumed since startup.
    pub fn total_usage(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
        }
    }

    /// Number of successful completions since startup.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }
}

/// A mock LLM provider for testing and development.
///
/// Responses are served from a FIFO queue. When the queue is empty the
/// repeating response is returned if one is set, otherwise a fixed text.
/// Every request is recorded for inspection.
pub struct MockLlmProvider {
    model: String,
    responses: Mutex<Vec<Result<CompletionResponse, LlmError>>>,
    repeating: Mutex<Option<CompletionResponse>>,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Mutex<Duration>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(Vec::new()),
            repeating: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Create a MockLlmProvider that always returns the given text.
    pub fn with_response(text: &str) -> Self {
        let provider = Self::new();
        provider.set_repeating(Self::text_response(text));
        provider
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        lock(&self.responses).push(Ok(response));
    }

    /// Queue an error to be returned by the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        lock(&self.responses).push(Err(error));
    }

    /// Response returned whenever the queue is empty.
    pub fn set_repeating(&self, response: CompletionResponse) {
        *lock(&self.repeating) = Some(response);
    }

    /// Make every `complete` call wait this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    /// Queued responses not yet consumed.
    pub fn remaining(&self) -> usize {
        lock(&self.responses).len()
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    /// Create a tool call response for testing.
    pub fn tool_call_response(tool_name: &str, arguments: serde_json::Value) -> CompletionResponse {
        let call_id = format!("call_{}", uuid::Uuid::new_v4());
        CompletionResponse {
            message: Message::new(
                Role::Assistant,
                Content::tool_call(&call_id, tool_name, arguments),
            ),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 30,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("tool_calls".to_string()),
        }
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        lock(&self.requests).push(request);
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut responses = lock(&self.responses);
        if !responses.is_empty() {
            return responses.remove(0);
        }
        match lock(&self.repeating).as_ref() {
            Some(response) => Ok(response.clone()),
            None => Ok(MockLlmProvider::text_response(
                "Respuesta simulada sin cola.",
            )),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
