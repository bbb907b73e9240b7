//! LLM provider implementations.
//!
//! Only OpenAI-compatible chat completion endpoints are supported (OpenAI,
//! Azure OpenAI, Ollama, vLLM). Use `create_provider()` to build one from config.

pub mod openai_compat;

use crate::brain::LlmProvider;
use crate::config::LlmConfig;
use crate::error::LlmError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use crate::config::RetryConfig;
pub use openai_compat::OpenAiCompatibleProvider;

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Retries on `LlmError::RateLimited` (respects `retry_after_secs`), `LlmError::Connection`,
/// and `LlmError::Timeout`. Permanent errors (auth, parse) return immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut last_err = None;
    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !is_retryable(&e) || attempt == config.max_retries {
                    return Err(e);
                }

                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| LlmError::Connection {
        message: "All retry attempts exhausted".to_string(),
    }))
}

/// Check if an error is retryable (transient).
fn is_retryable(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::RateLimited { .. } | LlmError::Connection { .. } | LlmError::Timeout { .. }
    )
}

/// Compute backoff delay, respecting rate limit retry-after hints.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &LlmError) -> u64 {
    if let LlmError::RateLimited { retry_after_secs } = err {
        let server_ms = retry_after_secs * 1000;
        let computed = compute_exponential_backoff(config, attempt);
        return server_ms.max(computed);
    }
    compute_exponential_backoff(config, attempt)
}

/// Pure exponential backoff with optional jitter.
fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // up to 25% extra
        let jitter = (capped as f64 * 0.25 * rand_simple()) as u64;
        capped + jitter
    } else {
        capped
    }
}

/// Cheap pseudo-random fraction in [0, 1) from the clock.
fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Create the chat-completion provider described by `config`.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.as_str() {
        "openai" | "azure" | "ollama" | "local" => {
            Ok(Arc::new(OpenAiCompatibleProvider::new(config)?))
        }
        other => Err(LlmError::ApiRequest {
            message: format!("Unsupported LLM provider '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_exponential_backoff_capped() {
        let config = RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(compute_exponential_backoff(&config, 0), 1000);
        assert_eq!(compute_exponential_backoff(&config, 1), 2000);
        assert_eq!(compute_exponential_backoff(&config, 2), 4000);
        assert_eq!(compute_exponential_backoff(&config, 3), 5000);
    }

    #[test]
    fn test_rate_limit_respects_server_hint() {
        let config = fast_config(3);
        let err = LlmError::RateLimited {
            retry_after_secs: 2,
        };
        assert_eq!(compute_backoff(&config, 0, &err), 2000);
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&LlmError::Timeout { timeout_secs: 1 }));
        assert!(is_retryable(&LlmError::Connection {
            message: "x".into()
        }));
        assert!(!is_retryable(&LlmError::AuthFailed {
            provider: "openai".into()
        }));
        assert!(!is_retryable(&LlmError::ResponseParse {
            message: "x".into()
        }));
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_first_try() {
        let config = fast_config(3);
        let result = with_retry(&config, || async { Ok::<_, LlmError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_retry_recovers_after_timeouts() {
        let config = fast_config(3);
        let attempts = AtomicU32::new(0);
        let result = with_retry(&config, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(LlmError::Timeout { timeout_secs: 1 })
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_permanent_error_no_retry() {
        let config = fast_config(3);
        let attempts = AtomicU32::new(0);
        let result: Result<(), LlmError> = with_retry(&config, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(LlmError::AuthFailed {
                    provider: "test".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_exhausted() {
        let config = fast_config(2);
        let attempts = AtomicU32::new(0);
        let result: Result<(), LlmError> = with_retry(&config, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(LlmError::Connection {
                    message: "refused".into(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(LlmError::Connection { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_create_provider_unknown() {
        let config = LlmConfig {
            provider: "carrier-pigeon".into(),
            ..Default::default()
        };
        assert!(create_provider(&config).is_err());
    }
}
