//! # Webhook Gateway
//!
//! HTTP server receiving WhatsApp webhook calls. Verification and health
//! checks are answered inline; each inbound text message is handed to the
//! chat service on its own task so the webhook returns immediately.

mod server;

pub use server::{WebhookState, router as webhook_router, run as run_gateway};

use serde::{Deserialize, Serialize};

/// Address the webhook server listens on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_address() {
        assert_eq!(ServerConfig::default().address(), "0.0.0.0:8000");
    }

    #[test]
    fn test_config_deserialize_partial() {
        let config: ServerConfig = serde_json::from_str(r#"{"port": 9000}"#).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
    }
}
