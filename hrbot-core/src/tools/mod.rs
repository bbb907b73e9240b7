//! Tool registry and the two HR tools offered to the model.
//!
//! The registry is fixed at startup: `registrar_pregunta` logs every answered
//! question and `enviar_email_rrhh` escalates an unanswered one to HR.

pub mod enviar_email;
pub mod registrar;

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::ToolError;
use crate::escalation::EscalationMailer;
use crate::interaction_log::InteractionLog;
use crate::types::{ToolDefinition, ToolOutput};

pub use enviar_email::{ENVIAR_EMAIL_RRHH, EnviarEmailArgs};
pub use registrar::{REGISTRAR_PREGUNTA, RegistrarPreguntaArgs};

/// A tool executor function type.
pub type ToolExecutor = Box<
    dyn Fn(
            serde_json::Value,
        ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send>>
        + Send
        + Sync,
>;

/// A registered tool with its definition and executor.
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub executor: ToolExecutor,
}

/// Name-indexed tools, remembering registration order for the model.
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    order: Vec<String>,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            timeout,
        }
    }

    /// Registry holding the two HR tools.
    pub fn hr_tools(
        log: Arc<dyn InteractionLog>,
        mailer: Arc<dyn EscalationMailer>,
        recipients: Vec<String>,
    ) -> Self {
        let mut registry = Self::new(Duration::from_secs(60));
        registry.register(registrar::tool(log.clone()));
        registry.register(enviar_email::tool(log, mailer, recipients));
        registry
    }

    /// Register a tool, replacing any tool of the same name.
    pub fn register(&mut self, tool: RegisteredTool) {
        let name = tool.definition.name.clone();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.definition.clone())
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run `name` with `arguments`, bounded by the registry timeout.
    pub async fn execute(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self.tools.get(name).ok_or_else(|| ToolError::NotFound {
            name: name.to_string(),
        })?;
        debug!(tool = name, "Executing tool");
        tokio::time::timeout(self.timeout, (tool.executor)(arguments))
            .await
            .map_err(|_| ToolError::Timeout {
                name: name.to_string(),
                timeout_secs: self.timeout.as_secs(),
            })?
    }
}

/// Text fed back to the model when a tool call fails.
pub fn error_observation(error: &ToolError) -> String {
    match error {
        ToolError::NotFound { name } => format!("La herramienta '{name}' no existe."),
        other => format!("Error: {other}"),
    }
}

/// Deserialize tool arguments, reporting failures against `tool`.
pub(crate) fn parse_args<T: DeserializeOwned>(
    tool: &str,
    arguments: serde_json::Value,
) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments {
        name: tool.to_string(),
        reason: e.to_string(),
    })
}

/// The `{"status":"ok",...}` payload both tools return.
pub(crate) fn ok_output(message: &str, id: i64) -> ToolOutput {
    ToolOutput::json(&serde_json::json!({
        "status": "ok",
        "message": message,
        "id": id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::RecordingMailer;
    use crate::interaction_log::SqliteInteractionLog;
    use serde_json::json;

    fn echo_tool(name: &str) -> RegisteredTool {
        RegisteredTool {
            definition: ToolDefinition {
                name: name.to_string(),
                description: "Echo input text".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
            },
            executor: Box::new(|args: serde_json::Value| {
                Box::pin(async move {
                    let text = args["text"].as_str().unwrap_or("no text");
                    Ok(ToolOutput::text(format!("Echo: {text}")))
                })
            }),
        }
    }

    #[tokio::test]
    async fn test_execute_registered_tool() {
        let mut registry = ToolRegistry::new(Duration::from_secs(1));
        registry.register(echo_tool("echo"));
        let output = registry.execute("echo", json!({"text": "hola"})).await.unwrap();
        assert_eq!(output.content, "Echo: hola");
    }

    #[tokio::test]
    async fn test_unknown_tool_observation() {
        let registry = ToolRegistry::new(Duration::from_secs(1));
        let err = registry.execute("borrar_todo", json!({})).await.unwrap_err();
        assert_eq!(error_observation(&err), "La herramienta 'borrar_todo' no existe.");
    }

    #[tokio::test]
    async fn test_slow_tool_times_out() {
        let mut registry = ToolRegistry::new(Duration::from_millis(10));
        registry.register(RegisteredTool {
            definition: ToolDefinition {
                name: "lento".into(),
                description: String::new(),
                parameters: json!({"type": "object"}),
            },
            executor: Box::new(|_| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(ToolOutput::text("tarde"))
                })
            }),
        });
        let err = registry.execute("lento", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }

    #[test]
    fn test_reregister_keeps_single_entry() {
        let mut registry = ToolRegistry::new(Duration::from_secs(1));
        registry.register(echo_tool("echo"));
        registry.register(echo_tool("echo"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.definitions().len(), 1);
    }

    #[tokio::test]
    async fn test_hr_tools_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(SqliteInteractionLog::open(dir.path().join("l.db")).await.unwrap());
        let registry =
            ToolRegistry::hr_tools(log, Arc::new(RecordingMailer::new()), vec!["a@b.cl".into()]);
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec![REGISTRAR_PREGUNTA, ENVIAR_EMAIL_RRHH]);
    }
}
