//! `registrar_pregunta`: record a question and its answer in the log.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::{RegisteredTool, ok_output, parse_args};
use crate::error::ToolError;
use crate::interaction_log::{InteractionLog, QuestionRecord, UNSPECIFIED_POLICY};
use crate::types::ToolDefinition;

pub const REGISTRAR_PREGUNTA: &str = "registrar_pregunta";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrarPreguntaArgs {
    pub pregunta: String,
    #[serde(default = "default_politica")]
    pub politica: String,
    #[serde(default = "default_true")]
    pub contexto_encontrado: bool,
    #[serde(default)]
    pub respuesta: String,
    #[serde(default)]
    pub notas: String,
}

fn default_politica() -> String {
    UNSPECIFIED_POLICY.to_string()
}

fn default_true() -> bool {
    true
}

impl From<RegistrarPreguntaArgs> for QuestionRecord {
    fn from(args: RegistrarPreguntaArgs) -> Self {
        QuestionRecord {
            question: args.pregunta,
            file_consulted: args.politica,
            contexts: args.contexto_encontrado,
            answer: args.respuesta,
            notes: args.notas,
        }
    }
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: REGISTRAR_PREGUNTA.into(),
        description: "Registra la pregunta del usuario en la base de datos para seguimiento posterior."
            .into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "pregunta": {
                    "type": "string",
                    "description": "La pregunta que hizo el usuario."
                },
                "politica": {
                    "type": "string",
                    "description": "La política consultada (ej. mutuo_acuerdo.pdf)"
                },
                "contexto_encontrado": {
                    "type": "boolean",
                    "description": "Si se encontró contexto relevante o no."
                },
                "respuesta": {
                    "type": "string",
                    "description": "Respuesta que se entregó al usuario."
                },
                "notas": {
                    "type": "string",
                    "description": "Notas adicionales sobre la consulta."
                }
            },
            "required": ["pregunta"]
        }),
    }
}

pub fn tool(log: Arc<dyn InteractionLog>) -> RegisteredTool {
    RegisteredTool {
        definition: definition(),
        executor: Box::new(move |arguments| {
            let log = log.clone();
            Box::pin(async move {
                let args: RegistrarPreguntaArgs = parse_args(REGISTRAR_PREGUNTA, arguments)?;
                let context_found = args.contexto_encontrado;
                let id = log
                    .record_question(args.into())
                    .await
                    .map_err(|e| ToolError::ExecutionFailed {
                        name: REGISTRAR_PREGUNTA.into(),
                        message: format!("Error al registrar: {e}"),
                    })?;
                info!(id, context_found, "Question logged");
                Ok(ok_output("Pregunta registrada exitosamente", id))
            })
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction_log::SqliteInteractionLog;
    use crate::tools::ToolRegistry;
    use std::time::Duration;

    async fn registry(dir: &tempfile::TempDir) -> (ToolRegistry, Arc<SqliteInteractionLog>) {
        let log = Arc::new(SqliteInteractionLog::open(dir.path().join("l.db")).await.unwrap());
        let mut registry = ToolRegistry::new(Duration::from_secs(5));
        registry.register(tool(log.clone()));
        (registry, log)
    }

    #[tokio::test]
    async fn test_defaults_applied() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, log) = registry(&dir).await;
        let output = registry
            .execute(REGISTRAR_PREGUNTA, json!({"pregunta": "¿Hola?"}))
            .await
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(&output.content).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["message"], "Pregunta registrada exitosamente");
        assert_eq!(value["id"], 1);

        let rows = log.questions().await.unwrap();
        assert_eq!(rows[0].file_consulted, "No especificada");
        assert!(rows[0].contexts);
        assert_eq!(rows[0].answer, "");
    }

    #[tokio::test]
    async fn test_all_fields_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, log) = registry(&dir).await;
        registry
            .execute(
                REGISTRAR_PREGUNTA,
                json!({
                    "pregunta": "¿Cuánto cubre la beca?",
                    "politica": "beca_estudio.pdf",
                    "contexto_encontrado": false,
                    "respuesta": "No poseo información.",
                    "notas": "sin datos"
                }),
            )
            .await
            .unwrap();
        let rows = log.questions().await.unwrap();
        assert_eq!(rows[0].file_consulted, "beca_estudio.pdf");
        assert!(!rows[0].contexts);
        assert_eq!(rows[0].notes, "sin datos");
    }

    #[tokio::test]
    async fn test_missing_question_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, log) = registry(&dir).await;
        let err = registry
            .execute(REGISTRAR_PREGUNTA, json!({"politica": "x.pdf"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
        assert_eq!(log.counts().await.unwrap(), (0, 0));
    }
}
