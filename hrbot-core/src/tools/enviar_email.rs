//! `enviar_email_rrhh`: record an unanswered question and mail it to HR.

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::{RegisteredTool, ok_output, parse_args};
use crate::error::ToolError;
use crate::escalation::{EscalationMailer, compose_body};
use crate::interaction_log::{InteractionLog, UnresolvedRecord};
use crate::types::ToolDefinition;

pub const ENVIAR_EMAIL_RRHH: &str = "enviar_email_rrhh";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnviarEmailArgs {
    pub asunto: String,
    pub pregunta: String,
    #[serde(default)]
    pub rut_usuario: String,
    #[serde(default)]
    pub nombre_usuario: String,
    #[serde(default)]
    pub notas: String,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: ENVIAR_EMAIL_RRHH.into(),
        description: "Envía un correo electrónico al departamento de RRHH con una pregunta del \
                      usuario que no pudo ser respondida. Esta herramienta se usa después de \
                      haberle solicitado sus datos al usuario."
            .into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "asunto": {
                    "type": "string",
                    "description": "Un asunto breve y descriptivo para el correo. Ej: 'Consulta sobre Beneficios de Estudio'."
                },
                "pregunta": {
                    "type": "string",
                    "description": "La pregunta original y completa que hizo el usuario y que no se pudo responder."
                },
                "rut_usuario": {
                    "type": "string",
                    "description": "El RUT del usuario, si lo proporcionó."
                },
                "nombre_usuario": {
                    "type": "string",
                    "description": "El nombre del usuario, si lo proporcionó."
                },
                "notas": {
                    "type": "string",
                    "description": "Notas adicionales para RRHH."
                }
            },
            "required": ["asunto", "pregunta"]
        }),
    }
}

pub fn tool(
    log: Arc<dyn InteractionLog>,
    mailer: Arc<dyn EscalationMailer>,
    recipients: Vec<String>,
) -> RegisteredTool {
    let recipients = Arc::new(recipients);
    RegisteredTool {
        definition: definition(),
        executor: Box::new(move |arguments| {
            let log = log.clone();
            let mailer = mailer.clone();
            let recipients = recipients.clone();
            Box::pin(async move {
                let args: EnviarEmailArgs = parse_args(ENVIAR_EMAIL_RRHH, arguments)?;
                escalate(log.as_ref(), mailer.as_ref(), &recipients, args).await
            })
        }),
    }
}

async fn escalate(
    log: &dyn InteractionLog,
    mailer: &dyn EscalationMailer,
    recipients: &[String],
    args: EnviarEmailArgs,
) -> Result<crate::types::ToolOutput, ToolError> {
    let id = log
        .record_unresolved(UnresolvedRecord {
            pregunta: args.pregunta.clone(),
            respuesta: String::new(),
            rut: args.rut_usuario.clone(),
            nombre_usuario: args.nombre_usuario.clone(),
            notas: args.notas.clone(),
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            name: ENVIAR_EMAIL_RRHH.into(),
            message: format!("Error al registrar: {e}"),
        })?;

    let body = compose_body(
        &args.pregunta,
        &args.rut_usuario,
        &args.nombre_usuario,
        Local::now().naive_local(),
    );
    if let Err(e) = mailer.send(recipients, &args.asunto, &body).await {
        warn!(id, error = %e, "Unresolved question recorded but email failed");
        return Err(ToolError::ExecutionFailed {
            name: ENVIAR_EMAIL_RRHH.into(),
            message: format!("No se pudo enviar el email: {e}"),
        });
    }

    info!(id, recipients = recipients.len(), "Question escalated to HR");
    Ok(ok_output("Email enviado exitosamente a RRHH", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::RecordingMailer;
    use crate::interaction_log::SqliteInteractionLog;
    use crate::tools::ToolRegistry;
    use std::time::Duration;

    async fn setup(
        dir: &tempfile::TempDir,
        mailer: Arc<RecordingMailer>,
    ) -> (ToolRegistry, Arc<SqliteInteractionLog>) {
        let log = Arc::new(SqliteInteractionLog::open(dir.path().join("l.db")).await.unwrap());
        let mut registry = ToolRegistry::new(Duration::from_secs(5));
        registry.register(tool(log.clone(), mailer, vec!["rrhh@cramer.cl".into()]));
        (registry, log)
    }

    #[tokio::test]
    async fn test_records_then_mails() {
        let dir = tempfile::tempdir().unwrap();
        let mailer = Arc::new(RecordingMailer::new());
        let (registry, log) = setup(&dir, mailer.clone()).await;

        let output = registry
            .execute(
                ENVIAR_EMAIL_RRHH,
                json!({
                    "asunto": "Consulta sobre mascotas",
                    "pregunta": "¿Puedo llevar mi perro al centro?",
                    "rut_usuario": "12.345.678-9",
                    "nombre_usuario": "Ana"
                }),
            )
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&output.content).unwrap();
        assert_eq!(value["message"], "Email enviado exitosamente a RRHH");

        let rows = log.unresolved().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rut, "12.345.678-9");

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, vec!["rrhh@cramer.cl"]);
        assert_eq!(sent[0].subject, "Consulta sobre mascotas");
        assert!(sent[0].body.contains("De: Ana\n"));
        assert!(sent[0].body.contains("¿Puedo llevar mi perro al centro?"));
    }

    #[tokio::test]
    async fn test_mail_failure_keeps_record() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, log) = setup(&dir, Arc::new(RecordingMailer::failing())).await;
        let err = registry
            .execute(ENVIAR_EMAIL_RRHH, json!({"asunto": "a", "pregunta": "b"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No se pudo enviar el email"));
        assert_eq!(log.counts().await.unwrap(), (0, 1));
    }

    #[tokio::test]
    async fn test_subject_required() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _log) = setup(&dir, Arc::new(RecordingMailer::new())).await;
        let err = registry
            .execute(ENVIAR_EMAIL_RRHH, json!({"pregunta": "b"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }
}
