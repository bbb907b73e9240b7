//! Structured decision returned by the model in `json_decision` mode, and the
//! side effects it requests.

use serde::{Deserialize, Serialize};

use super::prompt::{DECISION_ERROR_TEXT, DECISION_ESCALATION_NOTE, DECISION_ESCALATION_SUBJECT};
use crate::interaction_log::UNSPECIFIED_POLICY;
use crate::tools::{EnviarEmailArgs, RegistrarPreguntaArgs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    ResponderConContexto,
    ResponderSinContexto,
    OfrecerEscalamiento,
    ConfirmarEscalamiento,
    Error,
    ErrorInterno,
    #[serde(other)]
    Desconocida,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDecision {
    pub accion: DecisionAction,
    pub respuesta_al_usuario: String,
    #[serde(default)]
    pub politica_identificada: Option<String>,
    #[serde(default)]
    pub contexto_utilizado: Option<String>,
    #[serde(default)]
    pub necesita_escalar_a_rrhh: bool,
    #[serde(default)]
    pub necesita_registrar_pregunta: bool,
}

impl AgentDecision {
    /// Decision substituted for unparseable model output.
    pub fn internal_error() -> Self {
        Self {
            accion: DecisionAction::ErrorInterno,
            respuesta_al_usuario: DECISION_ERROR_TEXT.to_string(),
            politica_identificada: None,
            contexto_utilizado: None,
            necesita_escalar_a_rrhh: false,
            necesita_registrar_pregunta: false,
        }
    }

    pub fn context_found(&self) -> bool {
        self.contexto_utilizado
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty())
    }
}

/// Parse model output, unwrapping a ```json fence if present.
pub fn parse_decision(raw: &str) -> Result<AgentDecision, serde_json::Error> {
    serde_json::from_str(strip_fence(raw))
}

fn strip_fence(raw: &str) -> &str {
    let inner = if let Some((_, rest)) = raw.split_once("```json") {
        rest
    } else if let Some((_, rest)) = raw.split_once("```") {
        rest
    } else {
        return raw.trim();
    };
    inner.split_once("```").map_or(inner, |(body, _)| body).trim()
}

/// Side effects requested by a decision, run after the reply is produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnswerEffects {
    pub register: Option<RegistrarPreguntaArgs>,
    pub escalate: Option<EnviarEmailArgs>,
}

impl AnswerEffects {
    /// `original_question` is the question being escalated, which on a
    /// confirmation turn is the previous user message rather than the "sí".
    pub fn from_decision(decision: &AgentDecision, question: &str, original_question: &str) -> Self {
        let register = decision
            .necesita_registrar_pregunta
            .then(|| RegistrarPreguntaArgs {
                pregunta: question.to_string(),
                politica: decision
                    .politica_identificada
                    .clone()
                    .filter(|p| !p.is_empty())
                    .unwrap_or_else(|| UNSPECIFIED_POLICY.to_string()),
                contexto_encontrado: decision.context_found(),
                respuesta: decision.respuesta_al_usuario.clone(),
                notas: String::new(),
            });
        let escalate = decision.necesita_escalar_a_rrhh.then(|| EnviarEmailArgs {
            asunto: DECISION_ESCALATION_SUBJECT.to_string(),
            pregunta: original_question.to_string(),
            rut_usuario: String::new(),
            nombre_usuario: String::new(),
            notas: DECISION_ESCALATION_NOTE.to_string(),
        });
        Self { register, escalate }
    }

    pub fn is_empty(&self) -> bool {
        self.register.is_none() && self.escalate.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DECISION: &str = r#"{
        "accion": "responder_con_contexto",
        "respuesta_al_usuario": "La beca cubre hasta 20 UF.",
        "politica_identificada": "beca_estudio.pdf",
        "contexto_utilizado": "El monto máximo es 20 UF.",
        "necesita_escalar_a_rrhh": false,
        "necesita_registrar_pregunta": true
    }"#;

    #[test]
    fn test_parse_plain() {
        let decision = parse_decision(DECISION).unwrap();
        assert_eq!(decision.accion, DecisionAction::ResponderConContexto);
        assert!(decision.necesita_registrar_pregunta);
        assert!(decision.context_found());
    }

    #[test]
    fn test_parse_fenced() {
        let raw = format!("Aquí está:\n```json\n{DECISION}\n```\nSaludos");
        assert_eq!(parse_decision(&raw).unwrap(), parse_decision(DECISION).unwrap());
    }

    #[test]
    fn test_unknown_action_tolerated() {
        let decision =
            parse_decision(r#"{"accion": "bailar", "respuesta_al_usuario": "ok"}"#).unwrap();
        assert_eq!(decision.accion, DecisionAction::Desconocida);
        assert!(!decision.necesita_escalar_a_rrhh);
    }

    #[test]
    fn test_malformed_is_error() {
        assert!(parse_decision("La beca cubre 20 UF.").is_err());
        assert!(parse_decision("```json\n{\"accion\": ```").is_err());
    }

    #[test]
    fn test_effects_from_flags() {
        let decision = parse_decision(DECISION).unwrap();
        let effects = AnswerEffects::from_decision(&decision, "¿Monto beca?", "¿Monto beca?");
        let register = effects.register.unwrap();
        assert_eq!(register.politica, "beca_estudio.pdf");
        assert!(register.contexto_encontrado);
        assert_eq!(register.respuesta, "La beca cubre hasta 20 UF.");
        assert!(effects.escalate.is_none());
    }

    #[test]
    fn test_escalation_uses_original_question() {
        let decision = AgentDecision {
            accion: DecisionAction::ConfirmarEscalamiento,
            respuesta_al_usuario: "Perfecto".into(),
            politica_identificada: None,
            contexto_utilizado: None,
            necesita_escalar_a_rrhh: true,
            necesita_registrar_pregunta: false,
        };
        let effects = AnswerEffects::from_decision(&decision, "sí", "¿Puedo llevar mi perro?");
        let escalate = effects.escalate.unwrap();
        assert_eq!(escalate.pregunta, "¿Puedo llevar mi perro?");
        assert_eq!(escalate.asunto, "Consulta de Chatbot para RRHH");
        assert!(effects.register.is_none());
    }

    #[test]
    fn test_internal_error_requests_nothing() {
        let effects = AnswerEffects::from_decision(&AgentDecision::internal_error(), "x", "x");
        assert!(effects.is_empty());
    }
}
