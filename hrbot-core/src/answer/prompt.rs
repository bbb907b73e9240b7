//! Fixed user-facing texts and the answering prompts.

use crate::tools::{ENVIAR_EMAIL_RRHH, REGISTRAR_PREGUNTA};

/// Reply when no policy document matches the question.
pub const REFUSAL_TEXT: &str = "Lo siento, no he podido encontrar información sobre tu consulta \
en las políticas disponibles. ¿Podrías reformular tu pregunta o ser más específico?";

/// Sentence the model must use when the context does not answer the question.
pub const ESCALATION_PROMPT: &str = "No poseo información específica sobre lo que consultas. \
Para escalar tu pregunta al equipo de Recursos Humanos, ¿podrías indicarme tu nombre y RUT por favor?";

/// Offer the structured decision makes when the context does not answer the question.
pub const ESCALATION_OFFER: &str =
    "No encontré información sobre eso. ¿Quieres que envíe tu consulta a RRHH?";

/// Context handed to the model when retrieval found nothing.
pub const EMPTY_CONTEXT: &str = "No se encontró información relevante en los documentos.";

pub const PASSAGE_SEPARATOR: &str = "\n\n---\n\n";

/// Reply when the tool loop hits its iteration cap.
pub const LOOP_EXHAUSTED_TEXT: &str =
    "Hubo un problema procesando tu pregunta. Por favor, intenta de nuevo.";

/// Note stored with the log row of an unmatched question.
pub const NO_MATCH_NOTE: &str = "No se encontró política relevante.";

/// Reply when the structured decision could not be parsed.
pub const DECISION_ERROR_TEXT: &str =
    "Lo siento, tuve un problema para procesar tu solicitud. Por favor, intenta más tarde.";

/// Subject of escalation mails triggered by a structured decision.
pub const DECISION_ESCALATION_SUBJECT: &str = "Consulta de Chatbot para RRHH";

pub const DECISION_ESCALATION_NOTE: &str = "El bot no pudo encontrar una respuesta.";

/// Join retrieved passages, or fall back to [`EMPTY_CONTEXT`].
pub fn join_passages(passages: &[String]) -> String {
    if passages.is_empty() {
        EMPTY_CONTEXT.to_string()
    } else {
        passages.join(PASSAGE_SEPARATOR)
    }
}

/// System prompt for the tool-calling answer loop.
pub fn tool_loop_prompt(company: &str, document: &str, context: &str) -> String {
    format!(
        "Eres un asistente de Recursos Humanos experto de la empresa {company}.

**MISIÓN PRINCIPAL:**
Tu misión principal e ineludible es responder a la pregunta del usuario basándote ESTRICTA Y \
ÚNICAMENTE en el CONTEXTO proporcionado a continuación.

---
**CONTEXTO DISPONIBLE (extraído de '{document}'):**
{context}
---

**REGLAS DE PROCESAMIENTO Y RESPUESTA:**

1.  **ANALIZA EL CONTEXTO Y FORMULA UNA RESPUESTA:**
    -   **Si encuentras la respuesta en el contexto:** Formula una respuesta clara, directa y profesional.
    -   **Si el contexto NO es suficiente para responder:** Formula la siguiente respuesta: \"{ESCALATION_PROMPT}\".

2.  **REGISTRA LA CONSULTA:**
    -   Después de formular la respuesta (sea positiva o negativa), DEBES invocar la herramienta `{REGISTRAR_PREGUNTA}`.
    -   Usa la respuesta que formulaste en el paso anterior para el parámetro `respuesta` de la herramienta.

3.  **RESPONDE AL USUARIO:**
    -   Una vez completado el registro, entrega al usuario la respuesta que formulaste. No menciones el proceso de registro.

**GESTIÓN DE CONSULTAS SIN RESPUESTA (SEGUNDO TURNO):**
-   Si en el turno anterior le pediste al usuario su nombre/RUT y ahora te los está proporcionando, \
tu única acción es usar la herramienta `{ENVIAR_EMAIL_RRHH}` con la pregunta original y los datos \
del usuario. Luego, agradécele y confirma que su consulta fue enviada.
"
    )
}

/// System prompt for the structured JSON decision.
pub fn json_decision_prompt(company: &str, document: &str, context: &str) -> String {
    format!(
        "Eres un asistente de Recursos Humanos experto de la empresa {company}.
Tu única función es analizar la solicitud del usuario usando el CONTEXTO proporcionado y \
generar un objeto JSON estructurado con tu plan y tu respuesta.

---
**CONTEXTO DISPONIBLE (extraído de '{document}'):**
{context}
---

**Esquema JSON de Salida OBLIGATORIO:**
Debes responder SIEMPRE con un único bloque de código JSON válido, y nada más.

{{
\"accion\": \"tipo_de_accion\",
\"respuesta_al_usuario\": \"El mensaje que el usuario final debe leer.\",
\"politica_identificada\": \"nombre_del_pdf_o_null\",
\"contexto_utilizado\": \"El texto del contexto utilizado, o null\",
\"necesita_escalar_a_rrhh\": false,
\"necesita_registrar_pregunta\": false
}}

**Tipos de 'accion':**
- \"responder_con_contexto\": Si el contexto contiene la respuesta.
- \"responder_sin_contexto\": Si es un saludo, despedida o chat general.
- \"ofrecer_escalamiento\": Si el contexto no es suficiente para responder.
- \"confirmar_escalamiento\": Si el usuario *acepta* escalar (p.ej. dice \"sí\", o \"sí, por favor\").

**Reglas del Proceso:**
1.  Si es un saludo/despedida: `accion`=\"responder_sin_contexto\", \
`respuesta_al_usuario`=\"Hola, soy tu asistente de RRHH. ¿En qué puedo ayudarte hoy?\".
2.  Si el contexto responde la pregunta: `accion`=\"responder_con_contexto\", \
`respuesta_al_usuario`=\"[tu respuesta basada ÚNICAMENTE en el contexto]\", \
`politica_identificada`=\"{document}\", `contexto_utilizado`=\"[texto usado]\", \
`necesita_registrar_pregunta`=true.
3.  Si el contexto no alcanza: `accion`=\"ofrecer_escalamiento\", \
`respuesta_al_usuario`=\"{ESCALATION_OFFER}\", \
`necesita_registrar_pregunta`=true.
4.  Si el usuario *acepta* el escalamiento: `accion`=\"confirmar_escalamiento\", \
`respuesta_al_usuario`=\"Perfecto, he enviado tu consulta a RRHH. Te contactarán pronto.\", \
`necesita_escalar_a_rrhh`=true.
"
    )
}
