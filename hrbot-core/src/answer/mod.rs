//! Answer engine: route, retrieve, and answer one user question.
//!
//! A turn moves through `Routing → (NoMatch | Retrieving) → Answering →
//! ToolLoop* → Done | Error`. The answering stage either lets the model call
//! the HR tools itself (bounded by `max_tool_iterations`) or asks it for a
//! single structured JSON decision whose flags trigger the side effects.

pub mod decision;
pub mod prompt;

use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::brain::Brain;
use crate::config::{AnswerMode, BotConfig};
use crate::error::{HrBotError, RetrievalError};
use crate::interaction_log::UNSPECIFIED_POLICY;
use crate::monitor::{SideEffectKind, SideEffectMonitor};
use crate::rag::{PassageRetriever, PolicyRouter};
use crate::tools::{
    ENVIAR_EMAIL_RRHH, REGISTRAR_PREGUNTA, RegistrarPreguntaArgs, ToolRegistry, error_observation,
};
use crate::types::{LlmReply, Message, Role};

pub use decision::{AgentDecision, AnswerEffects, DecisionAction, parse_decision};
pub use prompt::{
    EMPTY_CONTEXT, ESCALATION_OFFER, ESCALATION_PROMPT, LOOP_EXHAUSTED_TEXT, NO_MATCH_NOTE,
    PASSAGE_SEPARATOR, REFUSAL_TEXT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStage {
    Routing,
    NoMatch,
    Retrieving,
    Answering,
    ToolLoop,
    Done,
    Error,
}

impl std::fmt::Display for AnswerStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AnswerStage::Routing => "routing",
            AnswerStage::NoMatch => "no_match",
            AnswerStage::Retrieving => "retrieving",
            AnswerStage::Answering => "answering",
            AnswerStage::ToolLoop => "tool_loop",
            AnswerStage::Done => "done",
            AnswerStage::Error => "error",
        };
        f.write_str(name)
    }
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    /// The model produced a final reply.
    Answered,
    /// No policy matched; the fixed refusal was sent.
    Refused,
    /// The tool loop hit its cap.
    LoopExhausted,
    /// The structured decision could not be parsed.
    InvalidDecision,
}

/// Result of one turn.
#[derive(Debug)]
pub struct AnswerOutcome {
    pub reply: String,
    pub kind: AnswerKind,
    pub document: Option<String>,
    pub context_found: bool,
    /// Model calls made after routing.
    pub model_calls: usize,
    /// Tools requested during the turn, in order. A refused turn lists its
    /// log write only when the row was stored.
    pub tools_called: Vec<String>,
    /// Set in `json_decision` mode.
    pub decision: Option<AgentDecision>,
    /// History to store for the next turn, or `None` to keep the prior one.
    pub transcript: Option<Vec<Message>>,
    /// Fire-and-forget side effects still running.
    pub pending_effects: Vec<JoinHandle<()>>,
}

/// Tunables of the answer engine.
#[derive(Debug, Clone)]
pub struct AnswerSettings {
    pub top_k: usize,
    pub max_tool_iterations: usize,
    pub temperature: f32,
    pub mode: AnswerMode,
    pub company_name: String,
}

impl AnswerSettings {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            max_tool_iterations: config.agent.max_tool_iterations,
            temperature: config.agent.temperature,
            mode: config.agent.answer_mode,
            company_name: config.agent.company_name.clone(),
        }
    }
}

impl Default for AnswerSettings {
    fn default() -> Self {
        Self::from_config(&BotConfig::default())
    }
}

pub struct AnswerEngine {
    brain: Arc<Brain>,
    router: PolicyRouter,
    retriever: PassageRetriever,
    tools: Arc<ToolRegistry>,
    monitor: Arc<SideEffectMonitor>,
    settings: AnswerSettings,
}

struct Grounding {
    document: String,
    context: String,
    found: bool,
}

impl AnswerEngine {
    pub fn new(
        brain: Arc<Brain>,
        router: PolicyRouter,
        retriever: PassageRetriever,
        tools: Arc<ToolRegistry>,
        monitor: Arc<SideEffectMonitor>,
        settings: AnswerSettings,
    ) -> Self {
        Self {
            brain,
            router,
            retriever,
            tools,
            monitor,
            settings,
        }
    }

    pub fn settings(&self) -> &AnswerSettings {
        &self.settings
    }

    pub fn router(&self) -> &PolicyRouter {
        &self.router
    }

    /// Answer `question` given the user's prior dialogue.
    ///
    /// Errors only when the question cannot be embedded or the model is
    /// unreachable; every other failure degrades inside the turn.
    pub async fn answer(
        &self,
        history: &[Message],
        question: &str,
    ) -> Result<AnswerOutcome, HrBotError> {
        debug!(stage = %AnswerStage::Routing, "Answering question");
        let document = self.router.select(question).await;

        let grounding = match document {
            Some(document) => self.ground(question, document).await?,
            None if awaiting_user_details(history) => {
                debug!("Unmatched follow-up to an escalation offer; answering without context");
                Grounding {
                    document: UNSPECIFIED_POLICY.to_string(),
                    context: EMPTY_CONTEXT.to_string(),
                    found: false,
                }
            }
            None => return Ok(self.refuse(history, question).await),
        };

        debug!(
            stage = %AnswerStage::Answering,
            document = %grounding.document,
            context_found = grounding.found,
            mode = ?self.settings.mode,
            "Grounding ready"
        );
        let result = match self.settings.mode {
            AnswerMode::ToolLoop => self.run_tool_loop(history, question, grounding).await,
            AnswerMode::JsonDecision => self.run_json_decision(history, question, grounding).await,
        };
        if let Err(e) = &result {
            warn!(stage = %AnswerStage::Error, error = %e, "Turn failed");
        }
        result
    }

    async fn ground(&self, question: &str, document: String) -> Result<Grounding, HrBotError> {
        debug!(stage = %AnswerStage::Retrieving, document = %document, "Retrieving passages");
        let passages = match self
            .retriever
            .retrieve(question, &document, self.settings.top_k)
            .await
        {
            Ok(passages) => passages,
            Err(RetrievalError::Store(e)) => {
                warn!(document = %document, error = %e, "Vector store query failed; continuing without context");
                Vec::new()
            }
            Err(RetrievalError::Embedding(e)) => return Err(HrBotError::Embedding(e)),
        };
        if passages.is_empty() {
            warn!(document = %document, "No passages retrieved for selected policy");
        }
        Ok(Grounding {
            context: prompt::join_passages(&passages),
            found: !passages.is_empty(),
            document,
        })
    }

    async fn refuse(&self, history: &[Message], question: &str) -> AnswerOutcome {
        debug!(stage = %AnswerStage::NoMatch, "Refusing unmatched question");
        let args = RegistrarPreguntaArgs {
            pregunta: question.to_string(),
            politica: UNSPECIFIED_POLICY.to_string(),
            contexto_encontrado: false,
            respuesta: REFUSAL_TEXT.to_string(),
            notas: NO_MATCH_NOTE.to_string(),
        };
        let mut tools_called = Vec::new();
        match serde_json::to_value(&args) {
            Ok(arguments) => match self.tools.execute(REGISTRAR_PREGUNTA, arguments).await {
                Ok(_) => tools_called.push(REGISTRAR_PREGUNTA.to_string()),
                Err(e) => {
                    warn!(error = %e, "Could not log unmatched question");
                    self.monitor.record_failure(SideEffectKind::QuestionLog, e);
                }
            },
            Err(e) => self.monitor.record_failure(SideEffectKind::QuestionLog, e),
        }
        debug!(stage = %AnswerStage::Done, "Refusal sent");
        AnswerOutcome {
            reply: REFUSAL_TEXT.to_string(),
            kind: AnswerKind::Refused,
            document: None,
            context_found: false,
            model_calls: 0,
            tools_called,
            decision: None,
            transcript: Some(transcript(history, question, REFUSAL_TEXT)),
            pending_effects: Vec::new(),
        }
    }

    async fn run_tool_loop(
        &self,
        history: &[Message],
        question: &str,
        grounding: Grounding,
    ) -> Result<AnswerOutcome, HrBotError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(prompt::tool_loop_prompt(
            &self.settings.company_name,
            &grounding.document,
            &grounding.context,
        )));
        messages.extend(history.iter().cloned());
        messages.push(Message::user(question));

        let definitions = self.tools.definitions();
        let mut tools_called = Vec::new();

        for iteration in 1..=self.settings.max_tool_iterations {
            let (reply, message) = self
                .brain
                .reply(
                    messages.clone(),
                    Some(definitions.clone()),
                    self.settings.temperature,
                )
                .await;

            match reply {
                LlmReply::Text(text) => {
                    debug!(stage = %AnswerStage::Done, iteration, "Final answer produced");
                    info!(
                        document = %grounding.document,
                        tools = tools_called.len(),
                        "Question answered"
                    );
                    return Ok(AnswerOutcome {
                        transcript: Some(transcript(history, question, &text)),
                        reply: text,
                        kind: AnswerKind::Answered,
                        document: Some(grounding.document),
                        context_found: grounding.found,
                        model_calls: iteration,
                        tools_called,
                        decision: None,
                        pending_effects: Vec::new(),
                    });
                }
                LlmReply::ToolCalls { calls, .. } => {
                    debug!(stage = %AnswerStage::ToolLoop, iteration, calls = calls.len(), "Executing tool calls");
                    if let Some(message) = message {
                        messages.push(message);
                    }
                    for call in calls {
                        tools_called.push(call.name.clone());
                        let observation = match self.tools.execute(&call.name, call.arguments).await
                        {
                            Ok(output) => Message::tool_result(&call.id, output.content, false),
                            Err(e) => {
                                warn!(tool = %call.name, error = %e, "Tool call failed");
                                self.record_tool_failure(&call.name, &e);
                                Message::tool_result(&call.id, error_observation(&e), true)
                            }
                        };
                        messages.push(observation);
                    }
                }
                LlmReply::Error(e) => return Err(HrBotError::Llm(e)),
            }
        }

        warn!(
            max_iterations = self.settings.max_tool_iterations,
            "Tool loop limit reached"
        );
        Ok(AnswerOutcome {
            reply: LOOP_EXHAUSTED_TEXT.to_string(),
            kind: AnswerKind::LoopExhausted,
            document: Some(grounding.document),
            context_found: grounding.found,
            model_calls: self.settings.max_tool_iterations,
            tools_called,
            decision: None,
            transcript: Some(transcript(history, question, LOOP_EXHAUSTED_TEXT)),
            pending_effects: Vec::new(),
        })
    }

    async fn run_json_decision(
        &self,
        history: &[Message],
        question: &str,
        grounding: Grounding,
    ) -> Result<AnswerOutcome, HrBotError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(prompt::json_decision_prompt(
            &self.settings.company_name,
            &grounding.document,
            &grounding.context,
        )));
        messages.extend(history.iter().cloned());
        messages.push(Message::user(question));

        let raw = self
            .brain
            .complete_text(messages, self.settings.temperature)
            .await?;

        let (decision, kind) = match parse_decision(&raw) {
            Ok(decision) => (decision, AnswerKind::Answered),
            Err(e) => {
                warn!(error = %e, "Model did not return a valid decision");
                (AgentDecision::internal_error(), AnswerKind::InvalidDecision)
            }
        };
        info!(
            action = ?decision.accion,
            document = ?decision.politica_identificada,
            context_found = decision.context_found(),
            register = decision.necesita_registrar_pregunta,
            escalate = decision.necesita_escalar_a_rrhh,
            "Decision received"
        );

        let original_question = previous_user_question(history).unwrap_or(question);
        let effects = AnswerEffects::from_decision(&decision, question, original_question);
        let mut tools_called = Vec::new();
        if effects.register.is_some() {
            tools_called.push(REGISTRAR_PREGUNTA.to_string());
        }
        if effects.escalate.is_some() {
            tools_called.push(ENVIAR_EMAIL_RRHH.to_string());
        }
        let pending_effects = self.spawn_effects(effects);

        let transcript = match kind {
            AnswerKind::InvalidDecision => None,
            _ => Some(transcript(history, question, &decision.respuesta_al_usuario)),
        };
        Ok(AnswerOutcome {
            reply: decision.respuesta_al_usuario.clone(),
            kind,
            document: Some(grounding.document),
            context_found: grounding.found,
            model_calls: 1,
            tools_called,
            decision: Some(decision),
            transcript,
            pending_effects,
        })
    }

    /// Run decision side effects in the background. Failures go to the monitor.
    pub fn spawn_effects(&self, effects: AnswerEffects) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        if let Some(args) = effects.register {
            handles.push(self.spawn_tool(REGISTRAR_PREGUNTA, serde_json::to_value(args)));
        }
        if let Some(args) = effects.escalate {
            handles.push(self.spawn_tool(ENVIAR_EMAIL_RRHH, serde_json::to_value(args)));
        }
        handles
    }

    fn spawn_tool(
        &self,
        name: &'static str,
        arguments: Result<serde_json::Value, serde_json::Error>,
    ) -> JoinHandle<()> {
        let tools = self.tools.clone();
        let monitor = self.monitor.clone();
        let kind = side_effect_kind(name);
        tokio::spawn(async move {
            let result = match arguments {
                Ok(arguments) => tools.execute(name, arguments).await.map(|_| ()),
                Err(e) => {
                    monitor.record_failure(kind, e);
                    return;
                }
            };
            if let Err(e) = result {
                monitor.record_failure(kind, e);
            }
        })
    }

    fn record_tool_failure(&self, name: &str, error: &crate::error::ToolError) {
        if name == REGISTRAR_PREGUNTA || name == ENVIAR_EMAIL_RRHH {
            self.monitor.record_failure(side_effect_kind(name), error);
        }
    }
}

fn side_effect_kind(tool: &str) -> SideEffectKind {
    if tool == ENVIAR_EMAIL_RRHH {
        SideEffectKind::Escalation
    } else {
        SideEffectKind::QuestionLog
    }
}

fn transcript(history: &[Message], question: &str, reply: &str) -> Vec<Message> {
    let mut messages = history.to_vec();
    messages.push(Message::user(question));
    messages.push(Message::assistant(reply));
    messages
}

/// True when the last assistant turn offered to escalate: either the request
/// for name and RUT or the yes/no offer of the structured decision.
fn awaiting_user_details(history: &[Message]) -> bool {
    history
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .and_then(|m| m.content.as_text())
        .is_some_and(|text| text.contains(ESCALATION_PROMPT) || text.contains(ESCALATION_OFFER))
}

fn previous_user_question(history: &[Message]) -> Option<&str> {
    history
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .and_then(|m| m.content.as_text())
}
