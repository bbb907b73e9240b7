//! LLM-based selection of the single policy document a question concerns.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::brain::Brain;
use crate::rag::catalog::PolicyCatalog;
use crate::types::Message;

/// Outputs that mean "no document applies".
const NO_MATCH_SENTINELS: [&str; 2] = ["N/A", "sin_coincidencias"];

pub struct PolicyRouter {
    brain: Arc<Brain>,
    catalog: PolicyCatalog,
    temperature: f32,
}

impl PolicyRouter {
    pub fn new(brain: Arc<Brain>, catalog: PolicyCatalog, temperature: f32) -> Self {
        Self {
            brain,
            catalog,
            temperature,
        }
    }

    pub fn catalog(&self) -> &PolicyCatalog {
        &self.catalog
    }

    /// Build the classifier prompt for `question`.
    pub fn prompt(&self, question: &str) -> String {
        format!(
            "Tu única tarea es actuar como un clasificador de documentos.\n\
             Lee la pregunta del usuario y decide cuál de los siguientes documentos es el más \
             relevante para encontrar la respuesta basándote en su descripción.\n\n\
             Documentos disponibles:\n{catalog}\n\n\
             Pregunta del usuario: \"{question}\"\n\n\
             Responde únicamente con el nombre exacto del archivo del documento más relevante.\n\
             Si ninguno de los documentos parece relevante para la pregunta, responde con la \
             palabra 'N/A'.",
            catalog = self.catalog.format_for_prompt(),
        )
    }

    /// Pick a document for `question`, or `None` when nothing applies or the
    /// classifier call fails.
    pub async fn select(&self, question: &str) -> Option<String> {
        if self.catalog.is_empty() {
            warn!("Policy catalog is empty; every question is unmatched");
            return None;
        }

        let output = match self
            .brain
            .complete_text(vec![Message::system(self.prompt(question))], self.temperature)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Router call failed; treating as no match");
                return None;
            }
        };

        let selected = self.interpret(&output);
        match &selected {
            Some(name) => info!(document = %name, "Policy selected"),
            None => info!(output = %output.trim(), "No policy matched"),
        }
        selected
    }

    /// Map raw classifier output to a catalog entry.
    pub fn interpret(&self, output: &str) -> Option<String> {
        let trimmed = output
            .trim()
            .trim_matches(|c| c == '"' || c == '\'' || c == '`' || c == '.');
        if NO_MATCH_SENTINELS
            .iter()
            .any(|s| trimmed.eq_ignore_ascii_case(s))
        {
            debug!(output = %trimmed, "Router returned a no-match sentinel");
            return None;
        }
        self.catalog
            .names()
            .find(|name| trimmed.contains(name))
            .map(str::to_string)
    }
}
