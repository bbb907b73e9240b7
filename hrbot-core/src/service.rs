//! Per-message pipeline: history in, answer, history out, reply sent.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::answer::{AnswerEngine, AnswerOutcome};
use crate::channels::whatsapp::WhatsAppSender;
use crate::history::ConversationStore;
use crate::monitor::SideEffectMonitor;

/// Reply sent when a turn fails outright.
pub const INTERNAL_ERROR_REPLY: &str =
    "Lo siento, hubo un error interno. Por favor, intenta más tarde.";

pub struct ChatService {
    engine: Arc<AnswerEngine>,
    history: Arc<dyn ConversationStore>,
    sender: Arc<WhatsAppSender>,
    monitor: Arc<SideEffectMonitor>,
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ChatService {
    pub fn new(
        engine: Arc<AnswerEngine>,
        history: Arc<dyn ConversationStore>,
        sender: Arc<WhatsAppSender>,
        monitor: Arc<SideEffectMonitor>,
    ) -> Self {
        Self {
            engine,
            history,
            sender,
            monitor,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn monitor(&self) -> &Arc<SideEffectMonitor> {
        &self.monitor
    }

    /// Answer one text message from `user` and send the reply. Turns of the
    /// same user run one at a time, in arrival order.
    pub async fn handle_text(&self, user: &str, text: &str) -> String {
        let lock = self.user_lock(user).await;
        let _turn = lock.lock().await;

        let (reply, _) = self.answer_turn(user, text).await;
        // delivery failures are counted by the sender
        let _ = self.sender.send_with_retry(user, &reply).await;
        reply
    }

    /// Answer without sending. Returns the reply and the outcome when the
    /// engine succeeded.
    pub async fn answer_turn(&self, user: &str, text: &str) -> (String, Option<AnswerOutcome>) {
        let history = self.history.load(user).await;
        info!(user, history = history.len(), "Processing message");

        match self.engine.answer(&history, text).await {
            Ok(mut outcome) => {
                if let Some(transcript) = outcome.transcript.take() {
                    self.history.save(user, transcript).await;
                }
                (outcome.reply.clone(), Some(outcome))
            }
            Err(e) => {
                error!(user, error = %e, "Failed to answer message");
                (INTERNAL_ERROR_REPLY.to_string(), None)
            }
        }
    }

    async fn user_lock(&self, user: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        // handles are only cloned under the map lock, so a count of one means
        // no turn holds or waits on that user's lock
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(user.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::{AnswerSettings, REFUSAL_TEXT};
    use crate::brain::{Brain, MockLlmProvider};
    use crate::channels::whatsapp::MockWhatsAppHttp;
    use crate::config::{CatalogEntry, RetryConfig};
    use crate::embeddings::LocalEmbedder;
    use crate::error::LlmError;
    use crate::escalation::RecordingMailer;
    use crate::history::InMemoryConversationStore;
    use crate::interaction_log::SqliteInteractionLog;
    use crate::rag::{PassageRetriever, PolicyCatalog, PolicyRouter, SqliteVectorStore};
    use crate::types::Role;
    use crate::tools::ToolRegistry;
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        provider: Arc<MockLlmProvider>,
        history: Arc<InMemoryConversationStore>,
        sent: Arc<std::sync::Mutex<Vec<crate::channels::whatsapp::SentText>>>,
        service: ChatService,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockLlmProvider::new());
        let retry = RetryConfig {
            max_retries: 0,
            ..Default::default()
        };
        let brain = Arc::new(Brain::new(provider.clone(), retry));
        let catalog = PolicyCatalog::new(vec![CatalogEntry::new("beca_estudio.pdf", "Becas")]);
        let store = Arc::new(
            SqliteVectorStore::open(dir.path().join("v.db"), "politicas")
                .await
                .unwrap(),
        );
        let log = Arc::new(SqliteInteractionLog::open(dir.path().join("l.db")).await.unwrap());
        let monitor = Arc::new(SideEffectMonitor::new());
        let engine = Arc::new(AnswerEngine::new(
            brain.clone(),
            PolicyRouter::new(brain, catalog, 0.0),
            PassageRetriever::new(Arc::new(LocalEmbedder::new(32)), store),
            Arc::new(ToolRegistry::hr_tools(
                log,
                Arc::new(RecordingMailer::new()),
                Vec::new(),
            )),
            monitor.clone(),
            AnswerSettings::default(),
        ));
        let history = Arc::new(InMemoryConversationStore::new(Duration::from_secs(60), 20));
        let http = MockWhatsAppHttp::new();
        let sent = http.sent_handle();
        let sender = Arc::new(WhatsAppSender::new(
            Box::new(http),
            3,
            Duration::ZERO,
            monitor.clone(),
        ));
        Fixture {
            _dir: dir,
            provider,
            history: history.clone(),
            sent,
            service: ChatService::new(engine, history, sender, monitor),
        }
    }

    #[tokio::test]
    async fn test_reply_sent_and_history_saved() {
        let f = fixture().await;
        f.provider.queue_response(MockLlmProvider::text_response("N/A"));

        let reply = f.service.handle_text("569", "¿Hay bono de navidad?").await;
        assert_eq!(reply, REFUSAL_TEXT);

        let sent = f.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "569");

        let stored = f.history.load("569").await;
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_engine_error_sends_internal_error_and_keeps_history() {
        let f = fixture().await;
        f.history
            .save("569", vec![crate::types::Message::user("antes")])
            .await;
        f.provider
            .queue_response(MockLlmProvider::text_response("beca_estudio.pdf"));
        f.provider.queue_error(LlmError::AuthFailed {
            provider: "openai".into(),
        });

        let reply = f.service.handle_text("569", "¿Monto beca?").await;
        assert_eq!(reply, INTERNAL_ERROR_REPLY);
        assert_eq!(f.sent.lock().unwrap()[0].text, INTERNAL_ERROR_REPLY);
        assert_eq!(f.history.load("569").await.len(), 1);
    }

    #[tokio::test]
    async fn test_same_user_turns_run_in_arrival_order() {
        let f = fixture().await;
        f.provider.set_delay(Duration::from_millis(20));
        for reply in [
            "beca_estudio.pdf",
            "Primera respuesta.",
            "beca_estudio.pdf",
            "Segunda respuesta.",
        ] {
            f.provider.queue_response(MockLlmProvider::text_response(reply));
        }

        let (first, second) = tokio::join!(
            f.service.handle_text("569", "¿Quién puede postular a la beca?"),
            f.service.handle_text("569", "¿Y cuál es el monto?"),
        );
        assert_eq!(first, "Primera respuesta.");
        assert_eq!(second, "Segunda respuesta.");

        // the second answering call already sees the whole first turn
        let requests = f.provider.requests();
        assert_eq!(requests.len(), 4);
        let texts: Vec<_> = requests[3].messages[1..]
            .iter()
            .map(|m| (m.role, m.content.as_text().unwrap().to_string()))
            .collect();
        assert_eq!(
            texts,
            vec![
                (Role::User, "¿Quién puede postular a la beca?".to_string()),
                (Role::Assistant, "Primera respuesta.".to_string()),
                (Role::User, "¿Y cuál es el monto?".to_string()),
            ]
        );

        let stored: Vec<_> = f
            .history
            .load("569")
            .await
            .iter()
            .map(|m| m.content.as_text().unwrap().to_string())
            .collect();
        assert_eq!(
            stored,
            vec![
                "¿Quién puede postular a la beca?",
                "Primera respuesta.",
                "¿Y cuál es el monto?",
                "Segunda respuesta.",
            ]
        );
        assert_eq!(f.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_idle_user_locks_are_pruned() {
        let f = fixture().await;
        f.provider.set_repeating(MockLlmProvider::text_response("N/A"));
        f.service.handle_text("569", "hola").await;
        f.service.handle_text("570", "hola").await;
        // the map only keeps the lock being handed out
        let _held = f.service.user_lock("571").await;
        assert_eq!(f.service.user_locks.lock().await.len(), 1);
    }
}
