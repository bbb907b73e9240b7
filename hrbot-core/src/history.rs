//! Per-user conversation history kept between turns.
//!
//! Only plain user and assistant text turns are stored; system prompts, tool
//! calls and tool observations belong to a single turn. Entries expire after
//! a period of inactivity so an abandoned escalation does not leak into a
//! later conversation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::types::Message;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Stored turns for `user`, oldest first. Empty when unknown or expired.
    async fn load(&self, user: &str) -> Vec<Message>;

    /// Replace the history of `user`.
    async fn save(&self, user: &str, messages: Vec<Message>);

    async fn clear(&self, user: &str);
}

struct Entry {
    messages: Vec<Message>,
    touched: Instant,
}

pub struct InMemoryConversationStore {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
    max_messages: usize,
}

impl InMemoryConversationStore {
    pub fn new(ttl: Duration, max_messages: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_messages,
        }
    }

    /// Number of users with live history.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| now.duration_since(e.touched) < self.ttl)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, user: &str) -> Vec<Message> {
        let mut entries = self.entries.lock().await;
        let expired = entries
            .get(user)
            .is_some_and(|e| e.touched.elapsed() >= self.ttl);
        if expired {
            debug!(user, "Conversation history expired");
            entries.remove(user);
            return Vec::new();
        }
        entries
            .get(user)
            .map(|e| e.messages.clone())
            .unwrap_or_default()
    }

    async fn save(&self, user: &str, messages: Vec<Message>) {
        let mut kept: Vec<Message> = messages
            .into_iter()
            .filter(Message::is_dialogue_text)
            .collect();
        if kept.len() > self.max_messages {
            kept.drain(..kept.len() - self.max_messages);
        }

        let mut entries = self.entries.lock().await;
        let ttl = self.ttl;
        entries.retain(|_, e| e.touched.elapsed() < ttl);
        entries.insert(
            user.to_string(),
            Entry {
                messages: kept,
                touched: Instant::now(),
            },
        );
    }

    async fn clear(&self, user: &str) {
        self.entries.lock().await.remove(user);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Content, Role};

    #[tokio::test]
    async fn test_round_trip_keeps_dialogue_only() {
        let store = InMemoryConversationStore::new(Duration::from_secs(60), 20);
        store
            .save(
                "5691234",
                vec![
                    Message::system("prompt"),
                    Message::user("hola"),
                    Message::new(
                        Role::Assistant,
                        Content::tool_call("c1", "registrar_pregunta", serde_json::json!({})),
                    ),
                    Message::tool_result("c1", "{}", false),
                    Message::assistant("¡Hola!"),
                ],
            )
            .await;

        let loaded = store.load("5691234").await;
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].content.as_text(), Some("hola"));
        assert_eq!(loaded[1].content.as_text(), Some("¡Hola!"));
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let store = InMemoryConversationStore::new(Duration::from_secs(60), 20);
        store.save("a", vec![Message::user("uno")]).await;
        assert!(store.load("b").await.is_empty());
        assert_eq!(store.load("a").await.len(), 1);
    }

    #[tokio::test]
    async fn test_cap_keeps_latest() {
        let store = InMemoryConversationStore::new(Duration::from_secs(60), 2);
        store
            .save(
                "a",
                vec![Message::user("1"), Message::assistant("2"), Message::user("3")],
            )
            .await;
        let loaded = store.load("a").await;
        let texts: Vec<_> = loaded.iter().filter_map(|m| m.content.as_text()).collect();
        assert_eq!(texts, vec!["2", "3"]);
    }

    #[tokio::test]
    async fn test_expired_history_is_dropped() {
        let store = InMemoryConversationStore::new(Duration::from_millis(20), 20);
        store.save("a", vec![Message::user("hola")]).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.load("a").await.is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = InMemoryConversationStore::new(Duration::from_secs(60), 20);
        store.save("a", vec![Message::user("hola")]).await;
        store.clear("a").await;
        assert!(store.load("a").await.is_empty());
    }
}
