use std::collections::HashMap;

use crate::models::{ChatMessage, Role};

/// Conversation history handed to the model, keyed by session id.
///
/// Holds the bare assistant answers; the displayed list may decorate them.
#[derive(Debug, Default, Clone)]
pub struct HistoryStore {
    sessions: HashMap<String, Vec<ChatMessage>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self, session_id: &str) -> &[ChatMessage] {
        self.sessions
            .get(session_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn push(&mut self, session_id: &str, role: Role, content: impl Into<String>) {
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .push(ChatMessage {
                role,
                content: content.into(),
            });
    }

    pub fn clear(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_are_isolated() {
        let mut store = HistoryStore::new();
        store.push("a", Role::User, "hi");
        store.push("b", Role::User, "yo");
        store.push("a", Role::Assistant, "hello");

        assert_eq!(store.messages("a").len(), 2);
        assert_eq!(store.messages("b")[0].content, "yo");

        store.clear("a");
        assert!(store.messages("a").is_empty());
        assert_eq!(store.messages("b").len(), 1);
    }
}
