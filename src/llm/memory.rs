//! In-process conversation memory.
//!
//! Keeps the most recent completed exchanges so each request carries the
//! conversation so far. Nothing is persisted.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Bounded buffer of completed user/assistant exchanges.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    exchanges: VecDeque<(String, String)>,
    max_exchanges: usize,
}

impl ConversationMemory {
    /// Creates a memory holding at most `max_exchanges` exchanges.
    /// Zero disables history.
    pub fn new(max_exchanges: usize) -> Self {
        Self {
            exchanges: VecDeque::with_capacity(max_exchanges.min(64)),
            max_exchanges,
        }
    }

    /// Records a completed exchange, evicting the oldest when full.
    pub fn record(&mut self, user: &str, assistant: &str) {
        if self.max_exchanges == 0 {
            return;
        }
        while self.exchanges.len() >= self.max_exchanges {
            self.exchanges.pop_front();
        }
        self.exchanges
            .push_back((user.to_string(), assistant.to_string()));
    }

    /// History as alternating user/assistant messages, oldest first.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.exchanges
            .iter()
            .flat_map(|(user, assistant)| {
                [ChatMessage::user(user), ChatMessage::assistant(assistant)]
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    pub fn clear(&mut self) {
        self.exchanges.clear();
    }
}
