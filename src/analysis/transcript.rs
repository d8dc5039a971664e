//! Chat transcript for one analysis conversation.
//!
//! Insertion order is the order replayed to the model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Origin {
    User,
    Assistant,
}

impl Origin {
    /// Role name on the chat-completions wire.
    pub fn role(self) -> &'static str {
        match self {
            Origin::User => "user",
            Origin::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub content: String,
    pub origin: Origin,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(content, Origin::User)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(content, Origin::Assistant)
    }

    fn new(content: impl Into<String>, origin: Origin) -> Self {
        Self {
            content: content.into(),
            origin,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<ConversationTurn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// True when the newest turn is the user's and has no reply yet.
    pub fn awaiting_reply(&self) -> bool {
        self.last().is_some_and(|turn| turn.origin == Origin::User)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_insertion_order() {
        let mut transcript = Transcript::new();
        transcript.push(ConversationTurn::assistant("a login screen"));
        transcript.push(ConversationTurn::user("which app?"));
        transcript.push(ConversationTurn::assistant("looks like a bank"));

        let origins: Vec<Origin> = transcript.turns().iter().map(|t| t.origin).collect();
        assert_eq!(origins, vec![Origin::Assistant, Origin::User, Origin::Assistant]);
        assert_eq!(transcript.len(), 3);
    }

    #[test]
    fn awaiting_reply_tracks_last_turn() {
        let mut transcript = Transcript::new();
        assert!(!transcript.awaiting_reply());
        transcript.push(ConversationTurn::user("hi"));
        assert!(transcript.awaiting_reply());
        transcript.push(ConversationTurn::assistant("hello"));
        assert!(!transcript.awaiting_reply());
    }

    #[test]
    fn turn_serializes_camel_case() {
        let json = serde_json::to_value(ConversationTurn::user("x")).unwrap();
        assert_eq!(json["origin"], "user");
        assert!(json.get("createdAt").is_some());
    }
}
