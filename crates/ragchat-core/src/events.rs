//! ChatEvent enum — broadcast from a Session to web/WebSocket subscribers.

use serde::{Deserialize, Serialize};

use crate::types::{AnswerSource, Message, RetryBudget};

/// Events broadcast from a session to all subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ChatEvent {
    /// A message was appended to the conversation
    #[serde(rename = "message")]
    Message(Message),

    /// Bot invocation started for a user turn
    #[serde(rename = "thinking")]
    Thinking { question: String },

    /// Sent after every answer, with the path that produced it
    #[serde(rename = "answered")]
    Answered { source: AnswerSource },

    /// Retry budget changed
    #[serde(rename = "retry_budget")]
    RetryBudget { budget: RetryBudget },

    /// The turn failed without an assistant message
    #[serde(rename = "error")]
    Error { text: String },

    /// Conversation cleared
    #[serde(rename = "reset")]
    Reset,
}

impl ChatEvent {
    /// Serialize to the JSON format frontends expect:
    /// `{"event": "...", "data": {...}}`
    pub fn to_ws_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let v = ChatEvent::RetryBudget {
            budget: RetryBudget::Exhausted,
        }
        .to_ws_json();
        assert_eq!(v["event"], "retry_budget");
        assert_eq!(v["data"]["budget"], "exhausted");

        let v = ChatEvent::Reset.to_ws_json();
        assert_eq!(v["event"], "reset");
    }
}
