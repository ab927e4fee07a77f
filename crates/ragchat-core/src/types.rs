//! Core types — Role, Message, RetryBudget, status payloads.

use serde::{Deserialize, Serialize};

// ── Conversation ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

// ── Retry budget ──

/// One extra timed attempt per conversation. `Exhausted` once it's been spent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryBudget {
    #[default]
    Ready,
    Exhausted,
}

impl RetryBudget {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryBudget::Exhausted)
    }
}

impl std::fmt::Display for RetryBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryBudget::Ready => write!(f, "ready"),
            RetryBudget::Exhausted => write!(f, "exhausted"),
        }
    }
}

// ── Invocation outcome ──

/// Which path produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    FirstAttempt,
    Retry,
    /// Bot was asked to phrase the apology itself
    FallbackInstruction,
    /// Canned literal apology
    FallbackLiteral,
}

// ── Status (for frontends) ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub bot_configured: bool,
    pub rag_enabled: bool,
    pub retry_budget: RetryBudget,
    pub message_count: usize,
}
