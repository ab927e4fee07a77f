//! Conversation history and the per-session chat driver.
//!
//! The retry budget lives in the `Conversation` next to the messages, so a
//! timeout on one turn affects the budget of the next one until the
//! conversation is reset.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info};

use crate::bot::{Bot, Retriever};
use crate::config::{Config, RagConfig};
use crate::events::ChatEvent;
use crate::invocation::{Answer, InvocationController, InvocationError};
use crate::providers;
use crate::retrieval::HttpRetriever;
use crate::types::{Message, RetryBudget, SessionStatus};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("Please configure a chatbot model first")]
    BotNotConfigured,

    #[error("context retrieval failed: {0:#}")]
    Retrieval(anyhow::Error),

    #[error(transparent)]
    Invocation(#[from] InvocationError),
}

/// Append-only message history plus the retry budget.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    pub retry_budget: RetryBudget,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The last `limit` messages.
    pub fn recent(&self, limit: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(limit);
        &self.messages[start..]
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.retry_budget = RetryBudget::Ready;
    }
}

/// One user's chat: bot, optional retriever, history, and invocation policy.
pub struct Session {
    pub conversation: Conversation,
    bot: Option<Arc<dyn Bot>>,
    retriever: Option<Arc<dyn Retriever>>,
    controller: InvocationController,
    rag: RagConfig,
    event_tx: broadcast::Sender<ChatEvent>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(InvocationController::default())
    }
}

impl Session {
    pub fn new(controller: InvocationController) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            conversation: Conversation::new(),
            bot: None,
            retriever: None,
            controller,
            rag: RagConfig::default(),
            event_tx,
        }
    }

    /// Build a session from config. A bot that fails to load leaves the
    /// session unconfigured rather than failing.
    pub fn from_config(config: &Config) -> Self {
        let mut session = Self::new(InvocationController::new(&config.invocation));
        if let Err(e) = session.configure(config) {
            error!("Bot not loaded: {:#}", e);
        }
        session
    }

    pub fn with_bot(mut self, bot: Arc<dyn Bot>) -> Self {
        self.bot = Some(bot);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.event_tx.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<ChatEvent> {
        self.event_tx.clone()
    }

    fn broadcast(&self, event: ChatEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Validate `config` and swap in the bot, retriever and invocation
    /// policy it describes. Abandoned workers stay counted across the swap.
    pub fn configure(&mut self, config: &Config) -> anyhow::Result<()> {
        config.validate()?;
        let bot = providers::load_bot(&config.bot)?;
        self.configure_rag(&config.rag)?;
        self.bot = Some(bot);
        self.controller = self.controller.reconfigured(&config.invocation);
        info!(
            "Session configured: host={} model={}",
            config.bot.host,
            config.bot.model_name()
        );
        Ok(())
    }

    /// Attach an HTTP retriever for `rag.search_url`, or drop retrieval when unset.
    pub fn configure_rag(&mut self, rag: &RagConfig) -> anyhow::Result<()> {
        rag.validate()?;
        match HttpRetriever::from_config(rag)? {
            Some(retriever) => {
                info!("RAG enabled: {}", retriever.url());
                self.retriever = Some(Arc::new(retriever));
            }
            None => self.retriever = None,
        }
        self.rag = rag.clone();
        Ok(())
    }

    pub fn set_bot(&mut self, bot: Arc<dyn Bot>) {
        self.bot = Some(bot);
    }

    pub fn set_retriever(&mut self, retriever: Arc<dyn Retriever>) {
        self.retriever = Some(retriever);
    }

    pub fn clear_retriever(&mut self) {
        self.retriever = None;
    }

    pub fn rag_config(&self) -> &RagConfig {
        &self.rag
    }

    pub fn controller(&self) -> &InvocationController {
        &self.controller
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            bot_configured: self.bot.is_some(),
            rag_enabled: self.retriever.is_some(),
            retry_budget: self.conversation.retry_budget,
            message_count: self.conversation.len(),
        }
    }

    /// Clear history and retrieval; the bot configuration is kept.
    pub fn reset(&mut self) {
        self.conversation.clear();
        self.retriever = None;
        self.broadcast(ChatEvent::Reset);
        info!("Session reset");
    }

    /// Handle one user turn and append the assistant's answer.
    pub async fn ask(&mut self, question: &str) -> Result<Answer, ChatError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::EmptyQuestion);
        }

        let user_msg = Message::user(question);
        self.conversation.push(user_msg.clone());
        self.broadcast(ChatEvent::Message(user_msg));

        let Some(bot) = self.bot.clone() else {
            self.broadcast(ChatEvent::Error {
                text: ChatError::BotNotConfigured.to_string(),
            });
            return Err(ChatError::BotNotConfigured);
        };

        let context = match self.retrieve(question).await {
            Ok(ctx) => ctx,
            Err(e) => {
                error!("{}", e);
                self.broadcast(ChatEvent::Error { text: e.to_string() });
                return Err(e);
            }
        };

        self.broadcast(ChatEvent::Thinking {
            question: question.to_string(),
        });

        let before = self.conversation.retry_budget;
        let result = self
            .controller
            .respond(bot, context, question, &mut self.conversation.retry_budget)
            .await;

        let after = self.conversation.retry_budget;
        if after != before {
            self.broadcast(ChatEvent::RetryBudget { budget: after });
        }

        match result {
            Ok(answer) => {
                if answer.is_fallback() {
                    info!("Turn answered by fallback ({:?})", answer.source);
                }
                let reply = Message::assistant(answer.text.clone());
                self.conversation.push(reply.clone());
                self.broadcast(ChatEvent::Message(reply));
                self.broadcast(ChatEvent::Answered {
                    source: answer.source,
                });
                Ok(answer)
            }
            Err(e) => {
                error!("Bot invocation failed: {}", e);
                self.broadcast(ChatEvent::Error { text: e.to_string() });
                Err(e.into())
            }
        }
    }

    /// Retriever output for `question`, or None when RAG is off.
    async fn retrieve(&self, question: &str) -> Result<Option<String>, ChatError> {
        let Some(retriever) = self.retriever.clone() else {
            return Ok(None);
        };
        let question = question.to_string();
        let ctx = tokio::task::spawn_blocking(move || retriever.search_context(&question))
            .await
            .map_err(|e| ChatError::Retrieval(anyhow::anyhow!("retriever worker failed: {}", e)))?
            .map_err(ChatError::Retrieval)?;
        Ok(Some(ctx))
    }
}
