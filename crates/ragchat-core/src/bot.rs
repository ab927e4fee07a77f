//! Answer generator and retriever contracts.
//!
//! Both are synchronous on purpose: adapters may block for a long time and
//! the invocation controller runs them on the blocking pool.

use anyhow::Result;

/// An LLM answer generator, independent of which host backs it.
pub trait Bot: Send + Sync {
    /// Produce an answer. `context` is retrieved text, passed through as-is.
    fn answer(&self, context: Option<&str>, question: &str) -> Result<String>;
}

impl<F> Bot for F
where
    F: Fn(Option<&str>, &str) -> Result<String> + Send + Sync,
{
    fn answer(&self, context: Option<&str>, question: &str) -> Result<String> {
        self(context, question)
    }
}

/// Supplies grounding text for a question (the RAG side).
pub trait Retriever: Send + Sync {
    fn search_context(&self, question: &str) -> Result<String>;
}

impl<F> Retriever for F
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    fn search_context(&self, question: &str) -> Result<String> {
        self(question)
    }
}
