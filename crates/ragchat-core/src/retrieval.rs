//! HTTP retriever — asks an external search service for document context.
//!
//! The service owns parsing, chunking and embedding. We POST
//! `{"query", "top_k"}` and accept either a ready-made `context` string or a
//! `results` array of chunks.

use anyhow::Result;
use serde_json::json;
use tracing::info;

use crate::bot::Retriever;
use crate::config::RagConfig;
use crate::providers::{block_on, build_client, post_json};

pub struct HttpRetriever {
    url: String,
    top_k: usize,
    client: reqwest::Client,
}

impl HttpRetriever {
    pub fn new(url: &str, top_k: usize) -> Result<Self> {
        Ok(Self {
            url: url.trim().to_string(),
            top_k,
            client: build_client()?,
        })
    }

    /// `None` when the config has no search URL.
    pub fn from_config(config: &RagConfig) -> Result<Option<Self>> {
        if !config.enabled() {
            return Ok(None);
        }
        let url = config.search_url.as_deref().unwrap_or_default();
        Ok(Some(Self::new(url, config.top_k)?))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request_body(&self, question: &str) -> serde_json::Value {
        json!({
            "query": question,
            "top_k": self.top_k,
        })
    }

    async fn search(&self, question: &str) -> Result<String> {
        info!("retrieval request: url={} top_k={}", self.url, self.top_k);
        let data = post_json(&self.client, &self.url, None, &self.request_body(question)).await?;
        parse_search_response(&data)
    }
}

impl Retriever for HttpRetriever {
    fn search_context(&self, question: &str) -> Result<String> {
        block_on(self.search(question))?
    }
}

/// Chunks are joined with a blank line, in the order the service ranked them.
fn parse_search_response(data: &serde_json::Value) -> Result<String> {
    if let Some(context) = data["context"].as_str() {
        return Ok(context.to_string());
    }

    let Some(results) = data["results"].as_array() else {
        anyhow::bail!("Search response has neither 'context' nor 'results'");
    };

    let chunks: Vec<&str> = results
        .iter()
        .filter_map(|r| {
            r.as_str()
                .or_else(|| r["text"].as_str())
                .or_else(|| r["content"].as_str())
        })
        .filter(|c| !c.trim().is_empty())
        .collect();

    Ok(chunks.join("\n\n"))
}
