//! LLM host adapters — Ollama native chat API or the Hugging Face router
//! (OpenAI-compatible Chat Completions), exposed through the blocking `Bot`
//! contract.
//!
//! The HTTP calls are async reqwest; `answer` drives them with the runtime
//! handle of the blocking worker it runs on.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{error, info};

use crate::bot::Bot;
use crate::config::{BotConfig, Host};

const SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the user's question clearly and concisely, in the same language the question is written in.";

const HF_ROUTER_URL: &str = "https://router.huggingface.co";

/// Transport-level ceiling. The invocation controller enforces the real deadline.
const HTTP_TIMEOUT_SECS: u64 = 600;

pub(crate) fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
        .context("Failed to build HTTP client")
}

/// Run `fut` to completion from a blocking worker thread.
pub(crate) fn block_on<F: Future>(fut: F) -> Result<F::Output> {
    let handle = tokio::runtime::Handle::try_current()
        .context("LLM adapters must run on a tokio blocking worker")?;
    Ok(handle.block_on(fut))
}

// ── Prompt ──

/// System prompt, optional context, then the question.
pub fn build_messages(context: Option<&str>, question: &str) -> Vec<serde_json::Value> {
    let mut messages = vec![json!({"role": "system", "content": SYSTEM_PROMPT})];
    if let Some(ctx) = context {
        messages.push(json!({
            "role": "system",
            "content": format!("Context:\n{}", ctx),
        }));
    }
    messages.push(json!({"role": "user", "content": question}));
    messages
}

fn truncate(body: &str, max: usize) -> &str {
    let mut end = body.len().min(max);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

pub(crate) async fn post_json(
    client: &reqwest::Client,
    url: &str,
    token: Option<&str>,
    body: &serde_json::Value,
) -> Result<serde_json::Value> {
    let mut request = client
        .post(url)
        .header("Content-Type", "application/json")
        .json(body);
    if let Some(token) = token {
        request = request.header("Authorization", format!("Bearer {}", token));
    }

    let response = request.send().await.context("HTTP request failed")?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!("API HTTP {}: {} | url={}", status, truncate(&body, 500), url);
        anyhow::bail!("API call failed: HTTP {} — {}", status, truncate(&body, 200));
    }

    response
        .json()
        .await
        .context("Failed to parse API response")
}

// ── Ollama ──

pub struct OllamaBot {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaBot {
    pub fn new(base_url: &str, model: &str) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: build_client()?,
        })
    }

    fn request_body(&self, context: Option<&str>, question: &str) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": build_messages(context, question),
            "stream": false,
        })
    }

    async fn chat(&self, context: Option<&str>, question: &str) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);
        info!("ollama chat request: model={} context={}", self.model, context.is_some());
        let data = post_json(&self.client, &url, None, &self.request_body(context, question)).await?;
        parse_ollama_response(&data)
    }
}

impl Bot for OllamaBot {
    fn answer(&self, context: Option<&str>, question: &str) -> Result<String> {
        block_on(self.chat(context, question))?
    }
}

fn parse_ollama_response(data: &serde_json::Value) -> Result<String> {
    data.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .map(String::from)
        .context("Ollama response has no message.content")
}

/// Names of the models installed on an Ollama server.
pub async fn list_ollama_models(base_url: &str) -> Result<Vec<String>> {
    let url = format!("{}/api/tags", base_url.trim_end_matches('/'));
    let response = build_client()?
        .get(&url)
        .send()
        .await
        .context("Could not connect to Ollama. Make sure it's installed and running.")?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("Ollama model listing failed: HTTP {}", status);
    }

    let data: serde_json::Value = response
        .json()
        .await
        .context("Failed to parse Ollama model list")?;
    Ok(parse_model_list(&data))
}

fn parse_model_list(data: &serde_json::Value) -> Vec<String> {
    data.get("models")
        .and_then(|v| v.as_array())
        .map(|models| {
            models
                .iter()
                .filter_map(|m| {
                    m.get("name")
                        .or_else(|| m.get("model"))
                        .and_then(|v| v.as_str())
                        .map(String::from)
                })
                .collect()
        })
        .unwrap_or_default()
}

// ── Hugging Face ──

pub struct HuggingFaceBot {
    model: String,
    token: String,
    provider: String,
    client: reqwest::Client,
}

impl HuggingFaceBot {
    pub fn new(model: &str, token: &str, provider: &str) -> Result<Self> {
        Ok(Self {
            model: model.to_string(),
            token: token.to_string(),
            provider: provider.trim().to_string(),
            client: build_client()?,
        })
    }

    fn url(&self) -> String {
        hf_chat_url(&self.provider)
    }

    fn request_body(&self, context: Option<&str>, question: &str) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": build_messages(context, question),
        })
    }

    async fn chat(&self, context: Option<&str>, question: &str) -> Result<String> {
        info!(
            "hf chat request: model={} provider={} context={}",
            self.model,
            self.provider,
            context.is_some()
        );
        let data = post_json(
            &self.client,
            &self.url(),
            Some(&self.token),
            &self.request_body(context, question),
        )
        .await?;
        parse_completions_response(&data)
    }
}

impl Bot for HuggingFaceBot {
    fn answer(&self, context: Option<&str>, question: &str) -> Result<String> {
        block_on(self.chat(context, question))?
    }
}

/// Router endpoint; an empty provider lets Hugging Face pick one.
fn hf_chat_url(provider: &str) -> String {
    if provider.is_empty() {
        format!("{}/v1/chat/completions", HF_ROUTER_URL)
    } else {
        format!("{}/{}/v1/chat/completions", HF_ROUTER_URL, provider)
    }
}

fn parse_completions_response(data: &serde_json::Value) -> Result<String> {
    data["choices"][0]["message"]
        .get("content")
        .and_then(|v| v.as_str())
        .map(String::from)
        .context("Completions response has no choices[0].message.content")
}

// ── Public API ──

/// Build the bot described by `config`.
pub fn load_bot(config: &BotConfig) -> Result<Arc<dyn Bot>> {
    let model = config.model_name();
    match config.host {
        Host::Ollama => Ok(Arc::new(OllamaBot::new(&config.ollama_url, model)?)),
        Host::HuggingFace => {
            let token = config
                .token
                .as_deref()
                .filter(|t| !t.trim().is_empty())
                .context("Hugging Face host requires a token (bot.token or HF_TOKEN)")?;
            Ok(Arc::new(HuggingFaceBot::new(model, token, &config.provider)?))
        }
    }
}
