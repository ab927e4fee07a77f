//! Configuration — YAML config + env var overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default model per host, used when `model` is unset.
const HOST_DEFAULT_MODELS: &[(Host, &str)] = &[
    (Host::Ollama, "llama3.1:8b"),
    (Host::HuggingFace, "deepseek-ai/DeepSeek-V3-0324"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Host {
    Ollama,
    #[default]
    #[serde(alias = "hf")]
    HuggingFace,
}

impl std::str::FromStr for Host {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Host::Ollama),
            "huggingface" | "hf" => Ok(Host::HuggingFace),
            other => anyhow::bail!("Unknown host '{}' (expected 'ollama' or 'huggingface')", other),
        }
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Host::Ollama => write!(f, "ollama"),
            Host::HuggingFace => write!(f, "huggingface"),
        }
    }
}

/// Which LLM host answers questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub host: Host,

    /// Model name; falls back to the host default
    #[serde(default)]
    pub model: Option<String>,

    /// Hugging Face access token
    #[serde(default)]
    pub token: Option<String>,

    /// Hugging Face inference provider (e.g. "hyperbolic")
    #[serde(default = "default_hf_provider")]
    pub provider: String,

    /// Ollama server URL
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
}

impl BotConfig {
    /// Take the token from `defaults` (server config, env applied) when this one has none.
    pub fn inherit_token(&mut self, defaults: &BotConfig) {
        let missing = self.token.as_deref().is_none_or(|t| t.trim().is_empty());
        if missing {
            self.token = defaults.token.clone();
        }
    }

    pub fn model_name(&self) -> &str {
        match self.model.as_deref() {
            Some(m) if !m.trim().is_empty() => m,
            _ => HOST_DEFAULT_MODELS
                .iter()
                .find(|(h, _)| *h == self.host)
                .map(|(_, m)| *m)
                .unwrap_or_default(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            host: Host::default(),
            model: None,
            token: None,
            provider: default_hf_provider(),
            ollama_url: default_ollama_url(),
        }
    }
}

/// Retrieval backend: an HTTP search service over the uploaded documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Search endpoint; unset means RAG is off
    #[serde(default)]
    pub search_url: Option<String>,

    /// Chunks requested per question
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl RagConfig {
    pub fn enabled(&self) -> bool {
        self.search_url
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(url) = self.search_url.as_deref().filter(|u| !u.trim().is_empty()) {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("rag.search_url must start with http:// or https://");
            }
        }
        if self.top_k == 0 {
            anyhow::bail!("rag.top_k must be greater than zero");
        }
        Ok(())
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            search_url: None,
            top_k: default_top_k(),
        }
    }
}

/// How the final apology is produced once the retry budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    /// Ask the bot to phrase the apology in the user's language
    #[default]
    Instruction,
    /// Return the canned English apology without calling the bot
    Literal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationConfig {
    /// Wall-clock deadline per bot attempt (seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Whether a successful retry restores the retry budget
    #[serde(default)]
    pub reset_budget_on_retry_success: bool,

    #[serde(default)]
    pub fallback: FallbackMode,
}

impl InvocationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            reset_budget_on_retry_success: false,
            fallback: FallbackMode::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,

    #[serde(default)]
    pub rag: RagConfig,

    #[serde(default)]
    pub invocation: InvocationConfig,
}

fn default_hf_provider() -> String {
    "hyperbolic".into()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".into()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_top_k() -> usize {
    4
}

impl Config {
    /// Load config from a YAML file with env var overrides.
    pub fn load(config_path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config: {}", config_path.display()))?;

        let mut config: Config =
            serde_yaml::from_str(&content).context("Failed to parse config.yaml")?;

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from the default location (project_root/config.yaml).
    /// A missing file means defaults, still subject to env var overrides.
    pub fn load_from_dir(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join("config.yaml");
        if config_path.is_file() {
            return Self::load(&config_path);
        }
        let mut config = Config::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(h) = std::env::var("RAGCHAT_HOST") {
            self.bot.host = h.parse()?;
        }
        if let Ok(m) = std::env::var("RAGCHAT_MODEL") {
            self.bot.model = Some(m);
        }
        if let Ok(url) = std::env::var("RAGCHAT_OLLAMA_URL") {
            self.bot.ollama_url = url;
        }
        if let Ok(p) = std::env::var("RAGCHAT_HF_PROVIDER") {
            self.bot.provider = p;
        }
        // Token: env var wins over config
        if let Ok(token) = std::env::var("HF_TOKEN") {
            self.bot.token = Some(token);
        }
        if let Ok(t) = std::env::var("RAGCHAT_TIMEOUT_SECS") {
            self.invocation.timeout_secs = t
                .parse()
                .with_context(|| format!("RAGCHAT_TIMEOUT_SECS is not a number: {}", t))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.invocation.timeout_secs == 0 {
            anyhow::bail!("invocation.timeout_secs must be greater than zero");
        }
        self.rag.validate()
    }
}
