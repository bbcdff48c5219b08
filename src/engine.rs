//! Extraction-engine abstraction and implementations.
//!
//! Defines the [`ExtractionEngine`] trait and concrete backends:
//! - **[`OllamaEngine`]**: calls a local Ollama instance's `/api/generate`
//!   endpoint.
//! - **[`OpenAiCompatEngine`]**: calls an OpenAI-compatible completions
//!   server (e.g. vLLM) at `/v1/completions`.
//! - **[`FallbackEngine`]**: delegates to a primary engine and falls back
//!   to a secondary one when the primary fails.
//!
//! # Profile Selection
//!
//! Use [`create_engine`] to instantiate the engine for a config profile:
//! `local` (Ollama), `remote` (OpenAI-compatible), or `hybrid`
//! (remote with local fallback).
//!
//! # Retry Strategy
//!
//! Both HTTP engines retry transient errors with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, ... (capped at 2^5)
//!
//! Engine failure is never fatal to the pipeline: callers treat an `Err`
//! as an empty extraction result and leave the chunk eligible for retry.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::EngineConfig;

/// A text-in, text-out extraction backend. The reply is free-form; the
/// caller is responsible for tolerant parsing.
#[async_trait]
pub trait ExtractionEngine: Send + Sync {
    /// Backend identifier for logs and the status snapshot.
    fn name(&self) -> &str;

    /// Submit a prompt and return the raw reply text.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Instantiate the engine for the configured (or overridden) profile.
pub fn create_engine(
    config: &EngineConfig,
    profile_override: Option<&str>,
) -> Result<Box<dyn ExtractionEngine>> {
    let profile = profile_override.unwrap_or(config.profile.as_str());
    match profile {
        "local" => Ok(Box::new(OllamaEngine::new(config))),
        "remote" => Ok(Box::new(OpenAiCompatEngine::new(config)?)),
        "hybrid" => {
            let remote = OpenAiCompatEngine::new(config)?;
            let local = OllamaEngine::new(config);
            Ok(Box::new(FallbackEngine::new(
                Box::new(remote),
                Box::new(local),
            )))
        }
        other => bail!("Unknown engine profile: '{}'. Must be local, remote, or hybrid.", other),
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// POST a JSON body with retry/backoff and extract the reply text with
/// `pick`. Shared by both HTTP engines.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
    max_retries: u32,
    pick: fn(&serde_json::Value) -> Option<String>,
) -> Result<String> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client.post(url).json(body).send().await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return pick(&json)
                        .ok_or_else(|| anyhow::anyhow!("Engine reply missing text field"));
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("Engine error {}: {}", status, body_text));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("Engine error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!("Engine unreachable at {}: {}", url, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Engine request failed after retries")))
}

// ============ Ollama Engine ============

/// Local Ollama backend (`POST /api/generate`, non-streaming).
pub struct OllamaEngine {
    url: String,
    model: String,
    timeout_secs: u64,
    max_retries: u32,
}

impl OllamaEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            url: config.local_url.clone(),
            model: config.local_model.clone(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        }
    }
}

#[async_trait]
impl ExtractionEngine for OllamaEngine {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let client = http_client(self.timeout_secs)?;
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": 0.1 },
        });
        post_with_retry(
            &client,
            &format!("{}/api/generate", self.url),
            &body,
            self.max_retries,
            |json| json.get("response").and_then(|r| r.as_str()).map(String::from),
        )
        .await
    }
}

// ============ OpenAI-compatible Engine ============

/// OpenAI-compatible completions backend (`POST /v1/completions`), as
/// served by vLLM and similar inference servers.
pub struct OpenAiCompatEngine {
    url: String,
    model: String,
    timeout_secs: u64,
    max_retries: u32,
}

impl OpenAiCompatEngine {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let url = config
            .remote_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("engine.remote_url required for remote profile"))?;
        let model = config
            .remote_model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("engine.remote_model required for remote profile"))?;
        Ok(Self {
            url,
            model,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ExtractionEngine for OpenAiCompatEngine {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let client = http_client(self.timeout_secs)?;
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "max_tokens": 1024,
            "temperature": 0.1,
            "stream": false,
        });
        post_with_retry(
            &client,
            &format!("{}/v1/completions", self.url),
            &body,
            self.max_retries,
            |json| {
                json.get("choices")
                    .and_then(|c| c.get(0))
                    .and_then(|c| c.get("text"))
                    .and_then(|t| t.as_str())
                    .map(String::from)
            },
        )
        .await
    }
}

// ============ Fallback Engine ============

/// Delegating engine: try the primary, fall back to the secondary when
/// the primary fails.
pub struct FallbackEngine {
    primary: Box<dyn ExtractionEngine>,
    fallback: Box<dyn ExtractionEngine>,
}

impl FallbackEngine {
    pub fn new(primary: Box<dyn ExtractionEngine>, fallback: Box<dyn ExtractionEngine>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl ExtractionEngine for FallbackEngine {
    fn name(&self) -> &str {
        "hybrid"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        match self.primary.generate(prompt).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                tracing::warn!(
                    "{} failed ({}); falling back to {}",
                    self.primary.name(),
                    e,
                    self.fallback.name()
                );
                self.fallback.generate(prompt).await
            }
        }
    }
}
