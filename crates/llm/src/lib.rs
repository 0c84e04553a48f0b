use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use rxdose_core::RxError;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::runtime::Runtime;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";

/// Prompts wrap the rows to extract between these markers so the offline
/// provider can find them again.
pub const DATA_BLOCK_START: &str = "=== DATA START ===";
pub const DATA_BLOCK_END: &str = "=== DATA END ===";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SupportedModel {
    #[default]
    Qwen3_14b,
    Qwen3_32b,
    Llama3_2,
    GptOss20b,
}

impl SupportedModel {
    pub const ALL: [SupportedModel; 4] = [
        SupportedModel::Qwen3_14b,
        SupportedModel::Qwen3_32b,
        SupportedModel::Llama3_2,
        SupportedModel::GptOss20b,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SupportedModel::Qwen3_14b => "qwen3:14b",
            SupportedModel::Qwen3_32b => "qwen3:32b",
            SupportedModel::Llama3_2 => "llama3.2:latest",
            SupportedModel::GptOss20b => "gpt-oss:20b",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        let lower = value.trim().to_lowercase();
        if lower == "llama3.2" {
            return Some(SupportedModel::Llama3_2);
        }
        Self::ALL.into_iter().find(|model| model.as_str() == lower)
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Accepts a model tag or its position in [`SupportedModel::ALL`].
    pub fn parse(value: &str) -> rxdose_core::Result<Self> {
        if let Ok(index) = value.trim().parse::<usize>() {
            return Self::from_index(index)
                .ok_or_else(|| RxError::UnknownModel(value.to_string()));
        }
        Self::from_str(value).ok_or_else(|| RxError::UnknownModel(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProvider {
    #[default]
    Ollama,
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Ollama => "ollama",
            LlmProvider::Local => "local",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "ollama" => Some(LlmProvider::Ollama),
            "local" => Some(LlmProvider::Local),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Text generation capability the pipeline is written against. One call per
/// batch; implementations keep no state between calls.
pub trait Generator: Send + Sync {
    fn generate(&self, request: &LlmRequest) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub base_url: String,
    pub request_timeout: Option<Duration>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: None,
        }
    }
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    provider: LlmProvider,
    model: SupportedModel,
    base_url: String,
}

impl LlmClient {
    pub fn new(
        provider: LlmProvider,
        model: SupportedModel,
        settings: &GatewaySettings,
    ) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = settings.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("failed to build http client")?;
        Ok(Self {
            http,
            provider,
            model,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> SupportedModel {
        self.model
    }

    pub async fn chat(&self, req: &LlmRequest) -> Result<LlmResponse> {
        match self.provider {
            LlmProvider::Ollama => self.chat_ollama(req).await,
            LlmProvider::Local => Ok(self.chat_local(req)),
        }
    }

    pub fn chat_blocking(&self, req: &LlmRequest) -> Result<LlmResponse> {
        let rt = Runtime::new().context("failed to create tokio runtime")?;
        rt.block_on(self.chat(req))
    }

    async fn chat_ollama(&self, req: &LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = chat_payload(self.model, req);
        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("ollama request to {url} failed"))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!(format!(
                "ollama returned error (status {}): {}",
                status, body
            )));
        }
        let value: Value =
            serde_json::from_str(&body).context("failed to decode ollama response")?;
        let content =
            extract_chat_text(&value).ok_or_else(|| anyhow!("missing text in ollama response"))?;
        let usage: ChatUsage = value
            .get("usage")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default();
        debug!(
            model = self.model.as_str(),
            prompt_tokens = usage.prompt_tokens.unwrap_or(0),
            completion_tokens = usage.completion_tokens.unwrap_or(0),
            "ollama chat completed"
        );
        Ok(LlmResponse {
            content,
            prompt_tokens: usage.prompt_tokens.unwrap_or(0),
            completion_tokens: usage.completion_tokens.unwrap_or(0),
        })
    }

    fn chat_local(&self, req: &LlmRequest) -> LlmResponse {
        LlmResponse {
            content: synthesize_local_response(req),
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }
}

impl Generator for LlmClient {
    fn generate(&self, request: &LlmRequest) -> Result<String> {
        self.chat_blocking(request).map(|response| response.content)
    }
}

fn chat_payload(model: SupportedModel, req: &LlmRequest) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = &req.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": req.user }));
    json!({
        "model": model.as_str(),
        "messages": messages,
        "stream": false,
    })
}

// Offline stand-in: one "0,0,0" line per data row, i.e. "undetermined" for
// every field.
fn synthesize_local_response(req: &LlmRequest) -> String {
    let block = extract_context_block(&req.user, DATA_BLOCK_START, DATA_BLOCK_END);
    block
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|_| "0,0,0")
        .collect::<Vec<_>>()
        .join("\n")
}

fn extract_context_block(text: &str, start_marker: &str, stop_marker: &str) -> String {
    if let Some(start_idx) = text.find(start_marker) {
        let after = &text[start_idx + start_marker.len()..];
        if let Some(end_idx) = after.find(stop_marker) {
            return after[..end_idx].trim().to_string();
        }
        return after.trim().to_string();
    }
    String::new()
}

fn extract_chat_text(value: &Value) -> Option<String> {
    let choice = value.get("choices")?.as_array()?.first()?;
    if let Some(text) = choice.get("text").and_then(|t| t.as_str()) {
        return Some(text.to_string());
    }
    let content = choice.get("message")?.get("content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(|t| t.as_str()))
        .map(|text| text.to_string())
}

#[derive(Default, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}
