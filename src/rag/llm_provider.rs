// src/rag/llm_provider.rs
// LLM Provider abstraction - pluggable architecture
// Default: Gemini over REST; Ollama for local runs.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// One grounded generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// LLM Provider trait - implement this to support new models
#[async_trait::async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the trimmed model text, which may be empty.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LLMError>;
    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum LLMConfig {
    Gemini {
        api_key: String,
        model: String,
        base_url: String,
    },
    Ollama {
        ollama_url: String,
        model: String,
    },
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self::Gemini {
            api_key: String::new(),
            model: "gemini-2.5-flash".to_string(),
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum LLMError {
    #[error("LLM connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),
    #[error("Generation failed: {0}")]
    GenerationFailed(String),
    #[error("Config error: {0}")]
    ConfigError(String),
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, LLMError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LLMError::ConfigError(e.to_string()))
}

/// Google Gemini `generateContent`.
pub struct GeminiProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String, base_url: String, timeout: Duration) -> Result<Self, LLMError> {
        if api_key.trim().is_empty() {
            return Err(LLMError::ConfigError("GEMINI_API_KEY is not set".to_string()));
        }
        Ok(Self {
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(timeout)?,
        })
    }

    fn body(request: &GenerationRequest) -> serde_json::Value {
        json!({
            "systemInstruction": { "parts": [{ "text": request.system }] },
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_output_tokens,
            },
        })
    }

    fn extract_text(resp: GeminiResponse) -> String {
        resp.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect::<String>())
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

#[async_trait::async_trait]
impl LLMProvider for GeminiProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LLMError> {
        debug!(model = %self.model, prompt_len = request.prompt.len(), "Generating with Gemini");
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::body(request))
            .send()
            .await
            .map_err(|e| LLMError::ConnectionFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LLMError::GenerationFailed(format!("HTTP {}: {}", status, detail)));
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;
        let text = Self::extract_text(parsed);
        info!(model = %self.model, response_len = text.len(), "Generation complete");
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Ollama-based LLM provider
pub struct OllamaProvider {
    url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaProvider {
    pub fn new(url: String, model: String, timeout: Duration) -> Result<Self, LLMError> {
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            model,
            client: http_client(timeout)?,
        })
    }
}

#[async_trait::async_trait]
impl LLMProvider for OllamaProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LLMError> {
        debug!(model = %self.model, prompt_len = request.prompt.len(), "Generating with Ollama");

        let url = format!("{}/api/generate", self.url);
        let body = json!({
            "model": self.model,
            "system": request.system,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_output_tokens,
            },
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::ConnectionFailed(format!("Cannot reach Ollama at {}: {}", self.url, e)))?;

        if !response.status().is_success() {
            return Err(LLMError::GenerationFailed(format!("HTTP {}", response.status())));
        }

        let ollama_resp: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;

        info!(model = %self.model, response_len = ollama_resp.response.len(), "Generation complete");
        Ok(ollama_resp.response.trim().to_string())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Factory function to create LLM provider from config. Does not touch the
/// network; an unreachable model surfaces on the first request.
pub fn create_llm_provider(config: LLMConfig, timeout: Duration) -> Result<Arc<dyn LLMProvider>, LLMError> {
    match config {
        LLMConfig::Gemini { api_key, model, base_url } => {
            info!(model = %model, "Initializing Gemini provider");
            Ok(Arc::new(GeminiProvider::new(api_key, model, base_url, timeout)?))
        }
        LLMConfig::Ollama { ollama_url, model } => {
            info!(model = %model, url = %ollama_url, "Initializing Ollama provider");
            Ok(Arc::new(OllamaProvider::new(ollama_url, model, timeout)?))
        }
    }
}
