// src/rag/pipeline.rs
//! Cached, grounded answers: cache -> keyword search -> model -> cache.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::llm_provider::{GenerationRequest, LLMProvider};
use super::prompt::{build_context, extract_keywords, system_instruction};
use crate::cache::{CacheClient, CacheKey};
use crate::db::{MaterialSearch, MaterialStatus};
use crate::monitoring::metrics::{RAG_ANSWERS_TOTAL, RAG_LATENCY_MS};

pub const DEFAULT_FALLBACK: &str = "Something went wrong (possibly limit reached)";

#[derive(Debug, Error)]
pub enum RagError {
    #[error("prompt is required")]
    EmptyPrompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerSource {
    Cache,
    Generated,
    Fallback,
}

impl AnswerSource {
    fn label(&self) -> &'static str {
        match self {
            AnswerSource::Cache => "cache",
            AnswerSource::Generated => "generated",
            AnswerSource::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RagAnswer {
    pub text: String,
    pub source: AnswerSource,
}

#[derive(Debug, Clone)]
pub struct RagConfig {
    pub app_name: String,
    /// Only materials in this state ground answers.
    pub visibility: MaterialStatus,
    pub search_limit: usize,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub cache_ttl: Duration,
    pub model_timeout: Duration,
    pub fallback_message: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            app_name: "Zanly".to_string(),
            visibility: MaterialStatus::Approved,
            search_limit: 5,
            temperature: 0.7,
            max_output_tokens: 512,
            cache_ttl: Duration::from_secs(600),
            model_timeout: Duration::from_secs(30),
            fallback_message: DEFAULT_FALLBACK.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct RagPipeline {
    cache: CacheClient,
    search: Arc<dyn MaterialSearch>,
    llm: Arc<dyn LLMProvider>,
    config: RagConfig,
}

impl RagPipeline {
    pub fn new(
        cache: CacheClient,
        search: Arc<dyn MaterialSearch>,
        llm: Arc<dyn LLMProvider>,
        config: RagConfig,
    ) -> Self {
        Self {
            cache,
            search,
            llm,
            config,
        }
    }

    /// Only an empty prompt is an error. Store, cache and model failures
    /// degrade to an ungrounded answer or the fallback message.
    pub async fn answer(&self, prompt: &str) -> Result<RagAnswer, RagError> {
        if prompt.trim().is_empty() {
            return Err(RagError::EmptyPrompt);
        }
        let started = Instant::now();
        let answer = self.answer_inner(prompt).await;

        RAG_ANSWERS_TOTAL.with_label_values(&[answer.source.label()]).inc();
        RAG_LATENCY_MS.observe(started.elapsed().as_secs_f64() * 1000.0);
        Ok(answer)
    }

    async fn answer_inner(&self, prompt: &str) -> RagAnswer {
        let key = CacheKey::rag(prompt);

        match self.cache.get::<String>(key.as_str()).await {
            Ok(Some(text)) => {
                debug!(key = %key, "rag cache hit");
                return RagAnswer { text, source: AnswerSource::Cache };
            }
            Ok(None) => {}
            Err(e) => warn!(key = %key, op = "get", error = %e, "rag cache unavailable"),
        }

        let keywords = extract_keywords(prompt);
        let materials = if keywords.is_empty() {
            Vec::new()
        } else {
            match self
                .search
                .search_keywords(&keywords, self.config.visibility, self.config.search_limit)
                .await
            {
                Ok(found) => found,
                Err(e) => {
                    warn!(error = %e, "material search failed, answering without grounding");
                    Vec::new()
                }
            }
        };

        let request = GenerationRequest {
            system: system_instruction(&self.config.app_name, &build_context(&materials)),
            prompt: prompt.to_string(),
            temperature: self.config.temperature,
            max_output_tokens: self.config.max_output_tokens,
        };

        let generated = match tokio::time::timeout(self.config.model_timeout, self.llm.generate(&request)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => text,
            Ok(Ok(_)) => {
                warn!(model = self.llm.model_name(), "model returned empty text");
                return self.fallback();
            }
            Ok(Err(e)) => {
                warn!(model = self.llm.model_name(), error = %e, "model call failed");
                return self.fallback();
            }
            Err(_) => {
                warn!(
                    model = self.llm.model_name(),
                    timeout_ms = self.config.model_timeout.as_millis() as u64,
                    "model call timed out"
                );
                return self.fallback();
            }
        };

        if let Err(e) = self.cache.set(key.as_str(), &generated, self.config.cache_ttl).await {
            warn!(key = %key, op = "set", error = %e, "failed to cache rag answer");
        }
        info!(
            keywords = keywords.len(),
            grounded_on = materials.len(),
            response_len = generated.len(),
            "rag answer generated"
        );
        RagAnswer {
            text: generated,
            source: AnswerSource::Generated,
        }
    }

    fn fallback(&self) -> RagAnswer {
        RagAnswer {
            text: self.config.fallback_message.clone(),
            source: AnswerSource::Fallback,
        }
    }
}
