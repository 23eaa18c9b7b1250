// src/rag/mod.rs
//! Retrieval-augmented answers over the material catalogue.

pub mod llm_provider;
pub mod pipeline;
pub mod prompt;

pub use llm_provider::{create_llm_provider, GenerationRequest, LLMConfig, LLMError, LLMProvider};
pub use pipeline::{AnswerSource, RagAnswer, RagConfig, RagError, RagPipeline};
