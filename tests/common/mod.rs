// tests/common/mod.rs
// Shared fixtures: an AppState on in-memory backends and a scripted model.
#![allow(dead_code)]

use actix_web::web;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use zanly::api::AppState;
use zanly::cache::{CacheAside, CacheClient, MemoryCache};
use zanly::db::SqliteStore;
use zanly::queue::{JobQueue, MemoryQueue};
use zanly::rag::{GenerationRequest, LLMError, LLMProvider, RagConfig, RagPipeline};

/// Replies with a fixed text and remembers every request.
pub struct ScriptedModel {
    pub reply: String,
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedModel {
    pub fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LLMProvider for ScriptedModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LLMError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        Ok(self.reply.clone())
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

pub struct Harness {
    pub state: web::Data<AppState>,
    pub store: Arc<SqliteStore>,
    pub cache: CacheClient,
    pub queue: Arc<MemoryQueue>,
    pub model: Arc<ScriptedModel>,
}

pub fn harness() -> Harness {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let cache = CacheClient::new(Arc::new(MemoryCache::new(1024)), Duration::from_millis(250));
    let queue = Arc::new(MemoryQueue::new(3));
    let model = ScriptedModel::new("Try the Class 10 physics notes.");

    let rag = RagPipeline::new(cache.clone(), store.clone(), model.clone(), RagConfig::default());
    let job_queue: Arc<dyn JobQueue> = queue.clone();
    let state = web::Data::new(AppState::new(
        store.clone(),
        CacheAside::new(cache.clone()),
        job_queue,
        rag,
        Duration::from_secs(300),
    ));

    Harness {
        state,
        store,
        cache,
        queue,
        model,
    }
}
