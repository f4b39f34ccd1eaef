#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use ragbridge_bridge::testing::ScriptedTransport;
use ragbridge_bridge::{HttpRequest, HttpResponse, RetryPolicy};
use ragbridge_embeddings::EmbeddingConfig;
use ragbridge_rag::{GenerationConfig, GenerationOrchestrator, RagConfig};
use ragbridge_store::{MemoryStateStore, StateStore};
use ragbridge_vector_store::VectorStoreConfig;
use serde_json::{Value, json};

pub const ANSWER: &str = "Member X supports more public housing [1].";

/// Canned inference service and vector database.
pub struct Backend {
    pub models: Vec<String>,
    /// Blocking generate calls answered with 503 before the first success.
    pub failures: Arc<AtomicU32>,
    pub documents: Vec<Value>,
}

impl Backend {
    pub fn new(models: &[&str]) -> Self {
        Self {
            models: models.iter().map(|m| (*m).to_string()).collect(),
            failures: Arc::new(AtomicU32::new(0)),
            documents: vec![json!({
                "content": "Member X said the housing budget must double.",
                "title": "Housing debate",
                "member": "Member X",
                "party": "Green",
                "_additional": {"id": "doc-1", "certainty": 0.92, "distance": 0.16}
            })],
        }
    }

    pub fn failing(self, failures: u32) -> Self {
        self.failures.store(failures, Ordering::SeqCst);
        self
    }

    pub fn with_documents(mut self, documents: Vec<Value>) -> Self {
        self.documents = documents;
        self
    }

    pub fn transport(self) -> ScriptedTransport {
        ScriptedTransport::new(move |request| Ok(self.respond(request)))
    }

    fn respond(&self, request: &HttpRequest) -> HttpResponse {
        let url = request.url.as_str();
        if url.ends_with("/api/tags") {
            let models: Vec<Value> = self.models.iter().map(|m| json!({"name": m})).collect();
            return HttpResponse::new(200, json!({ "models": models }).to_string());
        }
        if url.ends_with("/api/embeddings") {
            return HttpResponse::new(200, r#"{"embedding":[0.1,0.2,0.3]}"#);
        }
        if url.ends_with("/v1/schema/Document") || url.ends_with("/v1/.well-known/ready") {
            return HttpResponse::new(200, "{}");
        }
        if url.ends_with("/v1/graphql") {
            let body = json!({"data": {"Get": {"Document": self.documents}}});
            return HttpResponse::new(200, body.to_string());
        }
        if url.ends_with("/api/generate") {
            let body = body(request);
            if body["stream"] == json!(true) {
                let lines = [
                    json!({"response": "Member X ", "done": false}),
                    json!({"response": "supports more ", "done": false}),
                    json!({"response": "public housing [1].", "done": false}),
                    json!({"response": "", "done": true, "prompt_eval_count": 120, "eval_count": 9,
                           "total_duration": 2_000_000_000u64, "eval_duration": 1_500_000_000u64}),
                ];
                let body: Vec<String> = lines.iter().map(Value::to_string).collect();
                return HttpResponse::new(200, body.join("\n"));
            }

            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return HttpResponse::new(503, "model is loading");
            }
            let reply = json!({
                "response": ANSWER,
                "done": true,
                "prompt_eval_count": 120,
                "eval_count": 9,
                "total_duration": 2_000_000_000u64,
                "eval_duration": 1_500_000_000u64
            });
            return HttpResponse::new(200, reply.to_string());
        }
        HttpResponse::new(404, "not found")
    }
}

pub fn body(request: &HttpRequest) -> Value {
    serde_json::from_str(request.body.as_deref().unwrap_or("null")).unwrap()
}

/// Bodies of every generate request, in order.
pub fn generate_bodies(transport: &ScriptedTransport) -> Vec<Value> {
    transport
        .requests()
        .iter()
        .filter(|r| r.url.ends_with("/api/generate"))
        .map(body)
        .collect()
}

pub fn config() -> RagConfig {
    RagConfig::default().with_generation(
        GenerationConfig::default()
            .with_default_model("llama3.1:8b")
            .with_fallback_model(Some("llama3.2:3b".to_string()))
            .with_retry(RetryPolicy::new(3, Duration::from_millis(100)).with_jitter(Duration::ZERO)),
    )
}

pub struct Harness {
    pub transport: ScriptedTransport,
    pub state: Arc<MemoryStateStore>,
    pub orchestrator: GenerationOrchestrator,
}

pub fn harness(backend: Backend, config: RagConfig) -> Harness {
    let transport = backend.transport();
    let state = Arc::new(MemoryStateStore::default());
    let orchestrator = GenerationOrchestrator::builder()
        .with_config(config)
        .with_embedding_config(EmbeddingConfig::default().with_dimension(3))
        .with_vector_store_config(VectorStoreConfig::default())
        .with_transport(Arc::new(transport.clone()))
        .with_health_check(Arc::new(transport.clone()))
        .with_state_store(state.clone())
        .build()
        .unwrap();
    Harness {
        transport,
        state,
        orchestrator,
    }
}

pub async fn stored_conversations(state: &MemoryStateStore) -> usize {
    state.keys("conversation:").await.unwrap().len()
}
