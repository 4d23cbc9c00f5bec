//! End-to-end tests across the engine, registry, retrieval, and stores.

use std::sync::Arc;

use serde_json::{Value, json};

use ensemble::agent::{Engine, NO_FINAL_TEXT};
use ensemble::cancel::CancelToken;
use ensemble::chat::ChatResponse;
use ensemble::config::{RuntimeConfig, VectorMetric};
use ensemble::embedding::MockEmbeddings;
use ensemble::error::{Error, Result};
use ensemble::ingest::{ChunkOptions, IngestRequest, Ingestor};
use ensemble::message::{Message, Role, ToolCall};
use ensemble::providers::MockProvider;
use ensemble::retrieval::{
    MemorySearchStore, MemoryVectorStore, RetrieveOptions, Retriever, SearchStore,
};
use ensemble::runtime::{RunRequest, Runtime};
use ensemble::tool::{Tool, ToolContext, ToolRegistry};
use ensemble::warpp::{TrimmedWorkflow, run_gate};

struct Upper;

#[async_trait::async_trait]
impl Tool for Upper {
    fn name(&self) -> &str {
        "upper"
    }

    fn description(&self) -> &str {
        "Uppercase text"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }

    async fn call(&self, _ctx: &ToolContext, args: Value) -> Result<Value> {
        let text = args
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid("missing 'text'"))?;
        Ok(Value::String(text.to_uppercase()))
    }
}

fn upper_registry() -> Arc<ToolRegistry> {
    let registry = Arc::new(ToolRegistry::new());
    registry.register(Arc::new(Upper));
    registry
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The ring drops the oldest item at capacity, observed from a plain
/// blocking harness.
#[test]
fn ring_memory_from_blocking_harness() {
    use ensemble::memory::{MemoryItem, RingMemory};

    tokio_test::block_on(async {
        let ring = RingMemory::new(2);
        for n in 0..3 {
            ring.store(MemoryItem::ok("t", json!({"n": n}), json!(n)))
                .await
                .unwrap();
        }
        let items = ring.recall(5).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].observation.output, Some(json!(1)));
        assert_eq!(items[1].observation.output, Some(json!(2)));
    });
}

/// The model asks for one tool call, then answers with its result.
#[tokio::test]
async fn tool_loop_single_call() {
    init_tracing();
    let provider = Arc::new(MockProvider::new(vec![
        ChatResponse::new(Message::assistant_with_tool_calls(
            "",
            vec![ToolCall::new("c1", "upper", json!({"text": "hello"}))],
        )),
        ChatResponse::from_text("HELLO"),
    ]));

    let engine = Engine::new(Arc::clone(&provider) as _, upper_registry() as _)
        .with_system("You are helpful.");
    let outcome = engine
        .run(&ToolContext::new(), "uppercase hello", &[])
        .await
        .unwrap();

    assert_eq!(outcome.final_text, "HELLO");
    assert_eq!(provider.calls(), 2);

    // Transcript shape: system, user, assistant(+call), tool, assistant.
    let roles: Vec<Role> = outcome.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::System,
            Role::User,
            Role::Assistant,
            Role::Tool,
            Role::Assistant
        ]
    );
    assert_eq!(outcome.messages[3].tool_call_id.as_deref(), Some("c1"));
}

/// Fan-out through the parallel meta-tool preserves submission order.
#[tokio::test]
async fn parallel_fan_out_order() {
    let registry = upper_registry();
    let parallel = ensemble::tool::ParallelTool::new(Arc::clone(&registry)).with_max_parallel(2);

    let aggregate = parallel
        .call(
            &ToolContext::new(),
            json!({"tool_uses": [
                {"recipient_name": "functions.upper", "parameters": {"text": "a"}},
                {"recipient_name": "functions.upper", "parameters": {"text": "b"}},
            ]}),
        )
        .await
        .unwrap();

    assert_eq!(aggregate["ok"], true);
    let results = aggregate["results"].as_array().unwrap();
    assert_eq!(results[0]["value"], "A");
    assert_eq!(results[1]["value"], "B");
}

/// Ingest then retrieve: fused results carry ranks and explanations.
#[tokio::test]
async fn ingest_then_hybrid_retrieve() {
    let search = Arc::new(MemorySearchStore::new());
    let vector = Arc::new(MemoryVectorStore::new(4, VectorMetric::Cosine));
    let embedder = Arc::new(MockEmbeddings::new(4));

    let ingestor = Ingestor::new(Arc::clone(&search) as Arc<dyn SearchStore>)
        .with_vector(Arc::clone(&vector) as _, Arc::clone(&embedder) as _)
        .with_min_embed_delay(std::time::Duration::from_millis(1));

    let outcome = ingestor
        .ingest(IngestRequest {
            title: Some("Alpha handbook".into()),
            url: Some("https://docs/alpha".into()),
            source: "upload".into(),
            tenant: Some("acme".into()),
            text: "alpha procedures are documented here. alpha again.".into(),
            chunking: ChunkOptions {
                max_tokens: 64,
                overlap_tokens: 0,
                ..ChunkOptions::default()
            },
            embed: true,
            ..IngestRequest::default()
        })
        .await
        .unwrap();
    assert!(!outcome.skipped);

    let retriever = Retriever::new()
        .with_search(Arc::clone(&search) as _)
        .with_vector(Arc::clone(&vector) as _, embedder as _);

    let result = retriever
        .retrieve(
            "alpha procedures",
            &RetrieveOptions {
                k: 3,
                tenant: Some("acme".into()),
                ..RetrieveOptions::default()
            },
        )
        .await
        .unwrap();

    assert!(!result.items.is_empty());
    let top = &result.items[0];
    assert_eq!(top.doc_id, outcome.doc_id);
    assert_eq!(top.title.as_deref(), Some("Alpha handbook"));
    assert!(top.explanation.contains_key("fused"));
    assert!(top.explanation.contains_key("ft_rank"));
    assert!(top.snippet.contains("alpha"));
}

/// Re-ingesting unchanged content is observably a no-op.
#[tokio::test]
async fn repeat_ingest_is_idempotent() {
    let search = Arc::new(MemorySearchStore::new());
    let ingestor = Ingestor::new(Arc::clone(&search) as Arc<dyn SearchStore>);

    let request = IngestRequest {
        source: "upload".into(),
        text: "identical content".into(),
        ..IngestRequest::default()
    };
    let first = ingestor.ingest(request.clone()).await.unwrap();
    let count = search.chunk_count().await.unwrap();

    let second = ingestor.ingest(request).await.unwrap();
    assert!(second.skipped);
    assert_eq!((second.doc_id, second.version), (first.doc_id, first.version));
    assert_eq!(search.chunk_count().await.unwrap(), count);
}

/// WARPP: fulfillment sees exactly the trimmed artifacts; denied auth
/// blocks it.
#[tokio::test]
async fn warpp_gate_end_to_end() {
    let cancel = CancelToken::new();

    let fulfilled = run_gate(
        &cancel,
        |_gate| async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(true)
        },
        |_gate| async {
            Ok(TrimmedWorkflow {
                steps: vec!["s1".into(), "s3".into()],
                tools: vec!["exec:Submit".into()],
            })
        },
        |trimmed: TrimmedWorkflow| async move {
            assert_eq!(trimmed.steps, vec!["s1", "s3"]);
            assert_eq!(trimmed.tools, vec!["exec:Submit"]);
            Ok("updateAddress complete")
        },
    )
    .await
    .unwrap();
    assert_eq!(fulfilled, "updateAddress complete");

    let denied = run_gate(
        &cancel,
        |_gate| async { Ok(false) },
        |_gate| async { Ok(TrimmedWorkflow::default()) },
        |_trimmed| async { Ok("never") },
    )
    .await
    .unwrap_err();
    assert_eq!(denied.kind(), "auth_required");
}

/// A full runtime pass: sandboxed tool call, session persistence, and the
/// step-exhaustion sentinel.
#[tokio::test]
async fn runtime_round_trip() {
    let config = RuntimeConfig {
        workdir: tempfile::tempdir().unwrap().keep(),
        default_model: "m".into(),
        ..RuntimeConfig::default()
    };

    let provider = Arc::new(MockProvider::new(vec![
        ChatResponse::new(Message::assistant_with_tool_calls(
            "",
            vec![ToolCall::new(
                "c1",
                "file_write",
                json!({"path": "report.md", "content": "# Findings"}),
            )],
        )),
        ChatResponse::from_text("report written"),
    ]));

    let runtime = Runtime::builder(config, Arc::clone(&provider) as _)
        .build()
        .unwrap();

    let response = runtime
        .run(
            RunRequest {
                user_id: Some("u1".into()),
                project_id: Some("p1".into()),
                session_id: Some("workbench".into()),
                prompt: "write the report".into(),
                ..RunRequest::default()
            },
            CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(response.result, "report written");
    let session_id = response.session_id.unwrap();
    let messages = runtime
        .chat_store()
        .list_messages(Some("u1"), &session_id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
}

/// MaxSteps = 0 returns the sentinel without a provider call.
#[tokio::test]
async fn zero_step_budget_sentinel() {
    let provider = Arc::new(MockProvider::new(vec![ChatResponse::from_text("unused")]));
    let engine = Engine::new(Arc::clone(&provider) as _, upper_registry() as _).with_max_steps(0);

    let outcome = engine.run(&ToolContext::new(), "anything", &[]).await.unwrap();
    assert_eq!(outcome.final_text, NO_FINAL_TEXT);
    assert_eq!(provider.calls(), 0);
}
