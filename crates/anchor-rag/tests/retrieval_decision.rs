//! End-to-end retrieval decision tests against an in-memory vector store
//! and scripted embedding/chat stubs.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use anchor_rag::config::{AppConfig, Distance, DomainConfig};
use anchor_rag::embed::Embedder;
use anchor_rag::error::{Error, Result};
use anchor_rag::llm::ChatModel;
use anchor_rag::retrieval::RetrievalService;
use anchor_rag::store::{SqliteVectorStore, VectorStore};
use anchor_rag::types::chunk::{hash_norm, ChunkKind, ChunkMeta, ChunkRecord};
use anchor_rag::types::{AnswerMode, SourcesUsed};

/// Embedder returning a fixed query vector; document vectors are chosen
/// per chunk at insert time, so raw scores are exact dot products.
struct FixedQueryEmbedder {
    query_vector: Vec<f32>,
}

#[async_trait]
impl Embedder for FixedQueryEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| self.query_vector.clone()).collect())
    }

    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(self.query_vector.clone())
    }

    fn dimension(&self) -> usize {
        self.query_vector.len()
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

/// Chat stub recording every prompt it sees.
struct ScriptedChat {
    reply: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedChat {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompt_count(&self) -> usize {
        self.prompts.lock().len()
    }

    fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().last().cloned()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn generate(&self, prompt: &str, _max_output_tokens: u32) -> Result<String> {
        self.prompts.lock().push(prompt.to_string());
        Ok(self.reply.clone())
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

fn chunk(
    chunk_id: &str,
    doc_id: &str,
    source: &str,
    text: &str,
    embedding: Vec<f32>,
    kind: ChunkKind,
) -> ChunkRecord {
    ChunkRecord {
        chunk_id: chunk_id.to_string(),
        doc_id: doc_id.to_string(),
        text: text.to_string(),
        source: source.to_string(),
        kind,
        meta: ChunkMeta::default(),
        hash_norm: Some(hash_norm(text)),
        embedding,
    }
}

/// Base configuration mirroring the demo deployment: alias MY_DEMO,
/// dot product, normalized scores, thresholds 0.2 / 0.45.
fn demo_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.embeddings.alias.name = "MY_DEMO".to_string();
    config.embeddings.dimension = 2;
    config.retrieval.top_k = 12;
    config.retrieval.distance = Distance::DotProduct;
    config.retrieval.threshold_low = 0.2;
    config.retrieval.threshold_high = 0.45;
    config.retrieval.short_query.max_tokens = 2;
    config.retrieval.hybrid.min_tokens_per_chunk = 10;
    config.retrieval.mmr_lambda = None;
    config
}

fn demo_store(rows: &[ChunkRecord]) -> Arc<dyn VectorStore> {
    let store = SqliteVectorStore::in_memory().unwrap();
    store
        .ensure_index_table("MY_DEMO_v1", 2, Distance::DotProduct)
        .unwrap();
    store.upsert("MY_DEMO_v1", rows, false).unwrap();
    store.ensure_alias("MY_DEMO", "MY_DEMO_v1").unwrap();
    Arc::new(store)
}

fn modem_chunk(embedding: Vec<f32>) -> ChunkRecord {
    chunk(
        "fiber_modem_reset_chunk_0001",
        "fiber_modem_reset",
        "fiber_manual.pdf",
        "Hold the reset button for 10 seconds.",
        embedding,
        ChunkKind::Text,
    )
}

fn service(
    store: Arc<dyn VectorStore>,
    config: &AppConfig,
    primary: Arc<ScriptedChat>,
    fallback: Arc<ScriptedChat>,
) -> RetrievalService {
    RetrievalService::new(
        store,
        Arc::new(FixedQueryEmbedder {
            query_vector: vec![1.0, 0.0],
        }),
        primary,
        fallback,
        config,
    )
}

#[tokio::test]
async fn rag_happy_path() {
    // Raw dot score 0.62 -> similarity 0.81 >= 0.45 -> rag
    let store = demo_store(&[modem_chunk(vec![0.62, 0.0])]);
    let config = demo_config();
    let primary = ScriptedChat::new("Hold the reset button for 10 seconds.");
    let fallback = ScriptedChat::new("generic answer");
    let svc = service(store, &config, primary.clone(), fallback.clone());

    let response = svc
        .answer("How do I reset my fiber modem?", None)
        .await
        .unwrap();

    assert_eq!(response.mode, AnswerMode::Rag);
    assert_eq!(response.used_chunks.len(), 1);
    assert_eq!(response.sources_used, SourcesUsed::All);
    assert_eq!(response.decision_explain.retrieval_target, "MY_DEMO");
    assert!((response.decision_explain.max_similarity - 0.81).abs() < 1e-4);
    assert!(!response.decision_explain.short_query_active);
    assert_eq!(response.answer2, None);
    assert_eq!(response.answer3, None);
    assert_eq!(primary.prompt_count(), 1);
    assert_eq!(fallback.prompt_count(), 0);
    let prompt = primary.last_prompt().unwrap();
    assert!(prompt.contains("[Context]"));
    assert!(prompt.contains("Hold the reset button"));
    assert!(prompt.contains("[Question]\nHow do I reset my fiber modem?"));
}

#[tokio::test]
async fn short_query_uses_tighter_thresholds() {
    let store = demo_store(&[modem_chunk(vec![0.62, 0.0])]);
    let mut config = demo_config();
    config.retrieval.short_query.threshold_high = Some(0.95);
    let primary = ScriptedChat::new("never called");
    let fallback = ScriptedChat::new("fallback answer");
    let svc = service(store, &config, primary.clone(), fallback.clone());

    let response = svc.answer("modem", None).await.unwrap();

    assert_eq!(response.mode, AnswerMode::Fallback);
    assert!(response.decision_explain.short_query_active);
    assert_eq!(
        response.decision_explain.reason.as_deref(),
        Some("below_threshold_high")
    );
    assert_eq!(response.answer, "fallback answer");
    assert_eq!(primary.prompt_count(), 0);
    assert_eq!(fallback.prompt_count(), 1);
    // The fallback prompt carries the bare question, no context block.
    assert!(!fallback.last_prompt().unwrap().contains("[Context]"));
}

#[tokio::test]
async fn short_query_low_override_reports_below_low() {
    let store = demo_store(&[modem_chunk(vec![0.62, 0.0])]);
    let mut config = demo_config();
    config.retrieval.short_query.threshold_low = Some(0.9);
    config.retrieval.short_query.threshold_high = Some(0.95);
    let primary = ScriptedChat::new("never called");
    let fallback = ScriptedChat::new("fb");
    let svc = service(store, &config, primary, fallback);

    let response = svc.answer("modem", None).await.unwrap();
    assert_eq!(response.mode, AnswerMode::Fallback);
    assert_eq!(
        response.decision_explain.reason.as_deref(),
        Some("below_threshold_low")
    );
}

#[tokio::test]
async fn one_token_past_the_short_boundary_is_a_normal_query() {
    let store = demo_store(&[modem_chunk(vec![0.62, 0.0])]);
    let mut config = demo_config();
    config.retrieval.short_query.max_tokens = 2;
    config.retrieval.short_query.threshold_high = Some(0.95);
    let primary = ScriptedChat::new("answer");
    let fallback = ScriptedChat::new("fb");
    let svc = service(store, &config, primary, fallback);

    // Exactly two alphabetic tokens: short thresholds apply.
    let short = svc.answer("reset modem", None).await.unwrap();
    assert!(short.decision_explain.short_query_active);

    // Three tokens: normal thresholds, similarity 0.81 -> rag.
    let normal = svc.answer("reset my modem", None).await.unwrap();
    assert!(!normal.decision_explain.short_query_active);
    assert_eq!(normal.mode, AnswerMode::Rag);
}

#[tokio::test]
async fn hybrid_gate_min_chunks_downgrades_to_fallback() {
    // Similarity 0.30 (raw -0.4) lands between low and high.
    let store = demo_store(&[modem_chunk(vec![-0.4, 0.0])]);
    let mut config = demo_config();
    config.retrieval.hybrid.min_chunks_for_hybrid = 3;
    let primary = ScriptedChat::new("never");
    let fallback = ScriptedChat::new("fallback answer");
    let svc = service(store, &config, primary, fallback);

    let response = svc.answer("how do I reset this", None).await.unwrap();

    assert_eq!(response.mode, AnswerMode::Fallback);
    assert_eq!(
        response.decision_explain.reason.as_deref(),
        Some("gate_failed_min_chunks")
    );
    assert!(response.used_chunks.is_empty());
    assert_eq!(response.sources_used, SourcesUsed::None);
}

#[tokio::test]
async fn hybrid_gate_min_context_downgrades_to_fallback() {
    let store = demo_store(&[modem_chunk(vec![-0.4, 0.0])]);
    let mut config = demo_config();
    config.retrieval.hybrid.min_total_context_chars = 5000;
    let primary = ScriptedChat::new("never");
    let fallback = ScriptedChat::new("fb");
    let svc = service(store, &config, primary, fallback);

    let response = svc.answer("how do I reset this", None).await.unwrap();
    assert_eq!(response.mode, AnswerMode::Fallback);
    assert_eq!(
        response.decision_explain.reason.as_deref(),
        Some("gate_failed_min_context")
    );
}

#[tokio::test]
async fn hybrid_passes_gates_and_uses_hybrid_prompt() {
    let store = demo_store(&[modem_chunk(vec![-0.4, 0.0])]);
    let mut config = demo_config();
    config.prompts.hybrid = "HYBRID-SYSTEM".to_string();
    let primary = ScriptedChat::new("a grounded answer");
    let fallback = ScriptedChat::new("fb");
    let svc = service(store, &config, primary.clone(), fallback.clone());

    let response = svc.answer("how do I reset this", None).await.unwrap();
    assert_eq!(response.mode, AnswerMode::Hybrid);
    assert_eq!(response.used_chunks.len(), 1);
    assert_eq!(response.sources_used, SourcesUsed::All);
    assert!(primary.last_prompt().unwrap().starts_with("HYBRID-SYSTEM"));
    assert_eq!(fallback.prompt_count(), 0);
}

#[tokio::test]
async fn figures_are_retrieved_but_never_prompted() {
    // Figure chunk scores higher than the text chunk.
    let rows = vec![
        chunk(
            "manual_chunk_0001",
            "manual",
            "manual.docx",
            "The reset procedure takes ten seconds to complete.",
            vec![0.4, 0.0],
            ChunkKind::Text,
        ),
        chunk(
            "manual_chunk_fig_001",
            "manual",
            "manual.docx",
            "Figure: reset-button.png",
            vec![0.8, 0.0],
            ChunkKind::Figure {
                figure_id: "fig_001".to_string(),
                image_ref: "manual/img_001.png".to_string(),
                parent_chunk_id: Some("manual_chunk_0001".to_string()),
                parent_chunk_local_index: Some(1),
            },
        ),
    ];
    let store = demo_store(&rows);
    let config = demo_config();
    let primary = ScriptedChat::new("grounded");
    let fallback = ScriptedChat::new("fb");
    let svc = service(store, &config, primary.clone(), fallback);

    let response = svc.answer("how do I reset the device", None).await.unwrap();

    assert_eq!(response.retrieved_chunks_metadata.len(), 2);
    // Mode decision uses the figure's similarity (raw 0.8 -> 0.9).
    assert!((response.decision_explain.max_similarity - 0.9).abs() < 1e-4);
    assert_eq!(response.mode, AnswerMode::Rag);
    assert_eq!(response.used_chunks.len(), 1);
    assert_eq!(response.used_chunks[0].chunk_id, "manual_chunk_0001");
    assert_eq!(response.sources_used, SourcesUsed::Partial);
    assert!(!primary.last_prompt().unwrap().contains("reset-button.png"));
    let figure_row = response
        .retrieved_chunks_metadata
        .iter()
        .find(|row| row.chunk_type == "figure")
        .unwrap();
    assert!(figure_row.similarity > 0.89);
}

#[tokio::test]
async fn no_context_token_reinvokes_fallback() {
    let store = demo_store(&[modem_chunk(vec![0.62, 0.0])]);
    let config = demo_config();
    let primary = ScriptedChat::new("__NO_CONTEXT__");
    let fallback = ScriptedChat::new("fallback took over");
    let svc = service(store, &config, primary.clone(), fallback.clone());

    let response = svc.answer("how do I reset my modem", None).await.unwrap();
    assert_eq!(response.mode, AnswerMode::Fallback);
    assert_eq!(
        response.decision_explain.reason.as_deref(),
        Some("llm_no_context_token")
    );
    assert_eq!(response.answer, "fallback took over");
    assert_eq!(response.decision_explain.used_llm, "fallback");
    assert_eq!(primary.prompt_count(), 1);
    assert_eq!(fallback.prompt_count(), 1);
}

#[tokio::test]
async fn empty_answer_reinvokes_fallback() {
    let store = demo_store(&[modem_chunk(vec![0.62, 0.0])]);
    let config = demo_config();
    let primary = ScriptedChat::new("   ");
    let fallback = ScriptedChat::new("fb answer");
    let svc = service(store, &config, primary, fallback);

    let response = svc.answer("how do I reset my modem", None).await.unwrap();
    assert_eq!(response.mode, AnswerMode::Fallback);
    assert_eq!(response.decision_explain.reason.as_deref(), Some("llm_empty"));
}

#[tokio::test]
async fn empty_question_is_bad_request() {
    let store = demo_store(&[modem_chunk(vec![0.62, 0.0])]);
    let config = demo_config();
    let svc = service(
        store,
        &config,
        ScriptedChat::new("x"),
        ScriptedChat::new("y"),
    );
    let err = svc.answer("   ", None).await.unwrap_err();
    assert!(matches!(err, Error::BadRequest(_)));
}

#[tokio::test]
async fn unknown_domain_is_rejected() {
    let store = demo_store(&[modem_chunk(vec![0.62, 0.0])]);
    let config = demo_config();
    let svc = service(
        store,
        &config,
        ScriptedChat::new("x"),
        ScriptedChat::new("y"),
    );
    let err = svc.answer("a question", Some("nope")).await.unwrap_err();
    assert!(matches!(err, Error::UnknownDomain(_)));
}

#[tokio::test]
async fn domain_key_routes_to_domain_alias() {
    let store = SqliteVectorStore::in_memory().unwrap();
    store
        .ensure_index_table("LEGAL_v1", 2, Distance::DotProduct)
        .unwrap();
    store
        .upsert(
            "LEGAL_v1",
            &[chunk(
                "contract_chunk_0001",
                "contract",
                "contract.pdf",
                "Termination requires thirty days written notice.",
                vec![0.7, 0.0],
                ChunkKind::Text,
            )],
            false,
        )
        .unwrap();
    store.ensure_alias("LEGAL_DOCS", "LEGAL_v1").unwrap();

    let mut config = demo_config();
    config.embeddings.domains.insert(
        "legal".to_string(),
        DomainConfig {
            index_name: "LEGAL".to_string(),
            alias_name: "LEGAL_DOCS".to_string(),
        },
    );
    let svc = service(
        Arc::new(store),
        &config,
        ScriptedChat::new("ok"),
        ScriptedChat::new("fb"),
    );

    let response = svc
        .answer("how is the contract terminated", Some("legal"))
        .await
        .unwrap();
    assert_eq!(response.decision_explain.retrieval_target, "LEGAL_DOCS");
    assert_eq!(response.used_chunks[0].chunk_id, "contract_chunk_0001");
}

#[tokio::test]
async fn similarities_are_always_in_unit_interval() {
    let rows = vec![
        modem_chunk(vec![3.0, 0.0]),
        chunk(
            "other_chunk_0001",
            "other",
            "other.pdf",
            "Completely unrelated content about billing cycles.",
            vec![-3.0, 0.0],
            ChunkKind::Text,
        ),
    ];
    let store = demo_store(&rows);
    let config = demo_config();
    let svc = service(
        store,
        &config,
        ScriptedChat::new("ok"),
        ScriptedChat::new("fb"),
    );

    let response = svc.answer("anything at all really", None).await.unwrap();
    for row in &response.retrieved_chunks_metadata {
        assert!(row.similarity >= 0.0 && row.similarity <= 1.0);
    }
}

#[tokio::test]
async fn alias_swap_changes_answers_atomically() {
    let store = SqliteVectorStore::in_memory().unwrap();
    store
        .ensure_index_table("MY_DEMO_v1", 2, Distance::DotProduct)
        .unwrap();
    store
        .upsert("MY_DEMO_v1", &[modem_chunk(vec![0.62, 0.0])], false)
        .unwrap();
    store
        .ensure_index_table("MY_DEMO_v2", 2, Distance::DotProduct)
        .unwrap();
    store
        .upsert(
            "MY_DEMO_v2",
            &[chunk(
                "manual_v2_chunk_0001",
                "manual_v2",
                "fiber_manual_v2.pdf",
                "Press and hold the reset button for fifteen seconds.",
                vec![0.62, 0.0],
                ChunkKind::Text,
            )],
            false,
        )
        .unwrap();
    store.ensure_alias("MY_DEMO", "MY_DEMO_v1").unwrap();
    let store: Arc<dyn VectorStore> = Arc::new(store);

    let config = demo_config();
    let svc = service(
        store.clone(),
        &config,
        ScriptedChat::new("ok"),
        ScriptedChat::new("fb"),
    );

    let before = svc.answer("how do I reset my modem", None).await.unwrap();
    assert_eq!(before.used_chunks[0].chunk_id, "fiber_modem_reset_chunk_0001");

    store.ensure_alias("MY_DEMO", "MY_DEMO_v2").unwrap();

    let after = svc.answer("how do I reset my modem", None).await.unwrap();
    assert_eq!(after.used_chunks[0].chunk_id, "manual_v2_chunk_0001");
}

#[tokio::test]
async fn identical_requests_make_identical_decisions() {
    let store = demo_store(&[modem_chunk(vec![0.62, 0.0])]);
    let config = demo_config();
    let svc = service(
        store,
        &config,
        ScriptedChat::new("ok"),
        ScriptedChat::new("fb"),
    );

    let first = svc.answer("how do I reset my modem", None).await.unwrap();
    let second = svc.answer("how do I reset my modem", None).await.unwrap();
    assert_eq!(first.mode, second.mode);
    assert_eq!(
        first.decision_explain.max_similarity,
        second.decision_explain.max_similarity
    );
    assert_eq!(
        first.decision_explain.threshold_high,
        second.decision_explain.threshold_high
    );
}
