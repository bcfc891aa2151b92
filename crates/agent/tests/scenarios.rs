//! Request-level scenarios and resource guarantees for the pipeline.

#[path = "../src/test_helpers.rs"]
mod test_helpers;

use std::sync::Arc;
use std::time::Duration;

use ragline_agent::{
    EmbedderAdapter, KnowledgeAdapter, Pipeline, PipelineConfig, ResponseSplitter, RetryPolicy,
    SessionManager, Template,
};
use ragline_config::{AppConfig, DEFAULT_TEMPLATE};
use ragline_core::{Embedder, Error, PromptRequest};
use test_helpers::{FailingEmbedder, LetterEmbedder, MockRuntime, MockStore, Step};
use tokio_util::sync::CancellationToken;

fn pipeline_with(
    runtime: Arc<MockRuntime>,
    embedder: Arc<dyn Embedder>,
    store: Arc<MockStore>,
    template: &str,
) -> Pipeline {
    Pipeline::new(
        PipelineConfig::from_config(&AppConfig::default()),
        Template::parse(template).unwrap(),
        SessionManager::new(runtime),
        KnowledgeAdapter::new(EmbedderAdapter::new(embedder), store),
        None,
    )
}

// ── Scenario A: empty knowledge, empty context ───────────────────────────

#[tokio::test]
async fn scenario_a_empty_store_yields_empty_context() {
    let runtime = Arc::new(MockRuntime::replying(&["Hi there"]));
    let store = Arc::new(MockStore::default());
    let pipeline = pipeline_with(runtime.clone(), Arc::new(LetterEmbedder), store, DEFAULT_TEMPLATE);

    let outcome = pipeline
        .handle(&PromptRequest::new("Hello", ""), None, &CancellationToken::new())
        .await
        .unwrap();

    // Summarizing "" never touches the model: one session, for the answer.
    assert_eq!(runtime.created(), 1);
    assert!(outcome
        .assembled_prompt
        .contains("Context:\n\n\nUser Prompt:\nHello"));
    assert_eq!(outcome.payload.token, "Hi there");
    assert!(outcome.payload.completed);
    assert_eq!(outcome.payload.prompt_length, 5);
}

// ── Scenarios B and C: reasoning split ───────────────────────────────────

#[tokio::test]
async fn scenario_b_marker_separates_reasoning() {
    let runtime = Arc::new(MockRuntime::replying(&["thinking...</think>final answer"]));
    let pipeline = pipeline_with(runtime, Arc::new(LetterEmbedder), Arc::default(), DEFAULT_TEMPLATE);

    let outcome = pipeline
        .handle(&PromptRequest::new("Why?", ""), None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.payload.reasoning, "thinking...");
    assert_eq!(outcome.payload.token, "final answer");
}

#[tokio::test]
async fn scenario_c_no_marker_is_all_answer() {
    let runtime = Arc::new(MockRuntime::replying(&["just an answer"]));
    let pipeline = pipeline_with(runtime, Arc::new(LetterEmbedder), Arc::default(), DEFAULT_TEMPLATE);

    let outcome = pipeline
        .handle(&PromptRequest::new("Why?", ""), None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.payload.reasoning, "");
    assert_eq!(outcome.payload.token, "just an answer");
}

// ── Scenario D: streaming metrics ────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn scenario_d_streaming_metrics() {
    let runtime = Arc::new(MockRuntime::new(vec![vec![
        Step::Wait(Duration::from_secs(1)),
        Step::piece("He"),
        Step::Wait(Duration::from_secs(1)),
        Step::piece("llo"),
    ]]));
    let sessions = SessionManager::new(runtime.clone());

    let output = sessions
        .run("prompt", &[], None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(output.text, "Hello");
    assert_eq!(output.token_count, 5);
    assert_eq!(output.elapsed_seconds, 2.0);
    assert_eq!(output.tokens_per_second, 2.5);
}

#[tokio::test(start_paused = true)]
async fn scenario_d_payload_metrics() {
    let mut config = AppConfig::default();
    config.pipeline.rag_enabled = false;
    config.pipeline.summarization_enabled = false;

    let runtime = Arc::new(MockRuntime::new(vec![vec![
        Step::Wait(Duration::from_secs(1)),
        Step::piece("He"),
        Step::Wait(Duration::from_secs(1)),
        Step::piece("llo"),
    ]]));
    let knowledge = KnowledgeAdapter::new(
        EmbedderAdapter::new(Arc::new(LetterEmbedder)),
        Arc::new(MockStore::default()),
    );
    let pipeline = Pipeline::from_config(&config, runtime, knowledge, None).unwrap();

    let payload = pipeline
        .handle(&PromptRequest::new("Hi", ""), None, &CancellationToken::new())
        .await
        .unwrap()
        .payload;
    assert_eq!(payload.token, "Hello");
    assert_eq!(payload.response_length, 5);
    assert_eq!(payload.speed, 2.5);
    assert_eq!(payload.elapsed_time, 2.0);
}

// ── Recall feeds later prompts ───────────────────────────────────────────

#[tokio::test]
async fn persisted_exchange_is_recalled_next_time() {
    let runtime = Arc::new(MockRuntime::replying(&["ignored summary"]));
    let store = Arc::new(MockStore::default());
    let mut config = PipelineConfig::from_config(&AppConfig::default());
    config.summarization_enabled = false;
    let pipeline = Pipeline::new(
        config,
        Template::parse("{system_prompt}{prompt}").unwrap(),
        SessionManager::new(runtime.clone()),
        KnowledgeAdapter::new(EmbedderAdapter::new(Arc::new(LetterEmbedder)), store.clone()),
        None,
    );
    let cancel = CancellationToken::new();

    pipeline
        .persist("rust borrow checker", "It enforces aliasing rules.", &cancel)
        .await
        .unwrap();
    let outcome = pipeline
        .handle(&PromptRequest::new("rust borrowing", ""), None, &cancel)
        .await
        .unwrap();

    assert!(outcome.assembled_prompt.starts_with("Context:\n"));
    assert!(outcome.assembled_prompt.contains("rust borrow checker"));
    assert!(outcome.assembled_prompt.contains("It enforces aliasing rules."));
}

// ── Exactly-once release ─────────────────────────────────────────────────

#[tokio::test]
async fn success_frees_every_session_once() {
    // Summary pass plus answer pass.
    let runtime = Arc::new(MockRuntime::replying(&["summary", "answer"]));
    let store = Arc::new(MockStore::default());
    let pipeline = pipeline_with(runtime.clone(), Arc::new(LetterEmbedder), store.clone(), DEFAULT_TEMPLATE);
    let cancel = CancellationToken::new();
    pipeline.persist("earlier prompt", "earlier answer", &cancel).await.unwrap();

    let outcome = pipeline
        .handle(&PromptRequest::new("new prompt", ""), None, &cancel)
        .await
        .unwrap();

    assert_eq!(outcome.payload.token, "answer");
    assert_eq!(runtime.created(), 2);
    assert_eq!(runtime.freed(), 2);
}

#[tokio::test]
async fn embedder_failure_acquires_nothing() {
    let runtime = Arc::new(MockRuntime::replying(&["never"]));
    let pipeline = pipeline_with(runtime.clone(), Arc::new(FailingEmbedder), Arc::default(), DEFAULT_TEMPLATE);

    let err = pipeline
        .handle(&PromptRequest::new("Hello", ""), None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Embedding(_)));
    assert_eq!(runtime.created(), 0);
    assert_eq!(runtime.freed(), 0);
}

#[tokio::test]
async fn inference_failure_frees_once() {
    let mut config = AppConfig::default();
    config.pipeline.rag_enabled = false;
    let runtime = Arc::new(MockRuntime::new(vec![vec![
        Step::piece("par"),
        Step::Fail("device lost".into()),
    ]]));
    let knowledge = KnowledgeAdapter::new(
        EmbedderAdapter::new(Arc::new(LetterEmbedder)),
        Arc::new(MockStore::default()),
    );
    let pipeline = Pipeline::from_config(&config, runtime.clone(), knowledge, None).unwrap();

    let err = pipeline
        .handle(&PromptRequest::new("Hello", ""), None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Inference(_)));
    assert_eq!(runtime.created(), 1);
    assert_eq!(runtime.freed(), 1);
}

#[tokio::test]
async fn write_failure_after_answer_does_not_leak_sessions() {
    let runtime = Arc::new(MockRuntime::replying(&["answer"]));
    let store = Arc::new(MockStore::failing_writes(usize::MAX));
    let mut config = AppConfig::default();
    config.pipeline.summarization_enabled = false;
    let knowledge = KnowledgeAdapter::new(EmbedderAdapter::new(Arc::new(LetterEmbedder)), store)
        .with_retry(RetryPolicy::none());
    let pipeline = Pipeline::from_config(&config, runtime.clone(), knowledge, None).unwrap();
    let cancel = CancellationToken::new();

    let outcome = pipeline
        .handle(&PromptRequest::new("Hello", ""), None, &cancel)
        .await
        .unwrap();
    let persisted = pipeline.persist("Hello", outcome.answer(), &cancel).await;

    assert!(persisted.is_err());
    assert_eq!(outcome.payload.token, "answer");
    assert_eq!(runtime.freed(), 1);
}

// ── Properties ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn throughput_is_never_negative_or_nan() {
    let scripts = vec![
        vec![],
        vec![Step::piece("x")],
        vec![Step::Wait(Duration::from_millis(1)), Step::piece("abc")],
        vec![Step::Wait(Duration::from_secs(3)), Step::piece("")],
    ];
    let runtime = Arc::new(MockRuntime::new(scripts.clone()));
    let sessions = SessionManager::new(runtime);

    for _ in 0..scripts.len() {
        let out = sessions
            .run("p", &[], None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.tokens_per_second >= 0.0);
        assert!(out.tokens_per_second.is_finite());
        assert!(out.elapsed_seconds >= 0.0);
    }
}

#[test]
fn splitter_is_idempotent_on_its_answer() {
    let splitter = ResponseSplitter::default();
    for raw in [
        "thinking...</think>final answer",
        "just an answer",
        "undefined</think>undefined",
        "",
    ] {
        let first = splitter.split(raw);
        assert_eq!(first, splitter.split(raw));
        let again = splitter.split(&first.answer);
        assert_eq!(again.answer, first.answer);
        assert_eq!(again.reasoning, "");
    }
}
