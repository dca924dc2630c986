//! Integration tests against a live LiteLLM endpoint.
//!
//! These tests make real API calls.
//! Run with: LITELLM_API_BASE=... LITELLM_API_KEY=... cargo test --test llm_integration -- --ignored

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;

use flowgen::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
use flowgen::pipeline::{CancellationFlag, PipelineConfig, PipelineExecutor};
use flowgen::Session;

fn create_test_client() -> LiteLlmClient {
    LiteLlmClient::from_env()
        .expect("LITELLM_API_BASE environment variable must be set for integration tests")
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn test_simple_generation() {
    let client = create_test_client();

    let request = GenerationRequest::new(
        client.default_model(),
        vec![
            Message::system("You are a helpful assistant. Reply concisely."),
            Message::user("What is 2 + 2? Reply with just the number."),
        ],
    )
    .with_max_tokens(10)
    .with_temperature(0.0);

    let response = client.generate(request).await;
    assert!(response.is_ok(), "Generation failed: {:?}", response.err());

    let response = response.expect("Should have response");
    let content = response.first_content().expect("Should have content");
    assert!(
        content.contains('4'),
        "Response should contain '4', got: {}",
        content
    );
    assert!(response.usage.total_tokens > 0, "Should have token usage");
}

#[tokio::test]
#[ignore]
async fn test_full_scaffolding_run() {
    let client = create_test_client();
    let provider: Arc<dyn LlmProvider> = Arc::new(client);

    let dir = tempfile::TempDir::new().expect("failed to create temp dir");
    let config = PipelineConfig::new(dir.path());
    let executor = PipelineExecutor::new(provider, config).expect("config should validate");
    let session = Session::new();

    let (tx, mut rx) = mpsc::channel(64);
    tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let report = executor
        .run(
            &session,
            "Create a minimal FASTQC quality-control pipeline",
            tx,
            &CancellationFlag::new(),
        )
        .await
        .expect("pipeline run should complete");

    let project = report
        .project_state
        .project_name
        .expect("a project name should be decided");
    assert!(
        Path::new(dir.path()).join(&project).exists(),
        "project root '{}' should exist in the workspace",
        project
    );
    assert_eq!(report.project_state.completed_stages.len(), 5);
    assert!(!report.final_summary.is_empty());
}
