//! End-to-end tests: the HTTP server backed by a fake model, driven through
//! `RemoteClient` and plain HTTP.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{spawn_server, Shouting};
use redraft::completion::{read_frames, CompletionClient, RemoteClient, TruncatingClient};
use redraft::config::{BackendConfig, ChunkingConfig, Config};
use redraft::error::BackendError;
use redraft::models::{ChunkState, Document, ModelVariant, RewriteRequest};
use redraft::orchestrator::{Orchestrator, RunOptions, RunOutcome, RunRequest};
use redraft::session::Session;

fn backend() -> BackendConfig {
    BackendConfig {
        max_retries: 0,
        ..BackendConfig::default()
    }
}

fn request(content: &str, stream: bool) -> RewriteRequest {
    RewriteRequest {
        content: content.to_string(),
        instructions: "Shout it".to_string(),
        model: ModelVariant::Deepseek,
        chat_context: None,
        chunk_index: 0,
        total_chunks: 1,
        stream,
    }
}

#[tokio::test]
async fn one_shot_rewrite_over_http() {
    let docs = tempfile::tempdir().unwrap();
    let base = spawn_server(Config::minimal(), Arc::new(Shouting::default()), docs.path()).await;
    let client = RemoteClient::new(&base, &backend()).unwrap();

    let result = client.complete(&request("hello world", false)).await.unwrap();
    assert_eq!(result.content, "HELLO WORLD");
    assert_eq!(result.explanation.as_deref(), Some("shouted"));
}

#[tokio::test]
async fn streaming_rewrite_over_http() {
    let docs = tempfile::tempdir().unwrap();
    let base = spawn_server(Config::minimal(), Arc::new(Shouting::default()), docs.path()).await;
    let client = RemoteClient::new(&base, &backend()).unwrap();

    let frames = client.stream(&request("one two three", true)).await.unwrap();
    let mut snapshots = Vec::new();
    let result = read_frames(frames, |s| snapshots.push(s.to_string()))
        .await
        .unwrap();

    assert_eq!(result.content, "ONE TWO THREE");
    assert_eq!(snapshots, vec!["ONE ", "ONE TWO ", "ONE TWO THREE"]);
}

#[tokio::test]
async fn invalid_request_is_a_client_error() {
    let docs = tempfile::tempdir().unwrap();
    let base = spawn_server(Config::minimal(), Arc::new(Shouting::default()), docs.path()).await;
    let client = RemoteClient::new(&base, &backend()).unwrap();

    let mut req = request("text", false);
    req.instructions = "  ".into();
    match client.complete(&req).await {
        Err(BackendError::Status { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "instructions must not be empty");
        }
        other => panic!("expected 400, got {:?}", other),
    }
}

#[tokio::test]
async fn oversized_payload_is_truncated_and_retried() {
    let docs = tempfile::tempdir().unwrap();
    let base = spawn_server(
        Config::minimal(),
        Arc::new(Shouting { max_words: 4 }),
        docs.path(),
    )
    .await;
    let remote = RemoteClient::new(&base, &backend()).unwrap();

    let req = request("a b c d e f g h", false);
    assert!(matches!(
        remote.complete(&req).await,
        Err(BackendError::PayloadTooLarge(_))
    ));

    let client = TruncatingClient::new(remote);
    let result = client.complete(&req).await.unwrap();
    assert_eq!(result.content, "A B C D");
}

#[tokio::test]
async fn chunk_endpoint_reads_stored_documents() {
    let docs = tempfile::tempdir().unwrap();
    std::fs::write(
        docs.path().join("essay.md"),
        "one two three\n\nfour five six\n\nseven eight nine",
    )
    .unwrap();
    let base = spawn_server(Config::minimal(), Arc::new(Shouting::default()), docs.path()).await;
    let http = reqwest::Client::new();

    let chunks: serde_json::Value = http
        .post(format!("{}/api/chunk", base))
        .json(&serde_json::json!({
            "documentId": "essay",
            "targetWords": 3,
            "minWords": 2,
            "maxWords": 4
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let chunks = chunks.as_array().unwrap();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[1]["content"], "four five six");
    assert_eq!(chunks[1]["startPosition"], 15);
    assert_eq!(chunks[1]["endPosition"], 28);
    assert_eq!(chunks[1]["words"], 3);

    let missing = http
        .post(format!("{}/api/chunk", base))
        .json(&serde_json::json!({ "documentId": "absent" }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 404);
    let body: serde_json::Value = missing.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn normalize_and_health_endpoints() {
    let docs = tempfile::tempdir().unwrap();
    let base = spawn_server(Config::minimal(), Arc::new(Shouting::default()), docs.path()).await;
    let http = reqwest::Client::new();

    let health: serde_json::Value = http
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["backend"], "shouting");

    let normalized: serde_json::Value = http
        .post(format!("{}/api/normalize", base))
        .json(&serde_json::json!({ "content": "## Title\n\nSome **bold** text. [continued]" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let content = normalized["content"].as_str().unwrap();
    assert!(!content.contains('#'));
    assert!(!content.contains("**"));
    assert!(!content.contains("[continued]"));
    assert!(content.contains("Some bold text."));
}

#[tokio::test]
async fn full_run_through_remote_backend() {
    let docs = tempfile::tempdir().unwrap();
    let base = spawn_server(Config::minimal(), Arc::new(Shouting::default()), docs.path()).await;
    let client = Arc::new(RemoteClient::new(&base, &backend()).unwrap());

    let mut session = Session::new(ChunkingConfig {
        target_words: 3,
        min_words: 2,
        max_words: 4,
    });
    session.load(Document::new(
        "one two three\n\nfour five six\n\nseven eight nine",
    ));
    session.select(&[0, 2]).unwrap();

    let orchestrator = Orchestrator::new(
        client,
        RunOptions {
            inter_chunk_delay: None,
            chunk_timeout: Some(Duration::from_secs(10)),
            min_length_ratio: 1.0,
        },
    );
    let outcome = orchestrator
        .start_run(
            &mut session,
            RunRequest {
                instructions: "Shout it".into(),
                stream: true,
                ..RunRequest::default()
            },
        )
        .await
        .unwrap();

    let RunOutcome::Completed(output) = outcome else {
        panic!("run did not complete");
    };
    assert_eq!(output.text, "ONE TWO THREE\n\nSEVEN EIGHT NINE");
    assert_eq!(output.metadata.chunks.len(), 2);
    assert!(session.chunks()[0].is_complete());
    assert_eq!(session.chunks()[1].state, ChunkState::Pending);
    assert_eq!(session.chunks()[2].rewritten.as_deref(), Some("SEVEN EIGHT NINE"));
}
