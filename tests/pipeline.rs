//! End-to-end runs against a mock chat-completions server.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use vocab_pregen::config::progress_path;
use vocab_pregen::{
    Config, EndpointConfig, JobConfig, Language, Orchestrator, RateLimitConfig, RateLimiter,
    RetryConfig, RunOutcome, WorkItem, vocabulary,
};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn sse_body(content: &str) -> String {
    format!(
        "data: {}\n\ndata: {}\n\ndata: [DONE]\n\n",
        serde_json::json!({"choices": [{"delta": {"content": content}}]}),
        serde_json::json!({"choices": [{"delta": {}, "finish_reason": "stop"}]})
    )
}

fn ok_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(sse_body("## Generated\ncontent"), "text/event-stream")
}

fn config(server: &MockServer) -> Config {
    Config {
        endpoint: EndpointConfig {
            url: Some(format!("{}/v1", server.uri())),
            api_key: Some("sk-test".to_string()),
            model: "test-model".to_string(),
        },
        rate_limit: RateLimitConfig {
            rpm: 6_000,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(20),
        },
        retry: RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        },
        ..Config::default()
    }
}

fn job(dir: &Path) -> JobConfig {
    let output = dir.join("book.json");
    JobConfig {
        input: dir.join("book.txt"),
        progress: progress_path(&output),
        output,
        book_id: "test-book".to_string(),
        language: Language::English,
        batch_size: 10,
        force: false,
        show_progress: false,
    }
}

fn items(n: usize) -> Vec<WorkItem> {
    (1..=n)
        .map(|i| WorkItem::new(format!("item{i}"), "ˈaɪtəm", format!("definition {i}")))
        .collect()
}

fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

fn entry_count(output: &Value) -> usize {
    output
        .as_object()
        .unwrap()
        .values()
        .map(|types| types.as_object().unwrap().len())
        .sum()
}

async fn run(server: &MockServer, job: &JobConfig, items: &[WorkItem], cancel: CancellationToken) -> vocab_pregen::RunReport {
    let mut orchestrator = Orchestrator::from_config(&config(server), job.clone(), cancel).unwrap();
    orchestrator.run(items).await.unwrap()
}

#[tokio::test]
async fn test_fresh_run_all_succeed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ok_response())
        .expect(6)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let job = job(dir.path());
    let report = run(&server, &job, &items(3), CancellationToken::new()).await;

    assert_eq!(report.outcome, RunOutcome::Done);

    let output = read_json(&job.output);
    assert_eq!(output.as_object().unwrap().len(), 3);
    assert_eq!(entry_count(&output), 6);
    assert_eq!(output["item2"]["phrases"]["content"], "## Generated\ncontent");

    let progress = read_json(&job.progress);
    assert_eq!(progress["completedItems"], 3);
    assert_eq!(progress["totalItems"], 3);
    assert_eq!(progress["failedUnits"].as_array().unwrap().len(), 0);
    assert_eq!(progress["statistics"]["successCount"], 6);
}

#[tokio::test]
async fn test_rate_limited_unit_fails_then_resumes_alone() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("\\\"item2\\\""))
        .and(body_string_contains("collocations"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .with_priority(1)
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ok_response())
        .expect(5)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let job = job(dir.path());
    let all = items(3);
    let report = run(&server, &job, &all, CancellationToken::new()).await;

    assert_eq!(report.outcome, RunOutcome::Partial);
    assert_eq!(entry_count(&read_json(&job.output)), 5);

    let progress = read_json(&job.progress);
    assert_eq!(progress["completedItems"], 2);
    assert_eq!(progress["failedUnits"], serde_json::json!(["item2:phrases"]));
    assert_eq!(progress["unitStatus"]["item2"]["phrases"]["state"], "failed");

    // Second run only retries the failed unit.
    let retry_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("\\\"item2\\\""))
        .and(body_string_contains("collocations"))
        .respond_with(ok_response())
        .expect(1)
        .mount(&retry_server)
        .await;

    let report = run(&retry_server, &job, &all, CancellationToken::new()).await;
    assert_eq!(report.outcome, RunOutcome::Done);
    assert_eq!(report.scheduled_units, 1);

    assert_eq!(entry_count(&read_json(&job.output)), 6);
    let progress = read_json(&job.progress);
    assert_eq!(progress["completedItems"], 3);
    assert_eq!(progress["failedUnits"].as_array().unwrap().len(), 0);
}

/// Cancels the token while answering the n-th request.
struct CancelAfter {
    seen: Arc<AtomicUsize>,
    after: usize,
    cancel: CancellationToken,
}

impl Respond for CancelAfter {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        if self.seen.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
            self.cancel.cancel();
        }
        ok_response()
    }
}

#[tokio::test]
async fn test_interrupt_then_resume() {
    let server = MockServer::start().await;
    let cancel = CancellationToken::new();
    Mock::given(method("POST"))
        .respond_with(CancelAfter {
            seen: Arc::new(AtomicUsize::new(0)),
            after: 4,
            cancel: cancel.clone(),
        })
        .expect(4)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let job = job(dir.path());
    let all = items(5);
    let report = run(&server, &job, &all, cancel).await;

    assert_eq!(report.outcome, RunOutcome::Interrupted);
    assert!(report.is_resumable());
    let progress = read_json(&job.progress);
    assert_eq!(progress["completedItems"], 2);
    assert_eq!(entry_count(&read_json(&job.output)), 4);

    let resume_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ok_response())
        .expect(6)
        .mount(&resume_server)
        .await;

    let report = run(&resume_server, &job, &all, CancellationToken::new()).await;
    assert_eq!(report.outcome, RunOutcome::Done);
    assert_eq!(report.scheduled_units, 6);
    assert_eq!(read_json(&job.progress)["completedItems"], 5);
}

#[tokio::test]
async fn test_empty_vocabulary_is_nothing_to_do() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ok_response())
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let book = dir.path().join("book.txt");
    std::fs::write(&book, "# only a comment\n\nHEADING\n").unwrap();
    let words = vocabulary::parse_file(&book).await.unwrap();
    assert!(words.is_empty());

    let job = job(dir.path());
    let report = run(&server, &job, &words.items, CancellationToken::new()).await;
    assert_eq!(report.outcome, RunOutcome::NothingToDo);
    assert_eq!(report.session.processed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_limiter_holds_61st_request_for_a_minute() {
    let limiter = RateLimiter::new(60);
    let start = tokio::time::Instant::now();

    for _ in 0..60 {
        limiter.wait().await;
    }
    limiter.wait().await;

    assert!(start.elapsed() >= Duration::from_secs(60));
}
