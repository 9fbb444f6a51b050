//! Acceptance test runner: issue every configured request concurrently and
//! record each outcome in the report as it completes.

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::core::evaluate::evaluate;
use crate::core::types::TestResult;
use crate::error::StageError;
use crate::io::config::TestSpec;
use crate::io::http::{ProbeClient, RequestError};
use crate::io::report::ReportSink;

/// Run all tests against `base_url` and return their results in completion
/// order.
///
/// The report is reset first. Results are appended by this function alone as
/// the requests finish, so every line is written whole. A failing request
/// never aborts its siblings.
#[instrument(skip_all, fields(count = tests.len(), base_url = %base_url))]
pub async fn run_all(
    tests: &[TestSpec],
    base_url: &str,
    client: &ProbeClient,
    sink: &ReportSink,
    cancel: &CancellationToken,
) -> Result<Vec<TestResult>, StageError> {
    sink.reset()
        .map_err(|err| StageError::Report(format!("{err:#}")))?;

    let mut pending: FuturesUnordered<_> = tests
        .iter()
        .map(|test| run_one(test, base_url, client))
        .collect();

    let mut results = Vec::with_capacity(tests.len());
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(StageError::Cancelled),
            next = pending.next() => next,
        };
        let Some(result) = next else { break };
        sink.append(&result)
            .map_err(|err| StageError::Report(format!("{err:#}")))?;
        match &result.reason {
            None => info!(test = %result.name, "ok"),
            Some(reason) => warn!(test = %result.name, reason = %reason, "fail"),
        }
        results.push(result);
    }

    let passed = results.iter().filter(|r| r.passed()).count();
    info!(
        passed,
        failed = results.len() - passed,
        "all tests executed"
    );
    Ok(results)
}

async fn run_one(test: &TestSpec, base_url: &str, client: &ProbeClient) -> TestResult {
    match client.send(test, base_url).await {
        Ok(response) => evaluate(
            &test.name,
            test.expected_status_code,
            test.expected_body_substring.as_deref(),
            response.status,
            &response.body,
        ),
        Err(err @ RequestError::UnsupportedMethod(_)) => {
            TestResult::fail(&test.name, format!("configuration error: {err}"))
        }
        Err(err @ RequestError::Transport(_)) => TestResult::fail(&test.name, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::Method;
    use crate::test_support::get_test;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use std::time::Duration;

    async fn stub_sut() -> String {
        let app = Router::new()
            .route("/health", get(|| async { "service healthy" }))
            .route(
                "/items",
                post(|body: String| async move { (StatusCode::CREATED, format!("stored {body}")) }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    fn client() -> ProbeClient {
        ProbeClient::new(Duration::from_secs(2)).expect("client")
    }

    #[tokio::test]
    async fn writes_one_line_per_test() {
        let base = stub_sut().await;
        let temp = tempfile::tempdir().expect("tempdir");
        let sink = ReportSink::new(temp.path().join("report.txt"));

        let mut healthy = get_test("health", "/health", 200);
        healthy.expected_body_substring = Some("healthy".to_string());
        let mut create = get_test("create", "/items", 201);
        create.method = Method::Post;
        create.body = Some("apple".to_string());
        create.expected_body_substring = Some("stored apple".to_string());
        let tests = vec![healthy, create, get_test("testX", "/missing", 201)];

        let results = run_all(&tests, &base, &client(), &sink, &CancellationToken::new())
            .await
            .expect("run");

        assert_eq!(results.len(), 3);
        let report = std::fs::read_to_string(sink.path()).expect("report");
        let mut lines: Vec<&str> = report.lines().collect();
        lines.sort_unstable();
        assert_eq!(
            lines,
            vec![
                "create ok",
                "health ok",
                "testX fail (ExpectedCode 201 got 404)",
            ]
        );
    }

    #[tokio::test]
    async fn missing_substring_fails_with_reason() {
        let base = stub_sut().await;
        let temp = tempfile::tempdir().expect("tempdir");
        let sink = ReportSink::new(temp.path().join("report.txt"));
        let mut test = get_test("health", "/health", 200);
        test.expected_body_substring = Some("degraded".to_string());

        let results = run_all(&[test], &base, &client(), &sink, &CancellationToken::new())
            .await
            .expect("run");

        assert_eq!(
            results[0].reason.as_deref(),
            Some("Response does not contain expected string")
        );
    }

    #[tokio::test]
    async fn unreachable_sut_fails_each_test_without_aborting() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sink = ReportSink::new(temp.path().join("report.txt"));
        let tests = vec![get_test("a", "/", 200), get_test("b", "/", 200)];

        let results = run_all(
            &tests,
            "http://127.0.0.1:1",
            &client(),
            &sink,
            &CancellationToken::new(),
        )
        .await
        .expect("run");

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.passed()));
        assert_eq!(sink.read().expect("read").len(), 2);
    }

    #[tokio::test]
    async fn unsupported_method_is_a_configuration_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sink = ReportSink::new(temp.path().join("report.txt"));
        let mut test = get_test("odd", "/", 200);
        test.method = Method::Other("PATCH".to_string());

        let results = run_all(
            &[test],
            "http://127.0.0.1:1",
            &client(),
            &sink,
            &CancellationToken::new(),
        )
        .await
        .expect("run");

        assert_eq!(
            results[0].reason.as_deref(),
            Some("configuration error: unsupported method `PATCH`")
        );
    }

    #[tokio::test]
    async fn no_tests_leaves_an_empty_report() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sink = ReportSink::new(temp.path().join("report.txt"));
        std::fs::write(sink.path(), "stale ok\n").expect("seed");

        let results = run_all(&[], "http://127.0.0.1:1", &client(), &sink, &CancellationToken::new())
            .await
            .expect("run");

        assert!(results.is_empty());
        assert_eq!(std::fs::read_to_string(sink.path()).expect("read"), "");
    }
}
