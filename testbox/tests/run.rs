use std::collections::BTreeSet;
use std::path::Path;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tokio_util::sync::CancellationToken;

use testbox::cleanup::cleanup;
use testbox::core::stage::Stage;
use testbox::error::StageError;
use testbox::exit_codes;
use testbox::io::config::{RunConfig, TestSpec};
use testbox::io::report::ReportSink;
use testbox::orchestrator::{Orchestrator, OrchestratorSettings, RunSummary};
use testbox::test_support::{Fault, ScriptedRuntime, dependency, get_test, run_config};

/// Serve a stand-in SUT on a random local port and return the port.
async fn stub_sut() -> u16 {
    let app = Router::new()
        .route("/health", get(|| async { "service healthy" }))
        .route("/empty", get(|| async { "" }))
        .route("/teapot", get(|| async { (StatusCode::IM_A_TEAPOT, "short and stout") }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let port = listener.local_addr().expect("addr").port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    port
}

fn config(dir: &Path, tests: Vec<TestSpec>) -> RunConfig {
    std::fs::write(dir.join("Dockerfile"), "FROM scratch\n").expect("dockerfile");
    run_config(
        dir.to_path_buf(),
        dir.join("report.txt"),
        vec![dependency("db", "postgres:16")],
        tests,
    )
}

async fn run(runtime: &ScriptedRuntime, config: &RunConfig) -> RunSummary {
    let settings = OrchestratorSettings {
        sut_port: stub_sut().await,
    };
    Orchestrator::new(runtime)
        .with_settings(settings)
        .run(config, &CancellationToken::new())
        .await
}

fn report_lines(config: &RunConfig) -> Vec<String> {
    let contents = std::fs::read_to_string(&config.report).expect("report");
    let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();
    lines.sort();
    lines
}

/// Cleanup touched every resource of the run exactly once.
fn assert_cleaned_once(runtime: &ScriptedRuntime) {
    for op in ["stop sut", "remove sut", "stop db", "remove db", "rmi postgres:16", "rmi sut"] {
        assert_eq!(runtime.count(op), 1, "{op}");
    }
}

#[tokio::test]
async fn passing_test_is_reported_ok_and_everything_is_removed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(temp.path(), vec![get_test("test1", "/health", 200)]);
    let runtime = ScriptedRuntime::new();

    let summary = run(&runtime, &config).await;

    assert!(summary.succeeded());
    assert_eq!(summary.exit_code(false), exit_codes::OK);
    assert_eq!(report_lines(&config), vec!["test1 ok"]);
    assert!(summary.cleanup.is_clean());
    assert_cleaned_once(&runtime);
    assert!(runtime.live_containers().is_empty());
    assert!(runtime.live_images().is_empty());
}

#[tokio::test]
async fn dependency_pull_failure_skips_build_and_tests() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(temp.path(), vec![get_test("test1", "/health", 200)]);
    let runtime = ScriptedRuntime::new().fail("pull", "postgres:16", Fault::Engine);

    let summary = run(&runtime, &config).await;

    let (stage, err) = summary.failure.as_ref().expect("failure");
    assert_eq!(*stage, Stage::DependenciesLaunching);
    assert!(matches!(err, StageError::ImagePull { .. }));
    assert_eq!(runtime.count("build sut"), 0);
    assert_eq!(runtime.count("create sut"), 0);
    assert!(!config.report.exists());
    assert_eq!(runtime.count("stop sut"), 1);
    assert_eq!(runtime.count("rmi sut"), 1);
    assert!(summary.cleanup.is_clean());
    assert_eq!(summary.exit_code(false), exit_codes::STAGE_FAILED);
}

#[tokio::test]
async fn sut_without_ip_times_out_and_never_runs_tests() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(temp.path(), vec![get_test("test1", "/health", 200)]);
    let runtime = ScriptedRuntime::new().ip_address(None);

    let summary = run(&runtime, &config).await;

    let (stage, err) = summary.failure.as_ref().expect("failure");
    assert_eq!(*stage, Stage::AwaitingReadiness);
    assert!(matches!(err, StageError::ReadinessTimeout { .. }));
    assert!(summary.results.is_empty());
    assert!(!config.report.exists());
    assert_cleaned_once(&runtime);
    assert_eq!(summary.exit_code(false), exit_codes::STAGE_FAILED);
}

#[tokio::test]
async fn status_mismatch_is_reported_but_only_strict_fails_the_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(temp.path(), vec![get_test("testX", "/missing", 201)]);
    let runtime = ScriptedRuntime::new();

    let summary = run(&runtime, &config).await;

    assert!(summary.succeeded());
    assert_eq!(
        report_lines(&config),
        vec!["testX fail (ExpectedCode 201 got 404)"]
    );
    assert_eq!(summary.exit_code(false), exit_codes::OK);
    assert_eq!(summary.exit_code(true), exit_codes::TESTS_FAILED);
    assert_cleaned_once(&runtime);
}

#[tokio::test]
async fn report_has_one_line_per_test() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut body_check = get_test("body", "/health", 200);
    body_check.expected_body_substring = Some("healthy".to_string());
    let mut empty_needle = get_test("empty-needle", "/empty", 200);
    empty_needle.expected_body_substring = Some(String::new());
    let tests = vec![
        get_test("health", "/health", 200),
        body_check,
        empty_needle,
        get_test("no-needle", "/empty", 200),
        get_test("teapot", "/teapot", 200),
    ];
    let config = config(temp.path(), tests);
    let runtime = ScriptedRuntime::new();

    let summary = run(&runtime, &config).await;

    let results = ReportSink::new(&config.report).read().expect("read");
    assert_eq!(results.len(), 5);
    let names: BTreeSet<&str> = results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names.len(), 5);
    let failed: Vec<&str> = results
        .iter()
        .filter(|r| !r.passed())
        .map(|r| r.name.as_str())
        .collect();
    assert_eq!(failed, vec!["teapot"]);
    assert_eq!(summary.failed_tests(), 1);
}

#[tokio::test]
async fn sut_start_failure_still_cleans_up_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(temp.path(), Vec::new());
    let runtime = ScriptedRuntime::new().fail("start", "sut", Fault::Engine);

    let summary = run(&runtime, &config).await;

    assert_eq!(
        summary.failure.as_ref().map(|(stage, _)| *stage),
        Some(Stage::SutStarting)
    );
    assert_cleaned_once(&runtime);
}

#[tokio::test]
async fn cleanup_after_a_run_is_idempotent() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(temp.path(), vec![get_test("test1", "/health", 200)]);
    let runtime = ScriptedRuntime::new();

    let summary = run(&runtime, &config).await;
    assert!(summary.cleanup.is_clean());

    let again = cleanup(&runtime, &config, &mut [], config.timeouts.cleanup_step()).await;
    assert!(again.is_clean());
}
