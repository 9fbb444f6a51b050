//! Top-level driver: sequences the stages of a run and always cleans up.

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::acceptance;
use crate::cleanup::{CleanupReport, cleanup};
use crate::core::stage::{RunResult, Stage};
use crate::core::types::{ContainerHandle, ContainerState, TestResult};
use crate::error::StageError;
use crate::exit_codes;
use crate::io::config::RunConfig;
use crate::io::http::{ProbeClient, SUT_HTTP_PORT, base_url};
use crate::io::report::ReportSink;
use crate::io::runtime::ContainerRuntime;
use crate::launcher::launch_all;
use crate::provision::{self, ReadinessPolicy};

/// Knobs that are not part of the run config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Port the SUT serves HTTP on.
    pub sut_port: u16,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            sut_port: SUT_HTTP_PORT,
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunSummary {
    /// Last stage entered.
    pub stage: Stage,
    pub failure: Option<(Stage, StageError)>,
    pub results: Vec<TestResult>,
    /// Containers the run created, in their final state.
    pub containers: Vec<ContainerHandle>,
    pub cleanup: CleanupReport,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    pub fn failed_tests(&self) -> usize {
        self.results.iter().filter(|r| !r.passed()).count()
    }

    /// Stage failures always exit non-zero. Test failures only do so when
    /// `strict` is set.
    pub fn exit_code(&self, strict: bool) -> i32 {
        if !self.succeeded() {
            exit_codes::STAGE_FAILED
        } else if strict && self.failed_tests() > 0 {
            exit_codes::TESTS_FAILED
        } else {
            exit_codes::OK
        }
    }
}

pub struct Orchestrator<'a, R: ?Sized> {
    runtime: &'a R,
    settings: OrchestratorSettings,
}

impl<'a, R> Orchestrator<'a, R>
where
    R: ContainerRuntime + ?Sized,
{
    pub fn new(runtime: &'a R) -> Self {
        Self {
            runtime,
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Run every stage in order, stopping at the first failure, then clean up
    /// exactly once.
    ///
    /// Cleanup is not bound to `cancel`: an interrupted run still tears down
    /// what it created, within the per-step cleanup timeout.
    #[instrument(skip_all, fields(sut = %config.sut_name))]
    pub async fn run(&self, config: &RunConfig, cancel: &CancellationToken) -> RunSummary {
        let mut run = RunResult::new();
        let mut containers = Vec::new();
        if let Err(err) = self.stages(config, cancel, &mut run, &mut containers).await {
            error!(stage = %run.stage(), error = %err, "stage failed");
            run.fail(err);
        }

        let cleanup = cleanup(
            self.runtime,
            config,
            &mut containers,
            config.timeouts.cleanup_step(),
        )
        .await;

        let (stage, failure, results) = run.into_parts();
        RunSummary {
            stage,
            failure,
            results,
            containers,
            cleanup,
        }
    }

    async fn stages(
        &self,
        config: &RunConfig,
        cancel: &CancellationToken,
        run: &mut RunResult<StageError>,
        containers: &mut Vec<ContainerHandle>,
    ) -> Result<(), StageError> {
        let timeouts = config.timeouts;

        self.enter(run);
        containers.extend(launch_all(self.runtime, &config.dependencies, cancel).await?);
        info!(count = containers.len(), "dependencies running");

        self.enter(run);
        let image = provision::build(self.runtime, &config.build_spec(), timeouts.build(), cancel)
            .await?;

        self.enter(run);
        let sut = provision::run(
            self.runtime,
            &image,
            &config.sut_name,
            &config.environment,
            cancel,
        )
        .await?;
        containers.push(sut.clone());

        self.enter(run);
        let policy = ReadinessPolicy {
            timeout: timeouts.readiness(),
            poll_interval: timeouts.readiness_poll(),
        };
        let ip = provision::await_readiness(self.runtime, &sut, policy, cancel).await?;

        self.enter(run);
        let client = ProbeClient::new(timeouts.request())
            .map_err(|err| StageError::Config(format!("{err:#}")))?;
        let sink = ReportSink::new(&config.report);
        let results = acceptance::run_all(
            &config.tests,
            &base_url(&ip, self.settings.sut_port),
            &client,
            &sink,
            cancel,
        )
        .await?;
        run.set_results(results);

        self.enter(run);
        Ok(())
    }

    fn enter(&self, run: &mut RunResult<StageError>) {
        if run.advance() {
            info!(stage = %run.stage(), "stage");
        }
    }
}
