//! Cleanup coordinator: best-effort teardown of everything a run may have
//! created.
//!
//! Teardown works from the declared config rather than from the handles a run
//! collected, so containers left behind by a failed or interrupted run are
//! still found. Missing containers and images are not errors.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use anyhow::bail;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{ContainerHandle, ContainerState};
use crate::error::RuntimeError;
use crate::io::config::RunConfig;
use crate::io::runtime::ContainerRuntime;

/// One teardown step that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    pub step: &'static str,
    pub target: String,
    pub error: String,
}

impl fmt::Display for CleanupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.step, self.target, self.error)
    }
}

/// Aggregated outcome of a cleanup pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Escalate failures into an error. Only used when cleanup is the
    /// command the user asked for.
    pub fn into_result(self) -> anyhow::Result<()> {
        if self.is_clean() {
            return Ok(());
        }
        let details: Vec<String> = self.failures.iter().map(ToString::to_string).collect();
        bail!(
            "{} cleanup step(s) failed: {}",
            self.failures.len(),
            details.join("; ")
        )
    }
}

/// Tear down the SUT container, every dependency container and image, then
/// the SUT image. Each step runs even if an earlier one failed, and each is
/// bounded by `step_timeout`.
///
/// `handles` are the containers the run knows it created; each is marked
/// `Stopped` and `Removed` as the matching steps succeed.
#[instrument(skip_all, fields(sut = %config.sut_name))]
pub async fn cleanup<R>(
    runtime: &R,
    config: &RunConfig,
    handles: &mut [ContainerHandle],
    step_timeout: Duration,
) -> CleanupReport
where
    R: ContainerRuntime + ?Sized,
{
    let mut steps = Steps {
        limit: step_timeout,
        report: CleanupReport::default(),
    };

    remove_container(runtime, &mut steps, handles, &config.sut_name).await;

    for dep in &config.dependencies {
        remove_container(runtime, &mut steps, handles, &dep.name).await;
        steps
            .attempt("remove image", &dep.image, runtime.remove_image(&dep.image))
            .await;
    }

    steps
        .attempt("remove image", &config.sut_name, runtime.remove_image(&config.sut_name))
        .await;

    if steps.report.is_clean() {
        info!("artifacts removed");
    } else {
        warn!(failed = steps.report.failures.len(), "cleanup finished with failures");
    }
    steps.report
}

async fn remove_container<R>(
    runtime: &R,
    steps: &mut Steps,
    handles: &mut [ContainerHandle],
    name: &str,
) where
    R: ContainerRuntime + ?Sized,
{
    if steps.attempt("stop container", name, runtime.stop_container(name)).await {
        mark(handles, name, ContainerState::Stopped);
    }
    steps.attempt("wait container", name, runtime.wait_container(name)).await;
    if steps.attempt("remove container", name, runtime.remove_container(name)).await {
        mark(handles, name, ContainerState::Removed);
    }
}

fn mark(handles: &mut [ContainerHandle], name: &str, state: ContainerState) {
    for handle in handles.iter_mut().filter(|handle| handle.name == name) {
        handle.mark(state);
    }
}

struct Steps {
    limit: Duration,
    report: CleanupReport,
}

impl Steps {
    /// Run one step. Returns whether the target is now gone or done.
    async fn attempt<F>(&mut self, step: &'static str, target: &str, call: F) -> bool
    where
        F: Future<Output = Result<(), RuntimeError>>,
    {
        let error = match timeout(self.limit, call).await {
            Ok(Ok(())) => {
                debug!(step, target, "done");
                return true;
            }
            Ok(Err(err)) if err.is_not_found() => {
                debug!(step, target, "already gone");
                return true;
            }
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!("timed out after {}s", self.limit.as_secs()),
        };
        warn!(step, target, error = %error, "cleanup step failed");
        self.report.failures.push(CleanupFailure {
            step,
            target: target.to_string(),
            error,
        });
        false
    }
}
