//! SUT provisioner: build the image, start the container, wait for an IP.

use std::time::Duration;

use tokio::time::{Instant, sleep, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::build_output::{build_failure, progress_text};
use crate::core::types::{ContainerHandle, ContainerState};
use crate::error::{RuntimeError, StageError};
use crate::io::config::BuildSpec;
use crate::io::context::pack_build_context;
use crate::io::runtime::{BuildRequest, ContainerRequest, ContainerRuntime};

/// How long and how often to poll for the SUT's address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

/// Package the build context and build the SUT image. Returns the image tag.
///
/// `limit` bounds the whole build. A build whose output ends in (or contains)
/// an error record fails even though the runtime call itself succeeded.
#[instrument(skip_all, fields(tag = %spec.tag))]
pub async fn build<R>(
    runtime: &R,
    spec: &BuildSpec,
    limit: Duration,
    cancel: &CancellationToken,
) -> Result<String, StageError>
where
    R: ContainerRuntime + ?Sized,
{
    let context_dir = spec.context.clone();
    let context = tokio::task::spawn_blocking(move || pack_build_context(&context_dir))
        .await
        .map_err(|err| build_error(spec, format!("package build context: {err}")))?
        .map_err(|err| build_error(spec, format!("{err:#}")))?;

    let request = BuildRequest {
        tag: spec.tag.clone(),
        dockerfile: spec.dockerfile.clone(),
        context,
    };
    info!(dockerfile = %spec.dockerfile, context = %spec.context.display(), "building image");

    let records = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(StageError::Cancelled),
        result = timeout(limit, runtime.build_image(&request)) => match result {
            Err(_) => {
                return Err(build_error(
                    spec,
                    format!("timed out after {}s", limit.as_secs()),
                ));
            }
            Ok(Err(RuntimeError::Connection(reason))) => {
                return Err(StageError::RuntimeConnection(RuntimeError::Connection(reason)));
            }
            Ok(Err(err)) => return Err(build_error(spec, err.to_string())),
            Ok(Ok(records)) => records,
        },
    };

    for record in &records {
        if let Some(text) = progress_text(record) {
            debug!(tag = %spec.tag, "{}", text);
        }
    }
    if let Some(reason) = build_failure(&records) {
        return Err(build_error(spec, reason));
    }
    info!(tag = %spec.tag, "image built");
    Ok(spec.tag.clone())
}

/// Create and start the SUT container from `image`.
#[instrument(skip(runtime, env, cancel))]
pub async fn run<R>(
    runtime: &R,
    image: &str,
    name: &str,
    env: &[String],
    cancel: &CancellationToken,
) -> Result<ContainerHandle, StageError>
where
    R: ContainerRuntime + ?Sized,
{
    let request = ContainerRequest {
        name: name.to_string(),
        image: image.to_string(),
        env: env.to_vec(),
    };
    let id = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(StageError::Cancelled),
        result = runtime.create_container(&request) => {
            result.map_err(|source| StageError::lifecycle(name, "create", source))?
        }
    };
    let mut handle = ContainerHandle::new(id, name, image);

    tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(StageError::Cancelled),
        result = runtime.start_container(&handle.id) => {
            result.map_err(|source| StageError::lifecycle(name, "start", source))?;
        }
    }
    handle.mark(ContainerState::Running);
    info!(id = %handle.id, "sut container started");

    match runtime.container_logs(&handle.id).await {
        Ok(lines) => {
            for line in lines {
                debug!(container = name, "{}", line);
            }
        }
        Err(err) => warn!(container = name, error = %err, "could not read container logs"),
    }
    Ok(handle)
}

/// Poll the container until it reports a non-empty IP address.
///
/// Fails with `ReadinessTimeout` once `policy.timeout` has elapsed, including
/// while an inspect call is still pending, or immediately if the container is
/// seen to have stopped.
#[instrument(skip_all, fields(container = %handle.name))]
pub async fn await_readiness<R>(
    runtime: &R,
    handle: &ContainerHandle,
    policy: ReadinessPolicy,
    cancel: &CancellationToken,
) -> Result<String, StageError>
where
    R: ContainerRuntime + ?Sized,
{
    let deadline = Instant::now() + policy.timeout;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let info = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(StageError::Cancelled),
            result = timeout_at(deadline, runtime.inspect_container(&handle.id)) => match result {
                Err(_) => return Err(readiness_timeout(handle, policy)),
                Ok(result) => result
                    .map_err(|source| StageError::lifecycle(&handle.name, "inspect", source))?,
            },
        };

        if let Some(ip) = info.ip_address.filter(|ip| !ip.trim().is_empty()) {
            info!(ip = %ip, attempts, "sut is reachable");
            return Ok(ip);
        }
        if !info.running {
            return Err(StageError::lifecycle(
                &handle.name,
                "readiness",
                RuntimeError::Engine("container exited before reporting an IP address".into()),
            ));
        }
        if Instant::now() >= deadline {
            return Err(readiness_timeout(handle, policy));
        }
        debug!(attempts, "no IP address yet");
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(StageError::Cancelled),
            () = sleep(policy.poll_interval) => {}
        }
    }
}

fn readiness_timeout(handle: &ContainerHandle, policy: ReadinessPolicy) -> StageError {
    StageError::ReadinessTimeout {
        name: handle.name.clone(),
        waited_secs: policy.timeout.as_secs(),
    }
}

fn build_error(spec: &BuildSpec, reason: String) -> StageError {
    StageError::ImageBuild {
        tag: spec.tag.clone(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::BuildRecord;
    use crate::test_support::{Fault, ScriptedRuntime};
    use std::fs;

    fn spec(context: &std::path::Path) -> BuildSpec {
        fs::write(context.join("Dockerfile"), "FROM scratch\n").expect("dockerfile");
        BuildSpec {
            dockerfile: "Dockerfile".to_string(),
            context: context.to_path_buf(),
            tag: "sut".to_string(),
        }
    }

    fn policy() -> ReadinessPolicy {
        ReadinessPolicy {
            timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn build_returns_tag() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runtime = ScriptedRuntime::new();
        let image = build(&runtime, &spec(temp.path()), Duration::from_secs(5), &CancellationToken::new())
            .await
            .expect("build");
        assert_eq!(image, "sut");
        assert_eq!(runtime.live_images(), vec!["sut".to_string()]);
    }

    #[tokio::test]
    async fn error_in_final_build_record_fails_build() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runtime = ScriptedRuntime::new().build_output(vec![
            BuildRecord::progress("Step 1/2 : FROM scratch\n"),
            BuildRecord::failure("The command '/bin/sh -c make' returned a non-zero code: 2"),
        ]);
        let err = build(&runtime, &spec(temp.path()), Duration::from_secs(5), &CancellationToken::new())
            .await
            .expect_err("build fails");
        assert!(matches!(err, StageError::ImageBuild { ref reason, .. } if reason.contains("non-zero code")));
    }

    #[tokio::test]
    async fn build_times_out() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runtime = ScriptedRuntime::new().hang("build", "sut");
        let err = build(&runtime, &spec(temp.path()), Duration::from_millis(50), &CancellationToken::new())
            .await
            .expect_err("timeout");
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn run_passes_environment_and_marks_running() {
        let runtime = ScriptedRuntime::new();
        runtime.pull_image("sut").await.expect("seed image");
        let env = vec!["MODE=test".to_string()];
        let handle = run(&runtime, "sut", "sut", &env, &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(handle.state, ContainerState::Running);
        assert_eq!(runtime.env_of("sut"), Some(env));
        assert_eq!(runtime.count("logs sut"), 1);
    }

    #[tokio::test]
    async fn start_failure_is_a_lifecycle_error() {
        let runtime = ScriptedRuntime::new().fail("start", "sut", Fault::Engine);
        runtime.pull_image("sut").await.expect("seed image");
        let err = run(&runtime, "sut", "sut", &[], &CancellationToken::new())
            .await
            .expect_err("start fails");
        assert!(matches!(err, StageError::ContainerLifecycle { action: "start", .. }));
    }

    #[tokio::test]
    async fn readiness_polls_until_ip_assigned() {
        let runtime = ScriptedRuntime::new().ip_after_inspections(3);
        runtime.pull_image("sut").await.expect("seed image");
        let handle = run(&runtime, "sut", "sut", &[], &CancellationToken::new())
            .await
            .expect("run");
        let ip = await_readiness(&runtime, &handle, policy(), &CancellationToken::new())
            .await
            .expect("ready");
        assert_eq!(ip, "127.0.0.1");
        assert_eq!(runtime.count("inspect sut"), 4);
    }

    #[tokio::test]
    async fn readiness_times_out_without_ip() {
        let runtime = ScriptedRuntime::new().ip_address(None);
        runtime.pull_image("sut").await.expect("seed image");
        let handle = run(&runtime, "sut", "sut", &[], &CancellationToken::new())
            .await
            .expect("run");
        let err = await_readiness(&runtime, &handle, policy(), &CancellationToken::new())
            .await
            .expect_err("timeout");
        assert!(matches!(err, StageError::ReadinessTimeout { .. }));
    }

    #[tokio::test]
    async fn hung_inspect_still_times_out() {
        let runtime = ScriptedRuntime::new().hang("inspect", "sut");
        runtime.pull_image("sut").await.expect("seed image");
        let handle = run(&runtime, "sut", "sut", &[], &CancellationToken::new())
            .await
            .expect("run");

        let err = tokio::time::timeout(
            Duration::from_secs(3),
            await_readiness(&runtime, &handle, policy(), &CancellationToken::new()),
        )
        .await
        .expect("readiness gave up at its own deadline")
        .expect_err("timeout");

        assert!(matches!(err, StageError::ReadinessTimeout { ref name, .. } if name == "sut"));
    }

    #[tokio::test]
    async fn readiness_fails_fast_when_container_exits() {
        let runtime = ScriptedRuntime::new().exits_on_start("sut");
        runtime.pull_image("sut").await.expect("seed image");
        let handle = run(&runtime, "sut", "sut", &[], &CancellationToken::new())
            .await
            .expect("run");
        let err = await_readiness(&runtime, &handle, policy(), &CancellationToken::new())
            .await
            .expect_err("exited");
        assert!(matches!(err, StageError::ContainerLifecycle { action: "readiness", .. }));
        assert_eq!(runtime.count("inspect sut"), 1);
    }
}
