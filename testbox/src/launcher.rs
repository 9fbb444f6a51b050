//! Dependency launcher: pull and start every declared dependency concurrently.

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{ContainerHandle, ContainerState};
use crate::error::{RuntimeError, StageError};
use crate::io::config::DependencySpec;
use crate::io::runtime::{ContainerRequest, ContainerRuntime};

/// Launch all dependencies in parallel and wait for every launch to finish.
///
/// Launches share a child of `cancel`: the first failing launch cancels it so
/// the siblings abandon their pending runtime call. The first real failure is
/// returned; containers that did start are left for the cleanup coordinator,
/// which walks every declared dependency regardless of what succeeded here.
#[instrument(skip_all, fields(count = dependencies.len()))]
pub async fn launch_all<R>(
    runtime: &R,
    dependencies: &[DependencySpec],
    cancel: &CancellationToken,
) -> Result<Vec<ContainerHandle>, StageError>
where
    R: ContainerRuntime + ?Sized,
{
    let siblings = cancel.child_token();
    let mut launches: FuturesUnordered<_> = dependencies
        .iter()
        .map(|dep| {
            let siblings = &siblings;
            async move {
                let result = tokio::select! {
                    biased;
                    () = siblings.cancelled() => Err(StageError::Cancelled),
                    result = launch_one(runtime, dep) => result,
                };
                if result.is_err() {
                    siblings.cancel();
                }
                (dep.name.as_str(), result)
            }
        })
        .collect();

    let mut handles = Vec::with_capacity(dependencies.len());
    let mut first_error: Option<StageError> = None;
    while let Some((name, result)) = launches.next().await {
        match result {
            Ok(handle) => {
                info!(dependency = name, id = %handle.id, "dependency running");
                handles.push(handle);
            }
            Err(err) => {
                warn!(dependency = name, error = %err, "dependency launch failed");
                let replace = match &first_error {
                    None => true,
                    Some(existing) => existing.is_cancelled() && !err.is_cancelled(),
                };
                if replace {
                    first_error = Some(err);
                }
            }
        }
    }

    match first_error {
        Some(err) => {
            debug!(started = handles.len(), "leaving started dependencies for cleanup");
            Err(err)
        }
        None => Ok(handles),
    }
}

async fn launch_one<R>(runtime: &R, dep: &DependencySpec) -> Result<ContainerHandle, StageError>
where
    R: ContainerRuntime + ?Sized,
{
    debug!(dependency = %dep.name, image = %dep.image, "pulling image");
    runtime
        .pull_image(&dep.image)
        .await
        .map_err(|source| pull_error(dep, source))?;

    let request = ContainerRequest {
        name: dep.name.clone(),
        image: dep.image.clone(),
        env: dep.environment.clone(),
    };
    let id = runtime
        .create_container(&request)
        .await
        .map_err(|source| StageError::lifecycle(&dep.name, "create", source))?;
    let mut handle = ContainerHandle::new(id, &dep.name, &dep.image);

    runtime
        .start_container(&handle.id)
        .await
        .map_err(|source| StageError::lifecycle(&dep.name, "start", source))?;
    handle.mark(ContainerState::Running);
    Ok(handle)
}

fn pull_error(dep: &DependencySpec, source: RuntimeError) -> StageError {
    if let RuntimeError::Connection(_) = source {
        return StageError::RuntimeConnection(source);
    }
    StageError::ImagePull {
        name: dep.name.clone(),
        image: dep.image.clone(),
        source,
    }
}
