//! Docker implementation of [`ContainerRuntime`] on top of [`bollard`].

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::image::{BuildImageOptions, CreateImageOptions, RemoveImageOptions};
use bollard::models::NetworkSettings;
use bollard::{API_DEFAULT_VERSION, Docker};
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{BuildErrorDetail, BuildRecord};
use crate::error::RuntimeError;
use crate::io::runtime::{BuildRequest, ContainerInfo, ContainerRequest, ContainerRuntime};

/// Seconds the engine waits for a container to stop before killing it.
const STOP_GRACE_SECS: i64 = 10;
/// Log lines fetched from a freshly started container.
const LOG_TAIL: &str = "100";
const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Container runtime backed by a Docker engine.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the Docker engine and make sure it answers.
    ///
    /// With `socket = None` the usual environment (`DOCKER_HOST`, then the
    /// default local socket) decides where to connect.
    pub async fn connect(socket: Option<&str>) -> Result<Self, RuntimeError> {
        info!(socket = socket.unwrap_or("<default>"), "connecting to docker");
        let docker = match socket {
            Some(path) => Docker::connect_with_socket(path, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|err| RuntimeError::Connection(err.to_string()))?;

        if let Err(err) = docker.ping().await {
            warn!(error = %err, "docker ping failed");
            return Err(RuntimeError::Connection(err.to_string()));
        }
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    #[instrument(skip_all, fields(tag = %request.tag))]
    async fn build_image(&self, request: &BuildRequest) -> Result<Vec<BuildRecord>, RuntimeError> {
        let options = BuildImageOptions {
            dockerfile: request.dockerfile.clone(),
            t: request.tag.clone(),
            rm: true,
            ..Default::default()
        };
        let context = Bytes::from(request.context.clone());
        let mut stream = self.docker.build_image(options, None, Some(context));

        let mut records = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(info) => records.push(BuildRecord {
                    stream: info.stream,
                    error: info.error,
                    error_detail: info.error_detail.map(|detail| BuildErrorDetail {
                        message: detail.message,
                    }),
                }),
                Err(bollard::errors::Error::DockerStreamError { error }) => {
                    records.push(BuildRecord::failure(error));
                    break;
                }
                Err(err) => return Err(map_error(&request.tag, err)),
            }
        }
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn pull_image(&self, reference: &str) -> Result<(), RuntimeError> {
        let (from_image, tag) = split_reference(reference);
        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(item) = stream.next().await {
            let info = item.map_err(|err| map_error(reference, err))?;
            if let Some(error) = info.error {
                return Err(RuntimeError::Engine(error));
            }
            if let Some(status) = info.status {
                debug!(image = reference, status = %status, "pull progress");
            }
        }
        Ok(())
    }

    #[instrument(skip_all, fields(name = %request.name, image = %request.image))]
    async fn create_container(&self, request: &ContainerRequest) -> Result<String, RuntimeError> {
        let options = CreateContainerOptions {
            name: request.name.clone(),
            platform: None,
        };
        let config = Config {
            image: Some(request.image.clone()),
            env: Some(request.env.clone()),
            ..Default::default()
        };
        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|err| map_error(&request.image, err))?;
        for warning in response.warnings {
            warn!(name = %request.name, "{}", warning);
        }
        Ok(response.id)
    }

    #[instrument(skip(self))]
    async fn start_container(&self, container: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(container, None::<StartContainerOptions<String>>)
            .await
            .map_err(|err| map_error(container, err))
    }

    #[instrument(skip(self))]
    async fn container_logs(&self, container: &str) -> Result<Vec<String>, RuntimeError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: LOG_TAIL.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.logs(container, Some(options));
        let mut lines = Vec::new();
        while let Some(item) = stream.next().await {
            let output = item.map_err(|err| map_error(container, err))?;
            lines.extend(output.to_string().lines().map(str::to_string));
        }
        Ok(lines)
    }

    async fn inspect_container(&self, container: &str) -> Result<ContainerInfo, RuntimeError> {
        let response = self
            .docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await
            .map_err(|err| map_error(container, err))?;
        let running = response
            .state
            .as_ref()
            .and_then(|state| state.running)
            .unwrap_or(false);
        let ip_address = response.network_settings.as_ref().and_then(primary_ip);
        Ok(ContainerInfo {
            running,
            ip_address,
        })
    }

    #[instrument(skip(self))]
    async fn stop_container(&self, container: &str) -> Result<(), RuntimeError> {
        let options = StopContainerOptions { t: STOP_GRACE_SECS };
        match self.docker.stop_container(container, Some(options)).await {
            Ok(()) => Ok(()),
            // Already stopped.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(err) => Err(map_error(container, err)),
        }
    }

    #[instrument(skip(self))]
    async fn wait_container(&self, container: &str) -> Result<(), RuntimeError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(container, Some(options));
        while let Some(item) = stream.next().await {
            match item {
                Ok(_) => break,
                // A non-zero exit code still means the container is no longer running.
                Err(bollard::errors::Error::DockerContainerWaitError { error, code }) => {
                    debug!(container, code, error = %error, "container exited with error");
                    break;
                }
                Err(err) => return Err(map_error(container, err)),
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_container(&self, container: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(container, Some(options))
            .await
            .map_err(|err| map_error(container, err))
    }

    #[instrument(skip(self))]
    async fn remove_image(&self, reference: &str) -> Result<(), RuntimeError> {
        let options = RemoveImageOptions {
            force: true,
            ..Default::default()
        };
        let deleted = self
            .docker
            .remove_image(reference, Some(options), None)
            .await
            .map_err(|err| map_error(reference, err))?;
        debug!(image = reference, layers = deleted.len(), "image removed");
        Ok(())
    }
}

fn primary_ip(settings: &NetworkSettings) -> Option<String> {
    let direct = settings
        .ip_address
        .as_deref()
        .filter(|ip| !ip.is_empty())
        .map(str::to_string);
    direct.or_else(|| {
        settings.networks.as_ref().and_then(|networks| {
            networks
                .values()
                .filter_map(|endpoint| endpoint.ip_address.as_deref())
                .find(|ip| !ip.is_empty())
                .map(str::to_string)
        })
    })
}

/// Split an image reference into the `fromImage` and `tag` pull parameters.
///
/// An empty tag makes the engine pull every tag of the repository, so a bare
/// name gets `latest`. Digest references are passed through whole.
fn split_reference(reference: &str) -> (String, String) {
    if reference.contains('@') {
        return (reference.to_string(), String::new());
    }
    let name_start = reference.rfind('/').map_or(0, |slash| slash + 1);
    match reference[name_start..].rfind(':') {
        Some(colon) => {
            let split = name_start + colon;
            (reference[..split].to_string(), reference[split + 1..].to_string())
        }
        None => (reference.to_string(), "latest".to_string()),
    }
}

fn map_error(resource: &str, err: bollard::errors::Error) -> RuntimeError {
    use bollard::errors::Error;
    match err {
        Error::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound(resource.to_string()),
        Error::DockerResponseServerError { message, .. } => RuntimeError::Engine(message),
        other @ (Error::IOError { .. }
        | Error::SocketNotFoundError(_)
        | Error::HyperResponseError { .. }
        | Error::HyperLegacyError { .. }
        | Error::RequestTimeoutError) => {
            RuntimeError::Connection(other.to_string())
        }
        other => RuntimeError::Engine(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::EndpointSettings;
    use std::collections::HashMap;

    #[test]
    fn primary_ip_prefers_default_bridge_address() {
        let settings = NetworkSettings {
            ip_address: Some("172.17.0.2".to_string()),
            ..Default::default()
        };
        assert_eq!(primary_ip(&settings).as_deref(), Some("172.17.0.2"));
    }

    #[test]
    fn primary_ip_falls_back_to_attached_networks() {
        let mut networks = HashMap::new();
        networks.insert(
            "custom".to_string(),
            EndpointSettings {
                ip_address: Some("10.0.0.7".to_string()),
                ..Default::default()
            },
        );
        let settings = NetworkSettings {
            ip_address: Some(String::new()),
            networks: Some(networks),
            ..Default::default()
        };
        assert_eq!(primary_ip(&settings).as_deref(), Some("10.0.0.7"));
    }

    #[test]
    fn primary_ip_is_none_before_assignment() {
        assert_eq!(primary_ip(&NetworkSettings::default()), None);
    }

    #[test]
    fn not_found_responses_map_to_not_found() {
        let err = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such container: sut".to_string(),
        };
        assert_eq!(map_error("sut", err), RuntimeError::NotFound("sut".to_string()));
    }

    #[test]
    fn transport_failures_map_to_connection() {
        let broken = bollard::errors::Error::IOError {
            err: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "daemon went away"),
        };
        assert!(matches!(map_error("sut", broken), RuntimeError::Connection(_)));
        assert!(matches!(
            map_error("sut", bollard::errors::Error::RequestTimeoutError),
            RuntimeError::Connection(_)
        ));
    }

    #[test]
    fn engine_rejections_stay_engine_errors() {
        let err = bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message: "conflict".to_string(),
        };
        assert_eq!(map_error("sut", err), RuntimeError::Engine("conflict".to_string()));
    }

    fn pair(image: &str, tag: &str) -> (String, String) {
        (image.to_string(), tag.to_string())
    }

    #[test]
    fn bare_reference_pulls_latest() {
        assert_eq!(split_reference("redis"), pair("redis", "latest"));
    }

    #[test]
    fn explicit_tag_is_split_off() {
        assert_eq!(split_reference("postgres:16"), pair("postgres", "16"));
        assert_eq!(split_reference("host:5000/team/api:1.2"), pair("host:5000/team/api", "1.2"));
    }

    #[test]
    fn registry_port_is_not_a_tag() {
        assert_eq!(split_reference("host:5000/x"), pair("host:5000/x", "latest"));
    }

    #[test]
    fn digest_reference_is_passed_through() {
        let reference = "x@sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
        assert_eq!(split_reference(reference), pair(reference, ""));
    }
}
