//! Container-runtime capability surface consumed by the orchestration core.
//!
//! The [`ContainerRuntime`] trait decouples orchestration from the actual
//! engine (Docker via [`crate::io::docker::DockerRuntime`]). Tests use
//! `test_support::ScriptedRuntime`, which records calls and injects failures
//! without touching a daemon.

use async_trait::async_trait;

use crate::core::types::BuildRecord;
use crate::error::RuntimeError;

/// Input for an image build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Tag applied to the built image.
    pub tag: String,
    /// Dockerfile path inside the build context.
    pub dockerfile: String,
    /// Tar archive of the build context.
    pub context: Vec<u8>,
}

/// Input for creating a named container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRequest {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
}

/// What `inspect` reveals about a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub running: bool,
    /// Primary IP address, `None` until the runtime has assigned one.
    pub ip_address: Option<String>,
}

/// Operations the orchestrator needs from a container engine.
///
/// Every call either succeeds or returns an error; callers never retry.
/// Container arguments accept an id or a name.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Build an image and return every output record the builder produced.
    ///
    /// A transport-level success does not imply the build succeeded; callers
    /// must inspect the records.
    async fn build_image(&self, request: &BuildRequest) -> Result<Vec<BuildRecord>, RuntimeError>;

    async fn pull_image(&self, reference: &str) -> Result<(), RuntimeError>;

    /// Create a container and return its runtime-assigned id.
    async fn create_container(&self, request: &ContainerRequest) -> Result<String, RuntimeError>;

    async fn start_container(&self, container: &str) -> Result<(), RuntimeError>;

    /// Recent log lines (stdout and stderr) of a container.
    async fn container_logs(&self, container: &str) -> Result<Vec<String>, RuntimeError>;

    async fn inspect_container(&self, container: &str) -> Result<ContainerInfo, RuntimeError>;

    async fn stop_container(&self, container: &str) -> Result<(), RuntimeError>;

    /// Block until the container is no longer running.
    async fn wait_container(&self, container: &str) -> Result<(), RuntimeError>;

    async fn remove_container(&self, container: &str) -> Result<(), RuntimeError>;

    async fn remove_image(&self, reference: &str) -> Result<(), RuntimeError>;
}
