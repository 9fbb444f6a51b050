//! Test-only helpers: a scripted in-memory container runtime and config builders.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::types::BuildRecord;
use crate::error::RuntimeError;
use crate::io::config::{DependencySpec, Method, RunConfig, TestSpec, Timeouts};
use crate::io::runtime::{BuildRequest, ContainerInfo, ContainerRequest, ContainerRuntime};

/// Kind of failure to inject for a scripted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Engine,
    NotFound,
    Connection,
}

impl Fault {
    fn into_error(self, op: &str, target: &str) -> RuntimeError {
        match self {
            Fault::Engine => RuntimeError::Engine(format!("scripted {op} failure for {target}")),
            Fault::NotFound => RuntimeError::NotFound(target.to_string()),
            Fault::Connection => RuntimeError::Connection("scripted connection failure".into()),
        }
    }
}

#[derive(Debug, Clone)]
struct Container {
    id: String,
    env: Vec<String>,
    running: bool,
}

#[derive(Debug, Default)]
struct State {
    ops: Vec<String>,
    containers: BTreeMap<String, Container>,
    images: BTreeSet<String>,
    inspections: u32,
    next_id: u32,
}

/// In-memory [`ContainerRuntime`] that records every call.
///
/// Containers and images are tracked, so removing something twice yields
/// `NotFound` just like a real engine. Faults and hangs are keyed by
/// operation (`pull`, `build`, `create`, `start`, `logs`, `inspect`, `stop`,
/// `wait`, `remove`, `rmi`) and target (container name or image reference).
#[derive(Debug)]
pub struct ScriptedRuntime {
    state: Mutex<State>,
    faults: HashMap<(String, String), Fault>,
    hangs: BTreeSet<(String, String)>,
    build_output: Vec<BuildRecord>,
    ip_address: Option<String>,
    ip_after_inspections: u32,
    exits_on_start: BTreeSet<String>,
}

impl Default for ScriptedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRuntime {
    /// A runtime where everything succeeds and the SUT reports `127.0.0.1`.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            faults: HashMap::new(),
            hangs: BTreeSet::new(),
            build_output: vec![
                BuildRecord::progress("Step 1/1 : FROM scratch\n"),
                BuildRecord::progress("Successfully built 0123456789ab\n"),
            ],
            ip_address: Some("127.0.0.1".to_string()),
            ip_after_inspections: 0,
            exits_on_start: BTreeSet::new(),
        }
    }

    pub fn fail(mut self, op: &str, target: &str, fault: Fault) -> Self {
        self.faults
            .insert((op.to_string(), target.to_string()), fault);
        self
    }

    /// Make `op` on `target` never complete.
    pub fn hang(mut self, op: &str, target: &str) -> Self {
        self.hangs.insert((op.to_string(), target.to_string()));
        self
    }

    pub fn build_output(mut self, records: Vec<BuildRecord>) -> Self {
        self.build_output = records;
        self
    }

    /// IP reported by inspect; `None` means the address is never assigned.
    pub fn ip_address(mut self, ip: Option<&str>) -> Self {
        self.ip_address = ip.map(str::to_string);
        self
    }

    /// Report no IP for the first `count` inspections.
    pub fn ip_after_inspections(mut self, count: u32) -> Self {
        self.ip_after_inspections = count;
        self
    }

    /// The named container exits right after it is started.
    pub fn exits_on_start(mut self, name: &str) -> Self {
        self.exits_on_start.insert(name.to_string());
        self
    }

    /// Recorded operations, e.g. `["pull redis:7", "create cache", ...]`.
    pub fn ops(&self) -> Vec<String> {
        self.lock().ops.clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.lock().ops.iter().filter(|entry| *entry == op).count()
    }

    pub fn env_of(&self, name: &str) -> Option<Vec<String>> {
        self.lock().containers.get(name).map(|c| c.env.clone())
    }

    pub fn live_containers(&self) -> Vec<String> {
        self.lock().containers.keys().cloned().collect()
    }

    pub fn live_images(&self) -> Vec<String> {
        self.lock().images.iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("scripted runtime state poisoned")
    }

    /// Record the call and apply any scripted fault. Returns the resolved
    /// container name (or the raw target for images).
    async fn enter(&self, op: &str, target: &str) -> Result<String, RuntimeError> {
        let resolved = {
            let mut state = self.lock();
            let resolved = state
                .containers
                .iter()
                .find(|(_, c)| c.id == target)
                .map(|(name, _)| name.clone())
                .unwrap_or_else(|| target.to_string());
            state.ops.push(format!("{op} {resolved}"));
            resolved
        };
        if self.hangs.contains(&(op.to_string(), resolved.clone())) {
            std::future::pending::<()>().await;
        }
        tokio::task::yield_now().await;
        if let Some(fault) = self.faults.get(&(op.to_string(), resolved.clone())) {
            return Err(fault.into_error(op, &resolved));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn build_image(&self, request: &BuildRequest) -> Result<Vec<BuildRecord>, RuntimeError> {
        let tag = self.enter("build", &request.tag).await?;
        let failed = crate::core::build_output::build_failure(&self.build_output).is_some();
        if !failed {
            self.lock().images.insert(tag);
        }
        Ok(self.build_output.clone())
    }

    async fn pull_image(&self, reference: &str) -> Result<(), RuntimeError> {
        let reference = self.enter("pull", reference).await?;
        self.lock().images.insert(reference);
        Ok(())
    }

    async fn create_container(&self, request: &ContainerRequest) -> Result<String, RuntimeError> {
        let name = self.enter("create", &request.name).await?;
        let mut state = self.lock();
        if state.containers.contains_key(&name) {
            return Err(RuntimeError::Engine(format!(
                "conflict: container name {name} already in use"
            )));
        }
        if !state.images.contains(&request.image) {
            return Err(RuntimeError::NotFound(request.image.clone()));
        }
        state.next_id += 1;
        let id = format!("{:012x}", state.next_id);
        state.containers.insert(
            name,
            Container {
                id: id.clone(),
                env: request.env.clone(),
                running: false,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, container: &str) -> Result<(), RuntimeError> {
        let name = self.enter("start", container).await?;
        let exits = self.exits_on_start.contains(&name);
        let mut state = self.lock();
        let entry = state
            .containers
            .get_mut(&name)
            .ok_or_else(|| RuntimeError::NotFound(name.clone()))?;
        entry.running = !exits;
        Ok(())
    }

    async fn container_logs(&self, container: &str) -> Result<Vec<String>, RuntimeError> {
        let name = self.enter("logs", container).await?;
        if !self.lock().containers.contains_key(&name) {
            return Err(RuntimeError::NotFound(name));
        }
        Ok(vec![format!("{name} listening on :80")])
    }

    async fn inspect_container(&self, container: &str) -> Result<ContainerInfo, RuntimeError> {
        let name = self.enter("inspect", container).await?;
        let mut state = self.lock();
        let running = state
            .containers
            .get(&name)
            .map(|c| c.running)
            .ok_or_else(|| RuntimeError::NotFound(name.clone()))?;
        state.inspections += 1;
        let assigned = state.inspections > self.ip_after_inspections;
        let ip_address = if running && assigned {
            self.ip_address.clone()
        } else {
            None
        };
        Ok(ContainerInfo {
            running,
            ip_address,
        })
    }

    async fn stop_container(&self, container: &str) -> Result<(), RuntimeError> {
        let name = self.enter("stop", container).await?;
        let mut state = self.lock();
        let entry = state
            .containers
            .get_mut(&name)
            .ok_or_else(|| RuntimeError::NotFound(name.clone()))?;
        entry.running = false;
        Ok(())
    }

    async fn wait_container(&self, container: &str) -> Result<(), RuntimeError> {
        let name = self.enter("wait", container).await?;
        if !self.lock().containers.contains_key(&name) {
            return Err(RuntimeError::NotFound(name));
        }
        Ok(())
    }

    async fn remove_container(&self, container: &str) -> Result<(), RuntimeError> {
        let name = self.enter("remove", container).await?;
        self.lock()
            .containers
            .remove(&name)
            .map(|_| ())
            .ok_or(RuntimeError::NotFound(name))
    }

    async fn remove_image(&self, reference: &str) -> Result<(), RuntimeError> {
        let reference = self.enter("rmi", reference).await?;
        if self.lock().images.remove(&reference) {
            Ok(())
        } else {
            Err(RuntimeError::NotFound(reference))
        }
    }
}

pub fn dependency(name: &str, image: &str) -> DependencySpec {
    DependencySpec {
        name: name.to_string(),
        image: image.to_string(),
        environment: Vec::new(),
    }
}

pub fn get_test(name: &str, url: &str, expected_status_code: u16) -> TestSpec {
    TestSpec {
        name: name.to_string(),
        url: url.to_string(),
        method: Method::Get,
        body: None,
        expected_status_code,
        expected_body_substring: None,
    }
}

/// A valid config for SUT `sut` built from `context`, with short timeouts.
pub fn run_config(
    context: PathBuf,
    report: PathBuf,
    dependencies: Vec<DependencySpec>,
    tests: Vec<TestSpec>,
) -> RunConfig {
    RunConfig {
        sut_name: "sut".to_string(),
        dockerfile: "Dockerfile".to_string(),
        context,
        environment: vec!["MODE=test".to_string()],
        dependencies,
        tests,
        report,
        timeouts: Timeouts {
            build_secs: 5,
            readiness_secs: 1,
            readiness_poll_millis: 10,
            request_secs: 2,
            cleanup_step_secs: 2,
        },
    }
}
