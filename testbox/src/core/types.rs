//! Shared deterministic types for the orchestration core.
//!
//! These types carry no I/O and are handed between the launcher, provisioner,
//! test runner and cleanup coordinator.

use std::fmt;

/// Lifecycle of a container created during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Stopped,
    Removed,
}

/// A container owned by the component that created it.
///
/// Ownership moves to the cleanup coordinator at the end of a run, which
/// marks it `Stopped` and then `Removed` as it disposes of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Runtime-assigned identifier.
    pub id: String,
    /// Declared container name.
    pub name: String,
    /// Image reference the container was created from.
    pub image: String,
    pub state: ContainerState,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image: image.into(),
            state: ContainerState::Created,
        }
    }

    pub fn mark(&mut self, state: ContainerState) {
        self.state = state;
    }
}

/// Outcome of a single acceptance test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Fail,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ok => f.write_str("ok"),
            Outcome::Fail => f.write_str("fail"),
        }
    }
}

/// Result of one acceptance test. `reason` is only set on `Fail`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResult {
    pub name: String,
    pub outcome: Outcome,
    pub reason: Option<String>,
}

impl TestResult {
    pub fn ok(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: Outcome::Ok,
            reason: None,
        }
    }

    pub fn fail(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: Outcome::Fail,
            reason: Some(reason.into()),
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Ok
    }
}

/// A single record of image build output.
///
/// Mirrors the records a build API streams back: progress text in
/// `stream`, failures in `error`/`error_detail`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildRecord {
    pub stream: Option<String>,
    pub error: Option<String>,
    pub error_detail: Option<BuildErrorDetail>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildErrorDetail {
    pub message: Option<String>,
}

impl BuildRecord {
    pub fn progress(text: impl Into<String>) -> Self {
        Self {
            stream: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            stream: None,
            error: Some(message.clone()),
            error_detail: Some(BuildErrorDetail {
                message: Some(message),
            }),
        }
    }
}
