//! Orchestration stages and the per-run result threaded through them.
//!
//! Stages advance strictly in declaration order. A failure at any stage is
//! recorded in [`RunResult`] and sends the run straight to cleanup.

use std::fmt;

use crate::core::types::TestResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Idle,
    DependenciesLaunching,
    Building,
    SutStarting,
    AwaitingReadiness,
    TestsRunning,
    Done,
}

impl Stage {
    /// The stage that follows `self`, or `None` from `Done`.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Idle => Some(Stage::DependenciesLaunching),
            Stage::DependenciesLaunching => Some(Stage::Building),
            Stage::Building => Some(Stage::SutStarting),
            Stage::SutStarting => Some(Stage::AwaitingReadiness),
            Stage::AwaitingReadiness => Some(Stage::TestsRunning),
            Stage::TestsRunning => Some(Stage::Done),
            Stage::Done => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::DependenciesLaunching => "dependency launch",
            Stage::Building => "image build",
            Stage::SutStarting => "sut start",
            Stage::AwaitingReadiness => "readiness",
            Stage::TestsRunning => "tests",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of a run as seen by the orchestrator.
///
/// `failure` holds the stage that failed and the cause. It is set at most
/// once; later stages never run after it is set.
#[derive(Debug)]
pub struct RunResult<E> {
    stage: Stage,
    failure: Option<(Stage, E)>,
    results: Vec<TestResult>,
}

impl<E> Default for RunResult<E> {
    fn default() -> Self {
        Self {
            stage: Stage::Idle,
            failure: None,
            results: Vec::new(),
        }
    }
}

impl<E> RunResult<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Move to the next stage. Returns `false` once the run has failed or
    /// is already done.
    pub fn advance(&mut self) -> bool {
        if self.failure.is_some() {
            return false;
        }
        match self.stage.next() {
            Some(next) => {
                self.stage = next;
                true
            }
            None => false,
        }
    }

    /// Record the failure of the current stage. Only the first failure is kept.
    pub fn fail(&mut self, error: E) {
        if self.failure.is_none() {
            self.failure = Some((self.stage, error));
        }
    }

    pub fn set_results(&mut self, results: Vec<TestResult>) {
        self.results = results;
    }

    pub fn into_parts(self) -> (Stage, Option<(Stage, E)>, Vec<TestResult>) {
        (self.stage, self.failure, self.results)
    }
}
