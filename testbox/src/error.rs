//! Error taxonomy for runtime calls and orchestration stages.

/// Failure of a single container-runtime call.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The container or image does not exist (or is already gone).
    #[error("{0} not found")]
    NotFound(String),
    /// The runtime could not be reached at all.
    #[error("cannot reach container runtime: {0}")]
    Connection(String),
    /// The runtime answered with an error.
    #[error("{0}")]
    Engine(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

/// Fatal failure of an orchestration stage.
///
/// Per-test failures are not errors; they are recorded as `TestResult`s.
#[derive(thiserror::Error, Debug)]
pub enum StageError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("{0}")]
    RuntimeConnection(RuntimeError),
    #[error("pull image `{image}` for `{name}`: {source}")]
    ImagePull {
        name: String,
        image: String,
        #[source]
        source: RuntimeError,
    },
    #[error("build image `{tag}`: {reason}")]
    ImageBuild { tag: String, reason: String },
    #[error("container `{name}`: {action}: {source}")]
    ContainerLifecycle {
        name: String,
        action: &'static str,
        #[source]
        source: RuntimeError,
    },
    #[error("container `{name}` reported no IP address within {waited_secs}s")]
    ReadinessTimeout { name: String, waited_secs: u64 },
    #[error("report: {0}")]
    Report(String),
    #[error("cancelled")]
    Cancelled,
}

impl StageError {
    pub fn lifecycle(name: &str, action: &'static str, source: RuntimeError) -> Self {
        if let RuntimeError::Connection(_) = source {
            return StageError::RuntimeConnection(source);
        }
        StageError::ContainerLifecycle {
            name: name.to_string(),
            action,
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StageError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failures_escalate_to_runtime_connection() {
        let err = StageError::lifecycle("sut", "create", RuntimeError::Connection("refused".into()));
        assert!(matches!(err, StageError::RuntimeConnection(_)));
    }

    #[test]
    fn lifecycle_message_names_container_and_action() {
        let err = StageError::lifecycle("db", "start", RuntimeError::Engine("port in use".into()));
        assert_eq!(err.to_string(), "container `db`: start: port in use");
    }
}
