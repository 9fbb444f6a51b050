//! Run configuration loaded from `config.yaml` (or `.toml`).
//!
//! Keys are camelCase. The legacy key names (`containerName`, `queryType`,
//! `query`, `expectedCode`, `responseContains`) are accepted as aliases.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "./config.yaml";
const FALLBACK_CONFIG_DIR: &str = "configs";

/// Everything one run needs: the SUT, its dependencies and the test battery.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    /// Container name of the SUT; also the tag of the built image.
    #[serde(alias = "containerName")]
    pub sut_name: String,
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,
    /// Build context directory, relative to the working directory.
    #[serde(default = "default_context")]
    pub context: PathBuf,
    #[serde(default)]
    pub environment: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    #[serde(default)]
    pub tests: Vec<TestSpec>,
    /// Report sink path.
    #[serde(default = "default_report")]
    pub report: PathBuf,
    #[serde(default)]
    pub timeouts: Timeouts,
}

/// Image build input for the SUT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    pub dockerfile: String,
    pub context: PathBuf,
    pub tag: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DependencySpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub environment: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestSpec {
    pub name: String,
    /// Path appended to the SUT base URL.
    pub url: String,
    #[serde(alias = "queryType")]
    pub method: Method,
    #[serde(default, alias = "query")]
    pub body: Option<String>,
    #[serde(alias = "expectedCode")]
    pub expected_status_code: u16,
    #[serde(default, alias = "responseContains")]
    pub expected_body_substring: Option<String>,
}

/// HTTP method of a test. Unknown methods are kept so the test can be
/// reported as misconfigured without aborting the run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Other(String),
}

impl Method {
    pub fn requires_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }
}

impl From<String> for Method {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            _ => Method::Other(value),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
            Method::Put => f.write_str("PUT"),
            Method::Delete => f.write_str("DELETE"),
            Method::Other(raw) => f.write_str(raw),
        }
    }
}

/// Time budgets for the blocking parts of a run.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Timeouts {
    /// Hard limit for the SUT image build.
    pub build_secs: u64,
    /// How long to wait for the SUT to report an IP address.
    pub readiness_secs: u64,
    pub readiness_poll_millis: u64,
    /// Per-request limit for acceptance tests.
    pub request_secs: u64,
    /// Limit for each individual cleanup call.
    pub cleanup_step_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            build_secs: 120,
            readiness_secs: 30,
            readiness_poll_millis: 500,
            request_secs: 10,
            cleanup_step_secs: 30,
        }
    }
}

impl Timeouts {
    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build_secs)
    }

    pub fn readiness(&self) -> Duration {
        Duration::from_secs(self.readiness_secs)
    }

    pub fn readiness_poll(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_millis)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn cleanup_step(&self) -> Duration {
        Duration::from_secs(self.cleanup_step_secs)
    }

    fn validate(&self) -> Result<()> {
        let fields = [
            ("timeouts.buildSecs", self.build_secs),
            ("timeouts.readinessSecs", self.readiness_secs),
            ("timeouts.readinessPollMillis", self.readiness_poll_millis),
            ("timeouts.requestSecs", self.request_secs),
            ("timeouts.cleanupStepSecs", self.cleanup_step_secs),
        ];
        for (label, value) in fields {
            if value == 0 {
                bail!("{label} must be > 0");
            }
        }
        Ok(())
    }
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

fn default_context() -> PathBuf {
    PathBuf::from(".")
}

fn default_report() -> PathBuf {
    PathBuf::from("report.txt")
}

impl RunConfig {
    pub fn build_spec(&self) -> BuildSpec {
        BuildSpec {
            dockerfile: self.dockerfile.clone(),
            context: self.context.clone(),
            tag: self.sut_name.clone(),
        }
    }

    /// Every container name the run creates: the SUT first, then dependencies.
    pub fn container_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.sut_name.as_str())
            .chain(self.dependencies.iter().map(|dep| dep.name.as_str()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.sut_name.trim().is_empty() {
            bail!("sutName must be non-empty");
        }
        if !is_image_name(&self.sut_name) {
            bail!(
                "sutName `{}` is also the image tag: use lowercase letters, digits, '.', '_' or '-', starting with a letter or digit",
                self.sut_name
            );
        }
        if self.dockerfile.trim().is_empty() {
            bail!("dockerfile must be non-empty");
        }
        validate_environment("environment", &self.environment)?;

        let mut names = BTreeSet::new();
        for name in self.container_names() {
            if !names.insert(name) {
                bail!("container name `{name}` is used more than once");
            }
        }
        for (index, dep) in self.dependencies.iter().enumerate() {
            dep.validate()
                .with_context(|| format!("dependencies[{index}] invalid"))?;
        }

        let mut test_names = BTreeSet::new();
        for (index, test) in self.tests.iter().enumerate() {
            test.validate()
                .with_context(|| format!("tests[{index}] invalid"))?;
            if !test_names.insert(test.name.as_str()) {
                bail!("test name `{}` is used more than once", test.name);
            }
        }
        self.timeouts.validate()?;
        Ok(())
    }
}

impl DependencySpec {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("name must be non-empty");
        }
        if self.image.trim().is_empty() {
            bail!("image must be non-empty");
        }
        validate_environment("environment", &self.environment)
    }
}

impl TestSpec {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("name must be non-empty");
        }
        if !self.url.starts_with('/') {
            bail!("url must start with '/' (got `{}`)", self.url);
        }
        if !(100..=599).contains(&self.expected_status_code) {
            bail!(
                "expectedStatusCode must be a valid HTTP status (got {})",
                self.expected_status_code
            );
        }
        if self.method.requires_body() && self.body.is_none() {
            bail!("body is required for {} requests", self.method);
        }
        Ok(())
    }
}

/// Whether `name` is usable both as a container name and as an image
/// repository name (lowercase, `[a-z0-9][a-z0-9._-]*`, at most 128 chars).
fn is_image_name(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_ok = chars
        .next()
        .is_some_and(|first| first.is_ascii_lowercase() || first.is_ascii_digit());
    starts_ok
        && name.len() <= 128
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
}

fn validate_environment(label: &str, entries: &[String]) -> Result<()> {
    for entry in entries {
        match entry.split_once('=') {
            Some((key, _)) if !key.trim().is_empty() => {}
            _ => bail!("{label} entry `{entry}` must be KEY=VALUE"),
        }
    }
    Ok(())
}

/// Resolve the config path, falling back to `configs/<name>` for bare names.
pub fn resolve_config_path(path: &Path) -> PathBuf {
    if path.exists() {
        return path.to_path_buf();
    }
    let bare = path
        .parent()
        .is_none_or(|parent| parent.as_os_str().is_empty());
    if bare {
        let fallback = Path::new(FALLBACK_CONFIG_DIR).join(path);
        if fallback.exists() {
            return fallback;
        }
    }
    path.to_path_buf()
}

/// Load and validate a run config. The format follows the file extension.
pub fn load_config(path: &Path) -> Result<RunConfig> {
    let path = resolve_config_path(path);
    let contents =
        fs::read_to_string(&path).with_context(|| format!("read config {}", path.display()))?;
    let cfg = parse_config(&contents, &path)?;
    cfg.validate()
        .with_context(|| format!("validate config {}", path.display()))?;
    Ok(cfg)
}

fn parse_config(contents: &str, path: &Path) -> Result<RunConfig> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    let cfg: RunConfig = match extension.as_deref() {
        Some("toml") => {
            toml::from_str(contents).with_context(|| format!("parse {}", path.display()))?
        }
        Some("yaml" | "yml") | None => serde_yaml::from_str(contents)
            .with_context(|| format!("parse {}", path.display()))?,
        Some(other) => bail!("unsupported config format `.{other}` (use .yaml or .toml)"),
    };
    Ok(cfg)
}

#[cfg(test)]
pub fn parse_str(contents: &str, path: &Path) -> Result<RunConfig> {
    let cfg = parse_config(contents, path)?;
    cfg.validate()?;
    Ok(cfg)
}
