//! Line-oriented report sink (`report.txt`).
//!
//! One line per test: `<name> ok` or `<name> fail (<reason>)`. The sink is
//! reset before a run's first test and then only appended to.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::evaluate::{parse_report_line, report_line};
use crate::core::types::TestResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSink {
    path: PathBuf,
}

/// Counts read back from a report.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReportSummary {
    pub ok: usize,
    pub fail: usize,
    /// Lines that are not in the report format.
    pub unparsed: usize,
}

impl ReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncate the report so a new run never mixes with a previous one.
    pub fn reset(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create report dir {}", parent.display()))?;
        }
        fs::write(&self.path, "").with_context(|| format!("reset {}", self.path.display()))
    }

    /// Append one result as a single write of one complete line.
    pub fn append(&self, result: &TestResult) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        let line = format!("{}\n", report_line(result));
        file.write_all(line.as_bytes())
            .with_context(|| format!("append to {}", self.path.display()))
    }

    pub fn read(&self) -> Result<Vec<TestResult>> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        Ok(contents.lines().filter_map(parse_report_line).collect())
    }

    pub fn summarize(&self) -> Result<ReportSummary> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        let mut summary = ReportSummary::default();
        for line in contents.lines().filter(|line| !line.trim().is_empty()) {
            match parse_report_line(line) {
                Some(result) if result.passed() => summary.ok += 1,
                Some(_) => summary.fail += 1,
                None => summary.unparsed += 1,
            }
        }
        Ok(summary)
    }
}
