use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use testbox::cleanup::cleanup;
use testbox::exit_codes;
use testbox::io::config::{DEFAULT_CONFIG_PATH, RunConfig, load_config};
use testbox::io::docker::DockerRuntime;
use testbox::io::report::ReportSink;
use testbox::logging;
use testbox::orchestrator::{Orchestrator, RunSummary};
use testbox::shutdown::{shutdown_signal, watch_interrupts};

#[derive(Parser)]
#[command(
    name = "testbox",
    version,
    about = "Run HTTP acceptance tests against a containerized service"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Launch dependencies, build and start the SUT, run tests, clean up.
    Run {
        /// Run config (.yaml, .yml or .toml).
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        file: PathBuf,
        /// Exit non-zero when any test fails.
        #[arg(long)]
        strict: bool,
        /// Docker socket path (defaults to the local engine).
        #[arg(long)]
        docker_socket: Option<String>,
    },
    /// Load and check a run config without starting anything.
    Validate {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        file: PathBuf,
    },
    /// Remove every container and image a run of this config may have left.
    Clean {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        file: PathBuf,
        #[arg(long)]
        docker_socket: Option<String>,
    },
    /// Summarize the report written by the last run.
    Report {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run {
            file,
            strict,
            docker_socket,
        } => cmd_run(&file, strict, docker_socket.as_deref()).await,
        Command::Validate { file } => cmd_validate(&file),
        Command::Clean {
            file,
            docker_socket,
        } => cmd_clean(&file, docker_socket.as_deref()).await,
        Command::Report { file } => cmd_report(&file),
    };
    std::process::exit(code);
}

async fn cmd_run(file: &Path, strict: bool, socket: Option<&str>) -> i32 {
    let Some(config) = load_or_report(file) else {
        return exit_codes::INVALID;
    };
    let runtime = match DockerRuntime::connect(socket).await {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("run: {err}");
            return exit_codes::STAGE_FAILED;
        }
    };

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(cancel_on_signal(cancel.clone()));
    let summary = Orchestrator::new(&runtime).run(&config, &cancel).await;
    watcher.abort();

    print_summary(&config, &summary);
    summary.exit_code(strict)
}

fn print_summary(config: &RunConfig, summary: &RunSummary) {
    if !summary.results.is_empty() || summary.failure.is_none() {
        println!(
            "run: all tests executed ({} ok, {} fail), report at {}",
            summary.results.len() - summary.failed_tests(),
            summary.failed_tests(),
            config.report.display()
        );
    }
    match &summary.failure {
        None => println!("run: all operations completed"),
        Some((stage, err)) => eprintln!("run: {stage} failed: {err}"),
    }
    if summary.cleanup.is_clean() {
        println!("cleanup: artifacts removed");
    } else {
        eprintln!(
            "cleanup: warning: {} step(s) failed",
            summary.cleanup.failures.len()
        );
        for failure in &summary.cleanup.failures {
            eprintln!("cleanup:   {failure}");
        }
    }
}

fn cmd_validate(file: &Path) -> i32 {
    let Some(config) = load_or_report(file) else {
        return exit_codes::INVALID;
    };
    println!(
        "validate: ok (sut `{}`, {} dependencies, {} tests)",
        config.sut_name,
        config.dependencies.len(),
        config.tests.len()
    );
    exit_codes::OK
}

async fn cmd_clean(file: &Path, socket: Option<&str>) -> i32 {
    let Some(config) = load_or_report(file) else {
        return exit_codes::INVALID;
    };
    let runtime = match DockerRuntime::connect(socket).await {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("cleanup: {err}");
            return exit_codes::STAGE_FAILED;
        }
    };
    let report = cleanup(&runtime, &config, &mut [], config.timeouts.cleanup_step()).await;
    match report.into_result() {
        Ok(()) => {
            println!("cleanup: artifacts removed");
            exit_codes::OK
        }
        Err(err) => {
            eprintln!("cleanup: {err:#}");
            exit_codes::STAGE_FAILED
        }
    }
}

fn cmd_report(file: &Path) -> i32 {
    let result = load_config(file).and_then(|config| {
        ReportSink::new(&config.report)
            .summarize()
            .with_context(|| format!("summarize report for {}", file.display()))
    });
    match result {
        Ok(summary) => {
            println!("report: {} ok, {} fail", summary.ok, summary.fail);
            if summary.unparsed > 0 {
                println!("report: {} unrecognized line(s)", summary.unparsed);
            }
            exit_codes::OK
        }
        Err(err) => {
            eprintln!("report: {err:#}");
            exit_codes::INVALID
        }
    }
}

fn load_or_report(file: &Path) -> Option<RunConfig> {
    match load_config(file) {
        Ok(config) => Some(config),
        Err(err) => {
            eprintln!("config: {err:#}");
            None
        }
    }
}

async fn cancel_on_signal(cancel: CancellationToken) {
    match watch_interrupts(shutdown_signal, cancel).await {
        Ok(()) => std::process::exit(exit_codes::STAGE_FAILED),
        Err(err) => warn!(error = %err, "signal handling unavailable"),
    }
}
