//! External build tool invocation.
//!
//! The [`BuildTool`] trait is the seam between the host and `cargo`. The
//! restore cache uses [`BuildTool::restore`] to compile a stub crate's
//! dependencies; the out-of-process compile strategy uses
//! [`BuildTool::build`] to produce a program.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Error, Result};

use super::diagnostics::{Severity, parse_build_line};

/// Arguments for resolving a stub project's dependencies.
#[derive(Debug, Clone)]
pub struct RestoreInvocation {
    /// Directory holding `Cargo.toml`.
    pub project_dir: PathBuf,
    pub target_dir: PathBuf,
    /// Target triple.
    pub target: String,
    /// File receiving the tool's standard error.
    pub log_file: PathBuf,
}

/// Arguments for building a program.
#[derive(Debug, Clone)]
pub struct BuildInvocation {
    /// Directory holding `Cargo.toml`.
    pub project_dir: PathBuf,
    pub target_dir: PathBuf,
    /// Target triple.
    pub target: String,
    pub release: bool,
    /// Sink for warning lines.
    pub warnings_log: PathBuf,
    /// Sink for error lines.
    pub errors_log: PathBuf,
}

/// Captured result of one tool run. Exit code 0 means success.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An external build tool.
///
/// Dropping a returned future must stop the tool. Implementations that
/// spawn processes do so with `kill_on_drop`.
#[async_trait]
pub trait BuildTool: Send + Sync {
    async fn restore(&self, invocation: &RestoreInvocation) -> Result<ToolOutput>;

    async fn build(&self, invocation: &BuildInvocation) -> Result<ToolOutput>;
}

/// `cargo`, run as a child process.
#[derive(Debug, Clone)]
pub struct CargoBuildTool {
    cargo: PathBuf,
    offline: bool,
}

impl CargoBuildTool {
    pub fn new(cargo: impl Into<PathBuf>) -> Self {
        Self {
            cargo: cargo.into(),
            offline: false,
        }
    }

    /// Pass `--offline` so only already-downloaded crates are used.
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    fn command(&self, project_dir: &std::path::Path, target_dir: &std::path::Path) -> Command {
        let mut cmd = Command::new(&self.cargo);
        cmd.current_dir(project_dir)
            .env("CARGO_TARGET_DIR", target_dir)
            .env_remove("RUSTFLAGS")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd.arg("build");
        if self.offline {
            cmd.arg("--offline");
        }
        cmd
    }

    async fn run(&self, mut cmd: Command) -> Result<ToolOutput> {
        let output = cmd.output().await.map_err(|e| {
            Error::Configuration(format!(
                "Failed to run cargo '{}': {}",
                self.cargo.display(),
                e
            ))
        })?;

        Ok(ToolOutput {
            // Killed by a signal: report as a generic failure.
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl BuildTool for CargoBuildTool {
    async fn restore(&self, invocation: &RestoreInvocation) -> Result<ToolOutput> {
        let mut cmd = self.command(&invocation.project_dir, &invocation.target_dir);
        cmd.args([
            "--lib",
            "--message-format=json-diagnostic-short,json-render-diagnostics",
            "--target",
        ])
        .arg(&invocation.target);

        tracing::info!(
            "Restoring dependencies in {} for {}",
            invocation.project_dir.display(),
            invocation.target
        );
        let output = self.run(cmd).await?;
        tokio::fs::write(&invocation.log_file, &output.stderr).await?;
        Ok(output)
    }

    async fn build(&self, invocation: &BuildInvocation) -> Result<ToolOutput> {
        let mut cmd = self.command(&invocation.project_dir, &invocation.target_dir);
        cmd.args(["--bins", "--message-format=short", "--target"])
            .arg(&invocation.target);
        if invocation.release {
            cmd.arg("--release");
        }

        tracing::info!("Building program in {}", invocation.project_dir.display());
        let output = self.run(cmd).await?;

        let (warnings, errors) = split_by_severity(&output.stderr);
        tokio::fs::write(&invocation.warnings_log, warnings).await?;
        tokio::fs::write(&invocation.errors_log, errors).await?;
        Ok(output)
    }
}

/// Split build output into a warnings log and an errors log.
///
/// Lines matching the build grammar go by their severity; other lines
/// starting with `error` or `warning` follow the same rule. Anything else is
/// dropped.
pub fn split_by_severity(stderr: &str) -> (String, String) {
    let mut warnings = String::new();
    let mut errors = String::new();

    for line in stderr.lines() {
        let severity = match parse_build_line(line) {
            Some(diag) => Some(diag.severity),
            None if line.starts_with("error") => Some(Severity::Error),
            None if line.starts_with("warning") => Some(Severity::Warning),
            None => None,
        };
        let sink = match severity {
            Some(Severity::Error) => &mut errors,
            Some(Severity::Warning) => &mut warnings,
            _ => continue,
        };
        sink.push_str(line);
        sink.push('\n');
    }

    (warnings, errors)
}
