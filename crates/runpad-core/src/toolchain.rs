//! Toolchain discovery.
//!
//! Locates `rustc` and `cargo` and reads the release and host triple from
//! `rustc -vV`.

use std::path::PathBuf;
use std::process::Command;

use crate::error::{Error, Result};

/// Environment variable overriding the `rustc` executable.
pub const RUSTC_ENV: &str = "RUNPAD_RUSTC";

/// Environment variable overriding the `cargo` executable.
pub const CARGO_ENV: &str = "RUNPAD_CARGO";

/// A located Rust toolchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub rustc: PathBuf,
    pub cargo: PathBuf,

    /// Release number, e.g. `1.85.0`.
    pub release: String,

    /// Host target triple, e.g. `x86_64-unknown-linux-gnu`.
    pub host: String,

    /// Full first line of `rustc -vV`.
    pub version_line: String,
}

impl Toolchain {
    /// Locate the toolchain from the environment overrides or `PATH`.
    pub fn locate() -> Result<Self> {
        let rustc = find_tool(RUSTC_ENV, "rustc")?;
        let cargo = find_tool(CARGO_ENV, "cargo")?;
        Self::from_paths(rustc, cargo)
    }

    /// Build a toolchain description from explicit executables.
    pub fn from_paths(rustc: PathBuf, cargo: PathBuf) -> Result<Self> {
        let output = Command::new(&rustc)
            .arg("-vV")
            .output()
            .map_err(|e| Error::Configuration(format!("Failed to run rustc: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Configuration(format!(
                "`{} -vV` failed: {}",
                rustc.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let info = parse_verbose_version(&String::from_utf8_lossy(&output.stdout))?;
        tracing::debug!(release = %info.release, host = %info.host, "located toolchain");

        Ok(Self {
            rustc,
            cargo,
            release: info.release,
            host: info.host,
            version_line: info.version_line,
        })
    }

    /// Sysroot of this toolchain.
    pub fn sysroot(&self) -> Result<PathBuf> {
        let output = Command::new(&self.rustc)
            .args(["--print", "sysroot"])
            .output()
            .map_err(|e| Error::Configuration(format!("Failed to get sysroot: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Configuration("Failed to get sysroot".to_string()));
        }

        Ok(PathBuf::from(
            String::from_utf8_lossy(&output.stdout).trim().to_string(),
        ))
    }
}

/// Fields of interest from `rustc -vV`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub version_line: String,
    pub release: String,
    pub host: String,
}

/// Parse the output of `rustc -vV`.
pub fn parse_verbose_version(text: &str) -> Result<VersionInfo> {
    let version_line = text.lines().next().unwrap_or_default().trim().to_string();
    let mut release = None;
    let mut host = None;

    for line in text.lines() {
        if let Some(value) = line.strip_prefix("release:") {
            release = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("host:") {
            host = Some(value.trim().to_string());
        }
    }

    match (release, host) {
        (Some(release), Some(host)) => Ok(VersionInfo {
            version_line,
            release,
            host,
        }),
        _ => Err(Error::Configuration(format!(
            "unrecognised `rustc -vV` output: {version_line:?}"
        ))),
    }
}

fn find_tool(env_var: &str, name: &str) -> Result<PathBuf> {
    if let Ok(path) = std::env::var(env_var) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!("{} points to missing file {}", env_var, path.display());
    }

    which::which(name)
        .map_err(|_| Error::Configuration(format!("{name} not found in PATH (set {env_var})")))
}
