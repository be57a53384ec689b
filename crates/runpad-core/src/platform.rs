//! Execution platform descriptors.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::toolchain::Toolchain;

/// CPU architecture of a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    X86,
    X64,
    Arm,
    Arm64,
    Wasm32,
    Other(String),
}

impl Architecture {
    /// Derive the architecture from the first component of a target triple.
    pub fn from_triple(triple: &str) -> Self {
        let arch = triple.split('-').next().unwrap_or_default();
        match arch {
            "x86_64" => Architecture::X64,
            "i386" | "i586" | "i686" | "x86" => Architecture::X86,
            "aarch64" | "arm64" | "arm64e" => Architecture::Arm64,
            a if a.starts_with("arm") || a.starts_with("thumb") => Architecture::Arm,
            "wasm32" => Architecture::Wasm32,
            other => Architecture::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::X86 => f.write_str("x86"),
            Architecture::X64 => f.write_str("x64"),
            Architecture::Arm => f.write_str("arm"),
            Architecture::Arm64 => f.write_str("arm64"),
            Architecture::Wasm32 => f.write_str("wasm32"),
            Architecture::Other(a) => f.write_str(a),
        }
    }
}

/// Where and how a compiled snippet runs.
///
/// A native platform runs the artifact directly. A managed platform runs it
/// through `launcher`, e.g. a WASI runtime for `wasm32-wasip1` artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlatform {
    pub architecture: Architecture,

    pub is_managed: bool,

    /// Toolchain release the platform compiles with.
    pub framework_version: Option<String>,

    /// Target triple.
    pub moniker: String,

    /// Human-readable description; part of the restore cache key.
    pub description: String,

    /// Runtime launcher for managed platforms.
    pub launcher: Option<PathBuf>,
}

impl ExecutionPlatform {
    /// The toolchain's host target.
    pub fn native(toolchain: &Toolchain) -> Self {
        Self::for_target(&toolchain.host, Some(toolchain.release.clone()))
    }

    /// A native platform for an explicit target triple.
    pub fn for_target(triple: &str, framework_version: Option<String>) -> Self {
        let description = match &framework_version {
            Some(version) => format!("{triple} (rustc {version})"),
            None => triple.to_string(),
        };
        Self {
            architecture: Architecture::from_triple(triple),
            is_managed: false,
            framework_version,
            moniker: triple.to_string(),
            description,
            launcher: None,
        }
    }

    /// A managed platform whose artifacts run through `launcher`.
    pub fn managed(triple: &str, framework_version: Option<String>, launcher: PathBuf) -> Self {
        let base = Self::for_target(triple, framework_version);
        let launcher_name = launcher
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            is_managed: true,
            description: format!("{} via {launcher_name}", base.description),
            launcher: Some(launcher),
            ..base
        }
    }

    /// Check the platform can be launched at all.
    pub fn validate(&self) -> Result<()> {
        if self.moniker.trim().is_empty() {
            return Err(Error::Configuration("platform has no target".to_string()));
        }
        if self.is_managed && self.launcher.is_none() {
            return Err(Error::Configuration(format!(
                "managed platform '{}' has no runtime launcher",
                self.description
            )));
        }
        Ok(())
    }

    /// File name of a compiled program for this platform.
    pub fn artifact_file_name(&self, stem: &str) -> String {
        if self.architecture == Architecture::Wasm32 {
            format!("{stem}.wasm")
        } else if self.moniker.contains("windows") {
            format!("{stem}.exe")
        } else {
            stem.to_string()
        }
    }
}

impl fmt::Display for ExecutionPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_architecture_from_triple() {
        assert_eq!(
            Architecture::from_triple("x86_64-unknown-linux-gnu"),
            Architecture::X64
        );
        assert_eq!(
            Architecture::from_triple("aarch64-apple-darwin"),
            Architecture::Arm64
        );
        assert_eq!(
            Architecture::from_triple("armv7-unknown-linux-gnueabihf"),
            Architecture::Arm
        );
        assert_eq!(
            Architecture::from_triple("i686-pc-windows-msvc"),
            Architecture::X86
        );
        assert_eq!(Architecture::from_triple("wasm32-wasip1"), Architecture::Wasm32);
        assert_eq!(
            Architecture::from_triple("riscv64gc-unknown-linux-gnu"),
            Architecture::Other("riscv64gc".to_string())
        );
    }

    #[test]
    fn test_managed_requires_launcher() {
        let mut platform =
            ExecutionPlatform::managed("wasm32-wasip1", None, PathBuf::from("/usr/bin/wasmtime"));
        assert!(platform.validate().is_ok());
        assert!(platform.description.contains("wasmtime"));

        platform.launcher = None;
        assert!(matches!(platform.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_artifact_names() {
        let linux = ExecutionPlatform::for_target("x86_64-unknown-linux-gnu", None);
        assert_eq!(linux.artifact_file_name("script"), "script");
        let windows = ExecutionPlatform::for_target("x86_64-pc-windows-msvc", None);
        assert_eq!(windows.artifact_file_name("script"), "script.exe");
        let wasm = ExecutionPlatform::for_target("wasm32-wasip1", None);
        assert_eq!(wasm.artifact_file_name("script"), "script.wasm");
    }

    #[test]
    fn test_description_includes_version() {
        let p = ExecutionPlatform::for_target("x86_64-unknown-linux-gnu", Some("1.85.0".into()));
        assert_eq!(p.description, "x86_64-unknown-linux-gnu (rustc 1.85.0)");
    }
}
