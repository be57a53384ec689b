//! Artifact disassembly.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Error, Result};

/// Renders a compiled artifact as text.
#[async_trait]
pub trait Disassembler: Send + Sync {
    async fn render(&self, artifact: &Path) -> Result<String>;
}

/// `objdump -d`, demangled.
#[derive(Debug, Clone)]
pub struct ObjdumpDisassembler {
    objdump: PathBuf,
}

impl ObjdumpDisassembler {
    pub fn new(objdump: impl Into<PathBuf>) -> Self {
        Self {
            objdump: objdump.into(),
        }
    }

    /// Find `objdump` on `PATH`.
    pub fn locate() -> Result<Self> {
        which::which("objdump")
            .map(Self::new)
            .map_err(|e| Error::Configuration(format!("objdump not found: {e}")))
    }
}

#[async_trait]
impl Disassembler for ObjdumpDisassembler {
    async fn render(&self, artifact: &Path) -> Result<String> {
        let output = Command::new(&self.objdump)
            .args(["-d", "-C", "--no-show-raw-insn"])
            .arg(artifact)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Process(format!("failed to run objdump: {e}")))?;

        if !output.status.success() {
            return Err(Error::Process(format!(
                "objdump failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
