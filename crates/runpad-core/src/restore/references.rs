//! Resolved references: the compiled artifacts a restore produced.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::descriptor::RESTORE_PACKAGE;

/// A compiled library artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedReference {
    /// Crate name as seen by the compiler.
    pub name: String,

    /// Path to the `.rlib` (or proc-macro dylib for analyzers).
    pub path: PathBuf,
}

/// Artifacts produced by restoring a library set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedReferences {
    /// Library artifacts, linked with `--extern`.
    pub references: Vec<ResolvedReference>,

    /// Proc-macro artifacts, loaded by the compiler.
    pub analyzers: Vec<ResolvedReference>,

    /// Directories searched for transitive dependencies.
    pub search_paths: Vec<PathBuf>,
}

impl ResolvedReferences {
    pub fn is_empty(&self) -> bool {
        self.references.is_empty() && self.analyzers.is_empty()
    }

    /// Find a library or analyzer artifact by crate name.
    pub fn find(&self, name: &str) -> Option<&ResolvedReference> {
        self.references
            .iter()
            .chain(self.analyzers.iter())
            .find(|r| r.name == name)
    }

    fn push_search_path(&mut self, path: &Path) {
        if let Some(dir) = path.parent()
            && !self.search_paths.iter().any(|p| p == dir)
        {
            self.search_paths.push(dir.to_path_buf());
        }
    }
}

#[derive(Debug, Deserialize)]
struct ArtifactMessage {
    reason: String,
    #[serde(default)]
    target: Option<ArtifactTarget>,
    #[serde(default)]
    filenames: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ArtifactTarget {
    name: String,
    #[serde(default)]
    kind: Vec<String>,
}

/// Collect artifacts from `cargo build --message-format=json` output.
///
/// The stub crate itself and build scripts are skipped. Non-JSON lines and
/// other message kinds are ignored.
pub fn parse_artifacts(stdout: &str) -> ResolvedReferences {
    let mut resolved = ResolvedReferences::default();

    for line in stdout.lines() {
        let line = line.trim();
        if !line.starts_with('{') {
            continue;
        }
        let Ok(msg) = serde_json::from_str::<ArtifactMessage>(line) else {
            tracing::debug!("Skipping unparsable cargo message");
            continue;
        };
        if msg.reason != "compiler-artifact" {
            continue;
        }
        let Some(target) = msg.target else { continue };
        if target.name == RESTORE_PACKAGE || target.kind.iter().any(|k| k == "custom-build") {
            continue;
        }

        let name = target.name.replace('-', "_");
        let is_proc_macro = target.kind.iter().any(|k| k == "proc-macro");

        for file in &msg.filenames {
            let ext = file.extension().and_then(|e| e.to_str()).unwrap_or_default();
            let entry = ResolvedReference {
                name: name.clone(),
                path: file.clone(),
            };
            if is_proc_macro && matches!(ext, "so" | "dylib" | "dll") {
                resolved.push_search_path(file);
                resolved.analyzers.push(entry);
            } else if !is_proc_macro && ext == "rlib" {
                resolved.push_search_path(file);
                resolved.references.push(entry);
            }
        }
    }

    resolved
}
