//! Compilation pipeline.
//!
//! Two interchangeable strategies turn a snippet into a runnable artifact:
//!
//! - [`ScriptCompiler`]: script-style snippets compiled directly by the
//!   compiler service (`rustc`), linked against restored references.
//! - [`ProgramBuilder`]: program-style snippets built by the external build
//!   tool (`cargo`), diagnostics read back from its log files.
//!
//! Both return a [`CompileOutcome`].

pub mod bootstrap;
pub mod build_tool;
pub mod diagnostics;
pub mod in_process;
pub mod out_of_process;
pub mod script;

pub use build_tool::{BuildInvocation, BuildTool, CargoBuildTool, RestoreInvocation, ToolOutput};
pub use diagnostics::{Diagnostic, DiagnosticMapper, Severity, parse_build_line, parse_build_logs};
pub use in_process::{
    Compiler, CompilerInput, CompilerOptions, CompilerOutput, ExternCrate, RustcCompiler,
    ScriptCompiler,
};
pub use out_of_process::ProgramBuilder;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::library::LibrarySet;
use crate::platform::ExecutionPlatform;
use crate::restore::ResolvedReferences;

/// Which strategy compiles a snippet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompileMode {
    /// Statements and items, run inside a generated `main`.
    #[default]
    Script,
    /// A complete crate root with its own `main`.
    Program,
}

/// Everything a strategy needs to compile one snippet.
#[derive(Debug, Clone, Copy)]
pub struct CompileContext<'a> {
    /// Raw user source, directives included.
    pub source: &'a str,
    /// Script files named by `#load` directives.
    pub loads: &'a [PathBuf],
    pub libraries: &'a LibrarySet,
    pub references: &'a ResolvedReferences,
    pub platform: &'a ExecutionPlatform,
    pub build_dir: &'a Path,
    pub imports: &'a [String],
    pub disabled_codes: &'a BTreeSet<String>,
    pub release: bool,
}

/// Result of one compile attempt.
#[derive(Debug, Clone, Default)]
pub struct CompileOutcome {
    pub success: bool,
    /// Path of the runnable artifact on success.
    pub artifact: Option<PathBuf>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileOutcome {
    /// A failed attempt with a single error.
    pub fn failed(diagnostic: Diagnostic) -> Self {
        Self {
            success: false,
            artifact: None,
            diagnostics: vec![diagnostic],
        }
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }
}

/// Drop diagnostics whose code is disabled. Errors are never dropped.
pub fn filter_disabled(
    diagnostics: Vec<Diagnostic>,
    disabled_codes: &BTreeSet<String>,
) -> Vec<Diagnostic> {
    diagnostics
        .into_iter()
        .filter(|d| {
            d.is_error()
                || d.code
                    .as_ref()
                    .is_none_or(|code| !disabled_codes.contains(code))
        })
        .collect()
}

/// Read loaded script files and give each a module name.
///
/// Returns `(module name, original file name, directive-free source)`.
pub(crate) async fn read_loads(
    loads: &[PathBuf],
) -> std::result::Result<Vec<(String, String, String)>, Diagnostic> {
    let mut modules: Vec<(String, String, String)> = Vec::new();
    for path in loads {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            Diagnostic::error(format!("cannot load '{}': {}", path.display(), e)).with_code("load")
        })?;

        let mut name = module_name(path);
        while modules.iter().any(|(existing, _, _)| *existing == name) {
            name.push('_');
        }
        let original = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.clone());
        modules.push((name, original, crate::inspect::strip_directives(&text)));
    }
    Ok(modules)
}

/// Identifier-safe module name from a file stem.
pub(crate) fn module_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut name: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "m_");
    }
    if matches!(name.as_str(), "main" | "crate" | "self" | "super" | "__runpad") {
        name.push_str("_mod");
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_disabled_keeps_errors() {
        let disabled: BTreeSet<String> = ["unused_variables".to_string(), "E0308".to_string()]
            .into_iter()
            .collect();
        let diags = vec![
            Diagnostic::warning("unused variable").with_code("unused_variables"),
            Diagnostic::warning("dead code").with_code("dead_code"),
            Diagnostic::error("mismatched types").with_code("E0308"),
            Diagnostic::warning("no code"),
        ];
        let kept = filter_disabled(diags, &disabled);
        assert_eq!(kept.len(), 3);
        assert!(kept.iter().all(|d| d.code.as_deref() != Some("unused_variables")));
    }

    #[test]
    fn test_module_names() {
        assert_eq!(module_name(Path::new("/a/Helpers.rs")), "helpers");
        assert_eq!(module_name(Path::new("/a/my-utils.rs")), "my_utils");
        assert_eq!(module_name(Path::new("/a/2d.rs")), "m_2d");
        assert_eq!(module_name(Path::new("/a/main.rs")), "main_mod");
    }

    #[tokio::test]
    async fn test_read_loads() {
        let dir = tempfile::TempDir::new().unwrap();
        let a = dir.path().join("util.rs");
        std::fs::write(&a, "#r \"crate: x\"\npub fn two() -> i32 { 2 }\n").unwrap();

        let modules = read_loads(std::slice::from_ref(&a)).await.unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].0, "util");
        assert_eq!(modules[0].1, "util.rs");
        assert!(modules[0].2.starts_with("\npub fn two()"));

        let missing = read_loads(&[dir.path().join("nope.rs")]).await.unwrap_err();
        assert_eq!(missing.code.as_deref(), Some("load"));
    }
}
