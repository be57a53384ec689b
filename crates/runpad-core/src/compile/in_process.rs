//! In-process compile strategy for script-style snippets.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::library::LibraryRef;
use crate::restore::descriptor::framework_names;

use super::diagnostics::{Diagnostic, DiagnosticMapper};
use super::script::{RootInputs, SCRIPT_ROOT, render_script_root};
use super::{CompileContext, CompileOutcome, filter_disabled, read_loads};

/// A crate linked with `--extern name=path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternCrate {
    pub name: String,
    pub path: PathBuf,
}

/// Code generation options.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Target triple.
    pub target: String,
    pub opt_level: u8,
    pub crate_name: String,
    pub edition: String,
    /// Where the executable is written.
    pub output: PathBuf,
}

/// One compiler invocation.
#[derive(Debug, Clone)]
pub struct CompilerInput {
    /// Crate root, already written to disk.
    pub root: PathBuf,
    /// Generated lines preceding user line 1 in `root`.
    pub line_offset: u32,
    /// Generated module files reported under their original names.
    pub passthrough: Vec<(String, String)>,
    pub externs: Vec<ExternCrate>,
    pub search_paths: Vec<PathBuf>,
    pub options: CompilerOptions,
}

/// Diagnostics and artifact of one compiler invocation.
#[derive(Debug, Clone, Default)]
pub struct CompilerOutput {
    pub diagnostics: Vec<Diagnostic>,
    /// Set only when the compiler produced the output file.
    pub artifact: Option<PathBuf>,
}

/// The compiler service.
///
/// Dropping a returned future must stop the compilation.
#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(&self, input: &CompilerInput) -> Result<CompilerOutput>;
}

/// `rustc`, run as a child process with JSON diagnostics.
#[derive(Debug, Clone)]
pub struct RustcCompiler {
    rustc: PathBuf,
}

impl RustcCompiler {
    pub fn new(rustc: impl Into<PathBuf>) -> Self {
        Self {
            rustc: rustc.into(),
        }
    }

    fn command(&self, input: &CompilerInput) -> Command {
        let opts = &input.options;
        let mut cmd = Command::new(&self.rustc);
        cmd.arg("--edition")
            .arg(&opts.edition)
            .args(["--crate-type", "bin", "--crate-name"])
            .arg(&opts.crate_name)
            .arg("--error-format=json")
            .arg("--target")
            .arg(&opts.target)
            .arg("-C")
            .arg(format!("opt-level={}", opts.opt_level));

        for path in &input.search_paths {
            cmd.arg("-L").arg(format!("dependency={}", path.display()));
        }
        for ext in &input.externs {
            cmd.arg("--extern")
                .arg(format!("{}={}", ext.name, ext.path.display()));
        }

        cmd.arg("-o")
            .arg(&opts.output)
            .arg(&input.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Compiler for RustcCompiler {
    async fn compile(&self, input: &CompilerInput) -> Result<CompilerOutput> {
        let output = self.command(input).output().await.map_err(|e| {
            Error::Configuration(format!(
                "Failed to run rustc '{}': {}",
                self.rustc.display(),
                e
            ))
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let root_name = input
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| SCRIPT_ROOT.to_string());

        let mut mapper = DiagnosticMapper::new(root_name, input.line_offset);
        for (generated, original) in &input.passthrough {
            mapper.add_passthrough(generated, original);
        }
        let mut diagnostics = mapper.parse_rustc_output(&stderr);

        if !output.status.success() && !diagnostics.iter().any(Diagnostic::is_error) {
            // rustc failed without JSON output (e.g. unknown target).
            let raw = stderr.trim();
            diagnostics.push(
                Diagnostic::error(if raw.is_empty() {
                    "compilation failed".to_string()
                } else {
                    raw.to_string()
                })
                .with_code("compile"),
            );
        }

        let artifact = (output.status.success() && input.options.output.exists())
            .then(|| input.options.output.clone());

        Ok(CompilerOutput {
            diagnostics,
            artifact,
        })
    }
}

/// Compiles script-style snippets through a [`Compiler`].
#[derive(Clone)]
pub struct ScriptCompiler {
    compiler: Arc<dyn Compiler>,
    opt_level: u8,
}

impl ScriptCompiler {
    pub fn new(compiler: Arc<dyn Compiler>) -> Self {
        Self {
            compiler,
            opt_level: 0,
        }
    }

    pub fn with_opt_level(mut self, opt_level: u8) -> Self {
        self.opt_level = opt_level.min(3);
        self
    }

    /// Materialize the script root in the build directory and compile it.
    pub async fn compile(&self, ctx: &CompileContext<'_>) -> Result<CompileOutcome> {
        tokio::fs::create_dir_all(ctx.build_dir).await?;

        let modules = match read_loads(ctx.loads).await {
            Ok(modules) => modules,
            Err(diagnostic) => return Ok(CompileOutcome::failed(diagnostic)),
        };

        let mut passthrough = Vec::new();
        let mut module_names = Vec::new();
        for (name, original, text) in &modules {
            let file = format!("{name}.rs");
            tokio::fs::write(ctx.build_dir.join(&file), text).await?;
            passthrough.push((file, original.clone()));
            module_names.push(name.clone());
        }

        let frameworks: Vec<&str> = framework_names(ctx.libraries).collect();
        let root = render_script_root(RootInputs {
            source: ctx.source,
            frameworks: &frameworks,
            modules: &module_names,
            imports: ctx.imports,
        });
        let root_path = ctx.build_dir.join(SCRIPT_ROOT);
        tokio::fs::write(&root_path, &root.source).await?;

        let output = ctx
            .build_dir
            .join(ctx.platform.artifact_file_name("script"));
        if output.exists() {
            tokio::fs::remove_file(&output).await?;
        }

        let input = CompilerInput {
            root: root_path,
            line_offset: root.line_offset,
            passthrough,
            externs: direct_externs(ctx),
            search_paths: ctx.references.search_paths.clone(),
            options: CompilerOptions {
                target: ctx.platform.moniker.clone(),
                opt_level: if ctx.release { 3 } else { self.opt_level },
                crate_name: "script".to_string(),
                edition: "2021".to_string(),
                output,
            },
        };

        tracing::debug!(
            externs = input.externs.len(),
            offset = input.line_offset,
            "compiling script"
        );
        let result = self.compiler.compile(&input).await?;
        let diagnostics = filter_disabled(result.diagnostics, ctx.disabled_codes);
        let success = result.artifact.is_some() && !diagnostics.iter().any(Diagnostic::is_error);

        Ok(CompileOutcome {
            success,
            artifact: result.artifact.filter(|_| success),
            diagnostics,
        })
    }
}

/// `--extern` entries for the directly referenced crates.
fn direct_externs(ctx: &CompileContext<'_>) -> Vec<ExternCrate> {
    ctx.libraries
        .iter()
        .filter(|lib| !matches!(lib, LibraryRef::Framework { .. }))
        .filter_map(|lib| {
            let name = lib.crate_name();
            match ctx.references.find(&name) {
                Some(found) => Some(ExternCrate {
                    name,
                    path: found.path.clone(),
                }),
                None => {
                    tracing::debug!("No restored artifact for {}", lib);
                    None
                }
            }
        })
        .collect()
}
