//! Out-of-process compile strategy for program-style snippets.
//!
//! The snippet becomes a small cargo project in the build directory:
//!
//! ```text
//! <build_dir>/
//! ├── Cargo.toml
//! ├── build.warnings.log
//! ├── build.errors.log
//! └── src/
//!     ├── main.rs        # user source, directives blanked
//!     ├── __runpad.rs    # bootstrap
//!     └── <module>.rs    # one per #load
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::restore::descriptor::{
    ManifestConfig, ReleaseProfile, framework_names, generate_cargo_toml,
};

use super::bootstrap;
use super::build_tool::{BuildInvocation, BuildTool};
use super::diagnostics::{Diagnostic, SCRIPT_FILE, parse_build_logs, truncate};
use super::script::{RootInputs, render_program_main};
use super::{CompileContext, CompileOutcome, filter_disabled, read_loads};

/// Package and binary name of generated programs.
pub const PROGRAM_PACKAGE: &str = "runpad_program";

pub const WARNINGS_LOG: &str = "build.warnings.log";
pub const ERRORS_LOG: &str = "build.errors.log";

/// Builds program-style snippets through a [`BuildTool`].
#[derive(Clone)]
pub struct ProgramBuilder {
    tool: Arc<dyn BuildTool>,
}

impl ProgramBuilder {
    pub fn new(tool: Arc<dyn BuildTool>) -> Self {
        Self { tool }
    }

    /// Materialize the program project and build it.
    ///
    /// `cache_target_dir` overrides the cargo target directory, letting the
    /// build reuse dependencies compiled by a restore.
    pub async fn compile(
        &self,
        ctx: &CompileContext<'_>,
        cache_target_dir: Option<PathBuf>,
    ) -> Result<CompileOutcome> {
        let src_dir = ctx.build_dir.join("src");
        tokio::fs::create_dir_all(&src_dir).await?;

        let modules = match read_loads(ctx.loads).await {
            Ok(modules) => modules,
            Err(diagnostic) => return Ok(CompileOutcome::failed(diagnostic)),
        };

        let mut renames = vec![("src/main.rs".to_string(), SCRIPT_FILE.to_string())];
        let mut module_names = Vec::new();
        for (name, original, text) in &modules {
            tokio::fs::write(src_dir.join(format!("{name}.rs")), text).await?;
            renames.push((format!("src/{name}.rs"), original.clone()));
            module_names.push(name.clone());
        }

        let manifest = generate_cargo_toml(
            &ManifestConfig {
                name: PROGRAM_PACKAGE,
                release_profile: Some(ReleaseProfile::default()),
                standalone_workspace: true,
                ..Default::default()
            },
            ctx.libraries,
        );
        tokio::fs::write(ctx.build_dir.join("Cargo.toml"), manifest).await?;

        let frameworks: Vec<&str> = framework_names(ctx.libraries).collect();
        let main = render_program_main(RootInputs {
            source: ctx.source,
            frameworks: &frameworks,
            modules: &module_names,
            imports: ctx.imports,
        });
        tokio::fs::write(src_dir.join("main.rs"), &main.source).await?;

        let mut runtime = String::from("#![allow(dead_code, unused_macros, unused_imports)]\n");
        runtime.push_str(&bootstrap::module_body(main.line_offset, "main.rs"));
        tokio::fs::write(
            src_dir.join(format!("{}.rs", bootstrap::MODULE_NAME)),
            runtime,
        )
        .await?;

        let target_dir = cache_target_dir.unwrap_or_else(|| ctx.build_dir.join("target"));
        let profile = if ctx.release { "release" } else { "debug" };
        let artifact = target_dir
            .join(&ctx.platform.moniker)
            .join(profile)
            .join(ctx.platform.artifact_file_name(PROGRAM_PACKAGE));
        if artifact.exists() {
            tokio::fs::remove_file(&artifact).await?;
        }

        let invocation = BuildInvocation {
            project_dir: ctx.build_dir.to_path_buf(),
            target_dir,
            target: ctx.platform.moniker.clone(),
            release: ctx.release,
            warnings_log: ctx.build_dir.join(WARNINGS_LOG),
            errors_log: ctx.build_dir.join(ERRORS_LOG),
        };

        tracing::debug!(target_dir = %invocation.target_dir.display(), "building program");
        let output = self.tool.build(&invocation).await?;

        let warnings = tokio::fs::read_to_string(&invocation.warnings_log)
            .await
            .unwrap_or_default();
        let errors = tokio::fs::read_to_string(&invocation.errors_log)
            .await
            .unwrap_or_default();

        let mut diagnostics: Vec<Diagnostic> = parse_build_logs(&warnings, &errors)
            .into_iter()
            .filter(|d| !is_bootstrap_file(d))
            .map(|mut d| {
                if let Some(file) = &d.file
                    && let Some((_, original)) = renames.iter().find(|(g, _)| g == file)
                {
                    d.file = Some(original.clone());
                }
                d
            })
            .collect();

        if !output.success() && diagnostics.is_empty() {
            let raw = output.stderr.trim();
            diagnostics.push(
                Diagnostic::error(format!("build failed: {}", truncate(raw, 4000)))
                    .with_code("build"),
            );
        }

        let diagnostics = filter_disabled(diagnostics, ctx.disabled_codes);
        let success = output.success()
            && !diagnostics.iter().any(Diagnostic::is_error)
            && artifact.exists();

        Ok(CompileOutcome {
            success,
            artifact: success.then_some(artifact),
            diagnostics,
        })
    }
}

/// Warnings raised inside the generated bootstrap are never the user's.
fn is_bootstrap_file(d: &Diagnostic) -> bool {
    !d.is_error()
        && d.file
            .as_deref()
            .is_some_and(|f| f.ends_with(&format!("{}.rs", bootstrap::MODULE_NAME)))
}
