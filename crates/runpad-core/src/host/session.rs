//! Execution host: one logical session of restore, compile and run.
//!
//! Restores chain: each waits for its predecessor, resolves through the
//! [`RestoreCache`] without the run lock, and applies its result under the
//! run lock. Executes cancel and replace each other: a new execute
//! supersedes the running one, whose child is killed before the run lock is
//! released to the newcomer.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::task::JoinError;
use tracing::{Instrument, Span};

use crate::cancel::{CancelDomain, Ticket};
use crate::compile::{
    BuildTool, CargoBuildTool, CompileContext, CompileMode, CompileOutcome, Compiler, Diagnostic,
    ProgramBuilder, RustcCompiler, ScriptCompiler,
};
use crate::config::HostConfig;
use crate::disasm::Disassembler;
use crate::error::{Error, Result};
use crate::inspect::{DirectiveInspector, SyntaxInspector, resolve_directives};
use crate::library::LibrarySet;
use crate::paths::HostDirs;
use crate::platform::ExecutionPlatform;
use crate::process::{ChildProcess, InputHandle, ProcessSupervisor};
use crate::protocol::{Frame, FrameReader, ResultObject};
use crate::restore::{
    BuildCacheEntry, ResolvedReferences, Resolution, RestoreCache, build_descriptor,
    validate_libraries,
};
use crate::toolchain::Toolchain;

use super::events::{HostEvent, HostSink};

/// Host version mixed into restore cache keys.
pub const HOST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One run request.
#[derive(Debug, Clone, Default)]
pub struct ExecuteRequest {
    /// Snippet source, directives included.
    pub source: String,
    pub mode: CompileMode,
    pub release: bool,
    /// Emit a [`HostEvent::Disassembly`] before launching.
    pub disassemble: bool,
}

impl ExecuteRequest {
    pub fn script(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn program(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            mode: CompileMode::Program,
            ..Default::default()
        }
    }

    pub fn with_release(mut self, release: bool) -> Self {
        self.release = release;
        self
    }

    pub fn with_disassembly(mut self, disassemble: bool) -> Self {
        self.disassemble = disassemble;
        self
    }
}

/// How an execute request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The child exited; -1 when killed by a signal.
    Completed { exit_code: i32 },
    CompilationFailed,
    /// The last restore failed; nothing was compiled.
    RestoreFailed,
    ConfigurationFailed,
    ProtocolFailed,
    ProcessFailed,
    Cancelled,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed { exit_code: 0 })
    }
}

type RestoreChain = Shared<BoxFuture<'static, ()>>;

/// Mutable session state. Never held across an await.
struct SessionState {
    platform: ExecutionPlatform,
    name: String,
    dirs: HostDirs,
    libraries: LibrarySet,
    base_dir: Option<PathBuf>,
    references: ResolvedReferences,
    cache_entry: Option<BuildCacheEntry>,
    restore_errors: Vec<Diagnostic>,
}

/// What one execute sees of the session.
struct RunSnapshot {
    platform: ExecutionPlatform,
    dirs: HostDirs,
    libraries: LibrarySet,
    base_dir: Option<PathBuf>,
    references: ResolvedReferences,
    cache_entry: Option<BuildCacheEntry>,
    restore_errors: Vec<Diagnostic>,
}

struct HostInner {
    config: HostConfig,
    host_version: String,
    inspector: Arc<dyn SyntaxInspector>,
    cache: RestoreCache,
    scripts: ScriptCompiler,
    programs: ProgramBuilder,
    supervisor: ProcessSupervisor,
    disassembler: Option<Arc<dyn Disassembler>>,
    sink: Arc<dyn HostSink>,
    span: Span,

    state: Mutex<SessionState>,
    /// Guards compile, launch and stream; restores take it to apply results.
    run_lock: tokio::sync::Mutex<()>,
    executions: CancelDomain,
    restores: CancelDomain,
    chain: Mutex<RestoreChain>,
    /// Standard input of the live child, detached when none.
    input: Mutex<InputHandle>,
    running: AtomicBool,
}

/// Builder for [`ExecutionHost`].
pub struct HostBuilder {
    config: HostConfig,
    sink: Arc<dyn HostSink>,
    platform: Option<ExecutionPlatform>,
    compiler: Option<Arc<dyn Compiler>>,
    build_tool: Option<Arc<dyn BuildTool>>,
    inspector: Arc<dyn SyntaxInspector>,
    disassembler: Option<Arc<dyn Disassembler>>,
    supervisor: ProcessSupervisor,
    span: Option<Span>,
    name: String,
    host_version: String,
}

impl HostBuilder {
    pub fn new(config: HostConfig, sink: Arc<dyn HostSink>) -> Self {
        Self {
            config,
            sink,
            platform: None,
            compiler: None,
            build_tool: None,
            inspector: Arc::new(DirectiveInspector),
            disassembler: None,
            supervisor: ProcessSupervisor::new(),
            span: None,
            name: "session".to_string(),
            host_version: HOST_VERSION.to_string(),
        }
    }

    /// Use `rustc` and `cargo` from `toolchain`, and its host target unless
    /// a platform was set.
    pub fn toolchain(mut self, toolchain: &Toolchain) -> Self {
        self.compiler = Some(Arc::new(RustcCompiler::new(&toolchain.rustc)));
        self.build_tool = Some(Arc::new(
            CargoBuildTool::new(&toolchain.cargo).offline(self.config.offline),
        ));
        if self.platform.is_none() {
            self.platform = Some(ExecutionPlatform::native(toolchain));
        }
        self
    }

    pub fn platform(mut self, platform: ExecutionPlatform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn compiler(mut self, compiler: Arc<dyn Compiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn build_tool(mut self, tool: Arc<dyn BuildTool>) -> Self {
        self.build_tool = Some(tool);
        self
    }

    pub fn inspector(mut self, inspector: Arc<dyn SyntaxInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    pub fn disassembler(mut self, disassembler: Arc<dyn Disassembler>) -> Self {
        self.disassembler = Some(disassembler);
        self
    }

    pub fn supervisor(mut self, supervisor: ProcessSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// Span every host task is instrumented with.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn host_version(mut self, version: impl Into<String>) -> Self {
        self.host_version = version.into();
        self
    }

    /// # Errors
    /// A missing platform, compiler or build tool is a configuration error;
    /// so is a build root that cannot be created.
    pub fn build(self) -> Result<ExecutionHost> {
        let platform = self
            .platform
            .ok_or_else(|| Error::Configuration("no execution platform configured".to_string()))?;
        let compiler = self
            .compiler
            .ok_or_else(|| Error::Configuration("no compiler configured".to_string()))?;
        let tool = self
            .build_tool
            .ok_or_else(|| Error::Configuration("no build tool configured".to_string()))?;

        let dirs = HostDirs::new(&self.config.build_root, &self.config.cache_root, &self.name)
            .map_err(|e| Error::Configuration(format!("unusable build directory: {e}")))?;
        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("host", name = %self.name));

        tracing::debug!(
            parent: &span,
            platform = %platform,
            build_dir = %dirs.build_dir.display(),
            "host created"
        );

        let inner = HostInner {
            cache: RestoreCache::new(&self.config.cache_root, Arc::clone(&tool)),
            scripts: ScriptCompiler::new(compiler).with_opt_level(self.config.opt_level),
            programs: ProgramBuilder::new(tool),
            config: self.config,
            host_version: self.host_version,
            inspector: self.inspector,
            supervisor: self.supervisor,
            disassembler: self.disassembler,
            sink: self.sink,
            span,
            state: Mutex::new(SessionState {
                platform,
                name: self.name,
                dirs,
                libraries: LibrarySet::new(),
                base_dir: None,
                references: ResolvedReferences::default(),
                cache_entry: None,
                restore_errors: Vec::new(),
            }),
            run_lock: tokio::sync::Mutex::new(()),
            executions: CancelDomain::new(),
            restores: CancelDomain::new(),
            chain: Mutex::new(futures::future::ready(()).boxed().shared()),
            input: Mutex::new(InputHandle::detached()),
            running: AtomicBool::new(false),
        };

        Ok(ExecutionHost {
            inner: Arc::new(inner),
        })
    }
}

/// Orchestrates restore, compile and run for one session.
///
/// Methods that schedule a restore spawn onto the current tokio runtime and
/// must be called from within one.
#[derive(Clone)]
pub struct ExecutionHost {
    inner: Arc<HostInner>,
}

impl ExecutionHost {
    /// Extract directives from `source`, store the library set and schedule
    /// a restore. Relative paths resolve against `base_dir`.
    pub fn update_references(&self, source: &str, base_dir: Option<&Path>) {
        let directives = self.inner.inspector.extract_directives(source);
        let refs = resolve_directives(&directives, base_dir);
        tracing::debug!(
            parent: &self.inner.span,
            libraries = refs.libraries.len(),
            loads = refs.loads.len(),
            "references updated"
        );
        {
            let mut state = self.inner.state();
            state.libraries = refs.libraries;
            state.base_dir = base_dir.map(Path::to_path_buf);
        }
        self.schedule_restore();
    }

    /// Replace the library set and schedule a restore.
    pub fn set_libraries(&self, libraries: LibrarySet) {
        self.inner.state().libraries = libraries;
        self.schedule_restore();
    }

    /// Stop any run, clear the build directory, switch platform and
    /// schedule a restore.
    pub async fn set_platform(&self, platform: ExecutionPlatform) {
        self.inner.executions.cancel();
        {
            let _guard = self.inner.run_lock.lock().await;
            let mut state = self.inner.state();
            tracing::info!(parent: &self.inner.span, "Switching platform to {}", platform);
            state.platform = platform;
            if let Err(e) = state.dirs.clean_build() {
                tracing::warn!(parent: &self.inner.span, "Failed to clear build directory: {}", e);
            }
        }
        self.schedule_restore();
    }

    /// Change the session name (and with it the build directory) and
    /// schedule a restore.
    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        let config = &self.inner.config;
        let dirs = HostDirs::layout(&config.build_root, &config.cache_root, &name);
        {
            let mut state = self.inner.state();
            state.dirs = dirs;
            state.name = name;
        }
        self.schedule_restore();
    }

    /// Compile and run a snippet, streaming its output as events.
    ///
    /// Supersedes any execute in flight.
    pub async fn execute(&self, request: ExecuteRequest) -> RunOutcome {
        let ticket = self.inner.executions.supersede();
        let span = self.inner.span.clone();
        let outcome = Arc::clone(&self.inner)
            .run(request, ticket)
            .instrument(span)
            .await;
        tracing::debug!(parent: &self.inner.span, ?outcome, "execute finished");
        outcome
    }

    /// Forward a line to the running child. Dropped when nothing runs.
    pub async fn send_input(&self, line: &str) {
        let input = self.inner.input().clone();
        input.write_line(line).await;
    }

    /// Cancel the execute in flight, if any.
    pub fn cancel(&self) {
        self.inner.executions.cancel();
    }

    /// Cancel, wait for teardown and clear the build directory.
    pub async fn terminate(&self) {
        self.cancel();
        let _guard = self.inner.run_lock.lock().await;
        let dirs = self.inner.state().dirs.clone();
        if let Err(e) = dirs.clean_build() {
            tracing::warn!(parent: &self.inner.span, "Failed to clear build directory: {}", e);
        }
    }

    /// Wait until every scheduled restore has been applied or skipped.
    pub async fn restore_idle(&self) {
        let chain = self.inner.chain().clone();
        chain.await;
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// References of the last successful restore.
    pub fn references(&self) -> ResolvedReferences {
        self.inner.state().references.clone()
    }

    /// Errors of the last restore; empty after a success.
    pub fn restore_errors(&self) -> Vec<Diagnostic> {
        self.inner.state().restore_errors.clone()
    }

    pub fn libraries(&self) -> LibrarySet {
        self.inner.state().libraries.clone()
    }

    pub fn platform(&self) -> ExecutionPlatform {
        self.inner.state().platform.clone()
    }

    pub fn name(&self) -> String {
        self.inner.state().name.clone()
    }

    pub fn build_dir(&self) -> PathBuf {
        self.inner.state().dirs.build_dir.clone()
    }

    fn schedule_restore(&self) {
        let ticket = self.inner.restores.supersede();
        let inner = Arc::clone(&self.inner);
        let span = self.inner.span.clone();

        let mut chain = self.inner.chain();
        let previous = chain.clone();
        let task = tokio::spawn(
            async move {
                previous.await;
                if !ticket.is_current() {
                    tracing::debug!(
                        generation = ticket.generation(),
                        "restore superseded, skipping"
                    );
                    return;
                }
                let restore = Arc::clone(&inner).restore(ticket.clone());
                let body = tokio::spawn(restore.in_current_span());
                if let Err(e) = body.await {
                    inner.restore_panicked(&ticket, e).await;
                }
            }
            .instrument(span),
        );
        *chain = async move {
            let _ = task.await;
        }
        .boxed()
        .shared();
    }
}

impl HostInner {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn chain(&self) -> MutexGuard<'_, RestoreChain> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn input(&self) -> MutexGuard<'_, InputHandle> {
        self.input.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> RunSnapshot {
        let state = self.state();
        RunSnapshot {
            platform: state.platform.clone(),
            dirs: state.dirs.clone(),
            libraries: state.libraries.clone(),
            base_dir: state.base_dir.clone(),
            references: state.references.clone(),
            cache_entry: state.cache_entry.clone(),
            restore_errors: state.restore_errors.clone(),
        }
    }

    async fn emit_current(&self, ticket: &Ticket, event: HostEvent) {
        if ticket.is_current() {
            self.sink.emit(event).await;
        }
    }

    // ---- restore ----

    async fn restore(self: Arc<Self>, ticket: Ticket) {
        let (libraries, platform) = {
            let state = self.state();
            (state.libraries.clone(), state.platform.clone())
        };

        let result = self.resolve(&libraries, &platform, &ticket).await;

        let _guard = self.run_lock.lock().await;
        if !ticket.is_current() {
            tracing::debug!("restore superseded, discarding result");
            return;
        }

        let event = match result {
            Ok((resolution, warnings)) => {
                let reference_count = resolution.references.references.len();
                let cache_hit = resolution.cache_hit;
                let mut state = self.state();
                state.references = resolution.references;
                state.cache_entry = resolution.entry;
                state.restore_errors.clear();
                HostEvent::RestoreCompleted {
                    errors: Vec::new(),
                    warnings,
                    cache_hit,
                    reference_count,
                }
            }
            Err(Error::Cancelled) => return,
            Err(e) => {
                let errors = restore_error_list(e);
                tracing::info!("Restore failed with {} error(s)", errors.len());
                self.apply_restore_failure(errors.clone());
                HostEvent::RestoreCompleted {
                    errors,
                    warnings: Vec::new(),
                    cache_hit: false,
                    reference_count: 0,
                }
            }
        };
        self.sink.emit(event).await;
    }

    async fn resolve(
        &self,
        libraries: &LibrarySet,
        platform: &ExecutionPlatform,
        ticket: &Ticket,
    ) -> Result<(Resolution, Vec<Diagnostic>)> {
        let (valid, warnings) =
            validate_libraries(libraries, self.config.strict_file_references)?;
        let descriptor = build_descriptor(&valid, &platform.moniker, &self.config.imports);
        let resolution = self
            .cache
            .resolve(&descriptor, platform, &self.host_version, ticket)
            .await?;
        Ok((resolution, warnings))
    }

    async fn restore_panicked(&self, ticket: &Ticket, error: JoinError) {
        tracing::error!("Restore task failed: {}", error);
        let _guard = self.run_lock.lock().await;
        if !ticket.is_current() {
            return;
        }
        let errors =
            vec![Diagnostic::error(format!("restore task failed: {error}")).with_code("restore")];
        self.apply_restore_failure(errors.clone());
        self.sink
            .emit(HostEvent::RestoreCompleted {
                errors,
                warnings: Vec::new(),
                cache_hit: false,
                reference_count: 0,
            })
            .await;
    }

    fn apply_restore_failure(&self, errors: Vec<Diagnostic>) {
        let mut state = self.state();
        state.references = ResolvedReferences::default();
        state.cache_entry = None;
        state.restore_errors = errors;
    }

    // ---- execute ----

    async fn run(self: Arc<Self>, request: ExecuteRequest, ticket: Ticket) -> RunOutcome {
        let chain = self.chain().clone();
        tokio::select! {
            biased;
            _ = ticket.cancelled() => return RunOutcome::Cancelled,
            _ = chain => {}
        }

        let _guard = tokio::select! {
            biased;
            _ = ticket.cancelled() => return RunOutcome::Cancelled,
            guard = self.run_lock.lock() => guard,
        };
        if !ticket.is_current() {
            return RunOutcome::Cancelled;
        }

        let snapshot = self.snapshot();
        if !snapshot.restore_errors.is_empty() {
            tracing::debug!("last restore failed, not compiling");
            return RunOutcome::RestoreFailed;
        }

        if let Err(e) = snapshot.platform.validate() {
            self.emit_configuration_error(&ticket, &e).await;
            return RunOutcome::ConfigurationFailed;
        }

        let compiled = match self.compile(&request, &snapshot, &ticket).await {
            Ok(compiled) => compiled,
            Err(Error::Cancelled) => return RunOutcome::Cancelled,
            Err(e @ Error::Configuration(_)) => {
                self.emit_configuration_error(&ticket, &e).await;
                return RunOutcome::ConfigurationFailed;
            }
            Err(e) => {
                tracing::warn!("Compilation could not run: {}", e);
                let diagnostic = Diagnostic::error(e.to_string()).with_code("compile");
                self.emit_current(
                    &ticket,
                    HostEvent::Diagnostics {
                        diagnostics: vec![diagnostic],
                    },
                )
                .await;
                return RunOutcome::CompilationFailed;
            }
        };

        tracing::info!(
            success = compiled.success,
            errors = compiled.error_count(),
            "compiled"
        );
        self.emit_current(
            &ticket,
            HostEvent::Diagnostics {
                diagnostics: compiled.diagnostics.clone(),
            },
        )
        .await;

        let Some(artifact) = compiled.artifact.filter(|_| compiled.success) else {
            return RunOutcome::CompilationFailed;
        };
        if !ticket.is_current() {
            return RunOutcome::Cancelled;
        }

        if request.disassemble {
            self.disassemble(&artifact, &ticket).await;
        }

        let child = match self
            .supervisor
            .launch(&artifact, &snapshot.platform, &snapshot.dirs.build_dir)
        {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!("Failed to launch {}: {}", artifact.display(), e);
                self.emit_current(
                    &ticket,
                    HostEvent::RunFailed {
                        message: e.to_string(),
                    },
                )
                .await;
                return match e {
                    Error::Configuration(_) => RunOutcome::ConfigurationFailed,
                    _ => RunOutcome::ProcessFailed,
                };
            }
        };

        self.supervise(child, &ticket).await
    }

    async fn compile(
        &self,
        request: &ExecuteRequest,
        snapshot: &RunSnapshot,
        ticket: &Ticket,
    ) -> Result<CompileOutcome> {
        tokio::fs::create_dir_all(&snapshot.dirs.build_dir).await?;

        let directives = self.inspector.extract_directives(&request.source);
        let loads = resolve_directives(&directives, snapshot.base_dir.as_deref()).loads;

        let ctx = CompileContext {
            source: &request.source,
            loads: &loads,
            libraries: &snapshot.libraries,
            references: &snapshot.references,
            platform: &snapshot.platform,
            build_dir: &snapshot.dirs.build_dir,
            imports: &self.config.imports,
            disabled_codes: &self.config.disabled_codes,
            release: request.release,
        };

        let compile = async {
            match request.mode {
                CompileMode::Script => self.scripts.compile(&ctx).await,
                CompileMode::Program => {
                    let target_dir = if self.config.cache_program_builds {
                        snapshot.cache_entry.as_ref().map(BuildCacheEntry::target_dir)
                    } else {
                        None
                    };
                    self.programs.compile(&ctx, target_dir).await
                }
            }
        };

        tokio::select! {
            biased;
            _ = ticket.cancelled() => Err(Error::Cancelled),
            outcome = compile => outcome,
        }
    }

    async fn emit_configuration_error(&self, ticket: &Ticket, error: &Error) {
        tracing::warn!("{}", error);
        let diagnostic = Diagnostic::error(error.to_string()).with_code("config");
        self.emit_current(
            ticket,
            HostEvent::Diagnostics {
                diagnostics: vec![diagnostic],
            },
        )
        .await;
    }

    async fn disassemble(&self, artifact: &Path, ticket: &Ticket) {
        let Some(disassembler) = &self.disassembler else {
            tracing::debug!("no disassembler configured");
            return;
        };
        match disassembler.render(artifact).await {
            Ok(text) => self.emit_current(ticket, HostEvent::Disassembly { text }).await,
            Err(e) => tracing::warn!("Disassembly failed: {}", e),
        }
    }

    async fn supervise(&self, mut child: ChildProcess, ticket: &Ticket) -> RunOutcome {
        let (Some(stdout), Some(stderr)) = (child.take_stdout(), child.take_stderr()) else {
            tracing::warn!("child streams unavailable");
            child.kill().await;
            return RunOutcome::ProcessFailed;
        };

        *self.input() = child.input();
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(pid = ?child.pid(), "run started");

        let outcome = self.stream(&mut child, stdout, stderr, ticket).await;

        *self.input() = InputHandle::detached();
        self.running.store(false, Ordering::SeqCst);
        outcome
    }

    async fn stream(
        &self,
        child: &mut ChildProcess,
        stdout: ChildStdout,
        stderr: ChildStderr,
        ticket: &Ticket,
    ) -> RunOutcome {
        let mut frames = FrameReader::new(stdout);
        let mut errors = FrameReader::new(stderr);
        let mut stdout_open = true;
        let mut stderr_open = true;

        let failure = loop {
            if !stdout_open && !stderr_open {
                break None;
            }
            tokio::select! {
                biased;
                _ = ticket.cancelled() => break Some(Error::Cancelled),
                frame = frames.next_frame(), if stdout_open => match frame {
                    Ok(Some(frame)) => self.dispatch(frame, ticket).await,
                    Ok(None) => stdout_open = false,
                    Err(e @ Error::Protocol(_)) => break Some(e),
                    Err(e) => {
                        tracing::debug!("stdout closed: {}", e);
                        stdout_open = false;
                    }
                },
                line = errors.next_text_line(), if stderr_open => match line {
                    Ok(Some(line)) => {
                        let record = ResultObject::text(line);
                        self.emit_current(ticket, HostEvent::Dumped { record }).await;
                    }
                    Ok(None) | Err(_) => stderr_open = false,
                },
            }
        };

        match failure {
            Some(Error::Cancelled) => {
                child.kill().await;
                tracing::info!("run cancelled");
                RunOutcome::Cancelled
            }
            Some(e) => {
                tracing::warn!("{}", e);
                child.kill().await;
                self.emit_current(
                    ticket,
                    HostEvent::RunFailed {
                        message: e.to_string(),
                    },
                )
                .await;
                RunOutcome::ProtocolFailed
            }
            None => {
                let waited = tokio::select! {
                    biased;
                    _ = ticket.cancelled() => None,
                    status = child.wait() => Some(status),
                };
                match waited {
                    None => {
                        child.kill().await;
                        RunOutcome::Cancelled
                    }
                    Some(Ok(exit_code)) => {
                        tracing::info!(exit_code, "run finished");
                        RunOutcome::Completed { exit_code }
                    }
                    Some(Err(e)) => {
                        tracing::warn!("{}", e);
                        RunOutcome::ProcessFailed
                    }
                }
            }
        }
    }

    async fn dispatch(&self, frame: Frame, ticket: &Ticket) {
        tracing::trace!(?frame, "frame");
        let event = match frame {
            Frame::InputRequest => HostEvent::InputRequested,
            Frame::Dumped(record) => HostEvent::Dumped { record },
            Frame::Exception(exception) => HostEvent::Exception { exception },
            Frame::Progress(progress) => HostEvent::Progress { progress },
        };
        self.emit_current(ticket, event).await;
    }
}

/// Error list for a failed restore.
fn restore_error_list(error: Error) -> Vec<Diagnostic> {
    match error {
        Error::Restore(errors) if !errors.is_empty() => errors,
        other => vec![Diagnostic::error(other.to_string()).with_code("restore")],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_error_list() {
        let listed = restore_error_list(Error::Restore(vec![
            Diagnostic::error("a").with_code("E0463"),
            Diagnostic::error("b"),
        ]));
        assert_eq!(listed.len(), 2);

        let io = restore_error_list(Error::Io(std::io::Error::other("disk full")));
        assert_eq!(io.len(), 1);
        assert_eq!(io[0].code.as_deref(), Some("restore"));
        assert!(io[0].message.contains("disk full"));

        let empty = restore_error_list(Error::Restore(Vec::new()));
        assert_eq!(empty.len(), 1);
    }

    #[test]
    fn test_request_builders() {
        let request = ExecuteRequest::program("fn main() {}")
            .with_release(true)
            .with_disassembly(true);
        assert_eq!(request.mode, CompileMode::Program);
        assert!(request.release && request.disassemble);
        assert_eq!(ExecuteRequest::script("1").mode, CompileMode::Script);
    }

    #[test]
    fn test_outcome_success() {
        assert!(RunOutcome::Completed { exit_code: 0 }.is_success());
        assert!(!RunOutcome::Completed { exit_code: 1 }.is_success());
        assert!(!RunOutcome::Cancelled.is_success());
    }
}
