//! End-to-end tests of the execution host with a fake compiler.
//!
//! The fake compiler turns `// sh: ` comment lines of the snippet into a
//! shell script artifact, so runs exercise real child processes speaking
//! the frame protocol without needing a Rust toolchain.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use runpad_core::compile::{
    BuildInvocation, BuildTool, CompilerInput, CompilerOutput, RestoreInvocation, ToolOutput,
};
use runpad_core::{
    Compiler, Diagnostic, ExecuteRequest, ExecutionHost, ExecutionPlatform, HostBuilder,
    HostConfig, HostEvent, HostSink, LibraryRef, LibrarySet, RunOutcome,
};

const SH_PREFIX: &str = "// sh: ";

/// Writes the snippet's `// sh: ` lines as an executable shell script.
/// A `// fail` line produces a compile error instead.
struct ShellCompiler;

#[async_trait]
impl Compiler for ShellCompiler {
    async fn compile(&self, input: &CompilerInput) -> runpad_core::Result<CompilerOutput> {
        let root = std::fs::read_to_string(&input.root)?;
        if root.lines().any(|l| l.trim() == "// fail") {
            return Ok(CompilerOutput {
                diagnostics: vec![Diagnostic::error("expected `;`").with_code("E0001").at(1, 1)],
                artifact: None,
            });
        }

        let mut script = String::from("#!/bin/sh\n");
        for line in root.lines() {
            if let Some(cmd) = line.trim_start().strip_prefix(SH_PREFIX) {
                script.push_str(cmd);
                script.push('\n');
            }
        }
        let output = &input.options.output;
        std::fs::write(output, script)?;
        std::fs::set_permissions(output, std::fs::Permissions::from_mode(0o755))?;

        Ok(CompilerOutput {
            diagnostics: vec![
                Diagnostic::warning("unused variable: `x`").with_code("unused_variables"),
            ],
            artifact: Some(output.clone()),
        })
    }
}

/// Restores succeed with no artifacts unless the set names `panics`.
struct FakeBuildTool {
    restores: AtomicUsize,
}

#[async_trait]
impl BuildTool for FakeBuildTool {
    async fn restore(&self, invocation: &RestoreInvocation) -> runpad_core::Result<ToolOutput> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        let manifest = std::fs::read_to_string(invocation.project_dir.join("Cargo.toml"))?;
        if manifest.contains("panics") {
            panic!("build tool crashed");
        }
        Ok(ToolOutput {
            exit_code: 0,
            stdout: r#"{"reason":"build-finished","success":true}"#.to_string(),
            stderr: String::new(),
        })
    }

    async fn build(&self, _invocation: &BuildInvocation) -> runpad_core::Result<ToolOutput> {
        unreachable!("host tests run scripts only")
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<HostEvent>>,
}

#[async_trait]
impl HostSink for RecordingSink {
    async fn emit(&self, event: HostEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl RecordingSink {
    fn events(&self) -> Vec<HostEvent> {
        self.events.lock().unwrap().clone()
    }

    fn dumped_values(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                HostEvent::Dumped { record } => record.value,
                _ => None,
            })
            .collect()
    }

    fn diagnostics_events(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, HostEvent::Diagnostics { .. }))
            .count()
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    host: ExecutionHost,
    sink: Arc<RecordingSink>,
    tool: Arc<FakeBuildTool>,
}

fn platform() -> ExecutionPlatform {
    ExecutionPlatform::for_target("x86_64-unknown-linux-gnu", None)
}

fn harness() -> Harness {
    let dir = tempfile::TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::default());
    let tool = Arc::new(FakeBuildTool {
        restores: AtomicUsize::new(0),
    });
    let host = HostBuilder::new(HostConfig::rooted_at(dir.path()), sink.clone())
        .platform(platform())
        .compiler(Arc::new(ShellCompiler))
        .build_tool(tool.clone())
        .name("test")
        .build()
        .unwrap();
    Harness {
        _dir: dir,
        host,
        sink,
        tool,
    }
}

/// Poll `condition` until it holds, failing after five seconds.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn spawn_execute(host: &ExecutionHost, source: &str) -> tokio::task::JoinHandle<RunOutcome> {
    let host = host.clone();
    let request = ExecuteRequest::script(source);
    tokio::spawn(async move { host.execute(request).await })
}

const LOOPING: &str = r#"// sh: echo "o:{\"value\":\"pid $$\"}"
// sh: while true; do echo 'o:{"value":"a"}'; sleep 0.02; done
"#;

const FINITE: &str = r#"// sh: echo 'o:{"value":"b","lineNumber":1}'
// sh: echo oops >&2
"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_runs_script_and_streams_frames() {
    let h = harness();

    let outcome = h.host.execute(ExecuteRequest::script(FINITE)).await;

    assert_eq!(outcome, RunOutcome::Completed { exit_code: 0 });
    let values = h.sink.dumped_values();
    assert!(values.contains(&"b".to_string()));
    // Standard error arrives as plain text records.
    assert!(values.contains(&"oops".to_string()));
    assert_eq!(h.sink.diagnostics_events(), 1);
    assert!(!h.host.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_new_execute_cancels_and_replaces_running_one() {
    let h = harness();

    let first = spawn_execute(&h.host, LOOPING);
    wait_until(|| h.sink.dumped_values().iter().any(|v| v == "a")).await;
    let pid: libc::pid_t = h
        .sink
        .dumped_values()
        .iter()
        .find_map(|v| v.strip_prefix("pid ").map(|p| p.parse().unwrap()))
        .unwrap();

    let second = h.host.execute(ExecuteRequest::script(FINITE)).await;
    let first = first.await.unwrap();

    assert_eq!(first, RunOutcome::Cancelled);
    assert_eq!(second, RunOutcome::Completed { exit_code: 0 });

    // The first child is gone before the second compiled.
    assert_ne!(unsafe { libc::kill(pid, 0) }, 0);

    // Nothing from the first run is reported after the second started.
    let events = h.sink.events();
    let second_start = events
        .iter()
        .rposition(|e| matches!(e, HostEvent::Diagnostics { .. }))
        .unwrap();
    assert!(events[second_start..].iter().all(|e| !matches!(
        e,
        HostEvent::Dumped { record } if record.value.as_deref() == Some("a")
    )));
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, HostEvent::RunFailed { .. }))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_during_run() {
    let h = harness();

    let run = spawn_execute(&h.host, LOOPING);
    wait_until(|| h.host.is_running()).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.host.cancel();

    assert_eq!(run.await.unwrap(), RunOutcome::Cancelled);
    assert!(!h.host.is_running());
    assert!(
        !h.sink
            .events()
            .iter()
            .any(|e| matches!(e, HostEvent::RunFailed { .. }))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_input_reaches_child() {
    let h = harness();
    let source = r#"// sh: echo 'i:'
// sh: read line
// sh: echo "o:{\"value\":\"got $line\"}"
"#;

    let run = spawn_execute(&h.host, source);
    wait_until(|| {
        h.sink
            .events()
            .iter()
            .any(|e| matches!(e, HostEvent::InputRequested))
    })
    .await;
    h.host.send_input("hello").await;

    assert_eq!(run.await.unwrap(), RunOutcome::Completed { exit_code: 0 });
    assert!(h.sink.dumped_values().contains(&"got hello".to_string()));

    // Writes after the child exited are dropped.
    h.host.send_input("late").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_frame_fails_the_run() {
    let h = harness();

    let outcome = h
        .host
        .execute(ExecuteRequest::script(
            "// sh: echo 'not a frame'\n// sh: sleep 5\n",
        ))
        .await;

    assert_eq!(outcome, RunOutcome::ProtocolFailed);
    assert!(
        h.sink
            .events()
            .iter()
            .any(|e| matches!(e, HostEvent::RunFailed { .. }))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_compile_failure_reports_diagnostics_once() {
    let h = harness();

    let outcome = h.host.execute(ExecuteRequest::script("// fail\n")).await;

    assert_eq!(outcome, RunOutcome::CompilationFailed);
    let diagnostics: Vec<Vec<Diagnostic>> = h
        .sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            HostEvent::Diagnostics { diagnostics } => Some(diagnostics),
            _ => None,
        })
        .collect();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].len(), 1);
    assert_eq!(diagnostics[0][0].code.as_deref(), Some("E0001"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disabled_codes_are_filtered() {
    let dir = tempfile::TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::default());
    let host = HostBuilder::new(
        HostConfig::rooted_at(dir.path()).with_disabled_codes(["unused_variables"]),
        sink.clone(),
    )
    .platform(platform())
    .compiler(Arc::new(ShellCompiler))
    .build_tool(Arc::new(FakeBuildTool {
        restores: AtomicUsize::new(0),
    }))
    .build()
    .unwrap();

    let outcome = host.execute(ExecuteRequest::script(FINITE)).await;

    assert!(outcome.is_success());
    assert!(sink.events().iter().any(
        |e| matches!(e, HostEvent::Diagnostics { diagnostics } if diagnostics.is_empty())
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_platform_change_clears_build_dir() {
    let h = harness();
    assert!(h.host.execute(ExecuteRequest::script(FINITE)).await.is_success());
    let build_dir = h.host.build_dir();
    assert!(build_dir.join("script.rs").exists());

    let wasm = ExecutionPlatform::managed(
        "wasm32-wasip1",
        None,
        std::path::PathBuf::from("/usr/bin/wasmtime"),
    );
    h.host.set_platform(wasm.clone()).await;
    h.host.restore_idle().await;

    assert_eq!(h.host.platform(), wasm);
    assert!(build_dir.exists());
    assert_eq!(std::fs::read_dir(&build_dir).unwrap().count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restore_panic_becomes_errors_and_chain_continues() {
    let h = harness();

    let failing: LibrarySet = [LibraryRef::package("panics", "1")].into_iter().collect();
    h.host.set_libraries(failing);
    h.host.restore_idle().await;

    let errors = h.host.restore_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code.as_deref(), Some("restore"));
    assert_eq!(
        h.host.execute(ExecuteRequest::script(FINITE)).await,
        RunOutcome::RestoreFailed
    );

    // A later restore still runs and clears the failure.
    let fine: LibrarySet = [LibraryRef::package("itoa", "1")].into_iter().collect();
    h.host.set_libraries(fine);
    h.host.restore_idle().await;

    assert!(h.host.restore_errors().is_empty());
    assert_eq!(h.tool.restores.load(Ordering::SeqCst), 2);
    assert!(h.host.execute(ExecuteRequest::script(FINITE)).await.is_success());

    let completed: Vec<bool> = h
        .sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            HostEvent::RestoreCompleted { errors, .. } => Some(errors.is_empty()),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec![false, true]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_superseded_restores_are_skipped() {
    let h = harness();

    for version in ["1", "2", "3"] {
        let set: LibrarySet = [LibraryRef::package("itoa", version)].into_iter().collect();
        h.host.set_libraries(set);
    }
    h.host.restore_idle().await;

    // Only the last scheduled restore reports.
    let reported = h
        .sink
        .events()
        .iter()
        .filter(|e| matches!(e, HostEvent::RestoreCompleted { .. }))
        .count();
    assert_eq!(reported, 1);
    assert!(h.tool.restores.load(Ordering::SeqCst) >= 1);
    assert_eq!(
        h.host.libraries().into_iter().next(),
        Some(LibraryRef::package("itoa", "3"))
    );
}

fn restore_hits(sink: &RecordingSink) -> Vec<bool> {
    sink.events()
        .into_iter()
        .filter_map(|e| match e {
            HostEvent::RestoreCompleted { cache_hit, .. } => Some(cache_hit),
            _ => None,
        })
        .collect()
}

fn looping_pid(sink: &RecordingSink) -> libc::pid_t {
    sink.dumped_values()
        .iter()
        .find_map(|v| v.strip_prefix("pid ").map(|p| p.parse().unwrap()))
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unchanged_references_restore_once() {
    let h = harness();
    let source = "#r \"crate: itoa, 1\"\n// sh: true\n";

    h.host.update_references(source, None);
    h.host.restore_idle().await;
    h.host.update_references(source, None);
    h.host.restore_idle().await;

    assert_eq!(h.tool.restores.load(Ordering::SeqCst), 1);
    assert_eq!(restore_hits(&h.sink), vec![false, true]);
    assert_eq!(
        h.host.libraries().into_iter().next(),
        Some(LibraryRef::package("itoa", "1"))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rename_moves_build_dir_and_restores_again() {
    let h = harness();
    let set: LibrarySet = [LibraryRef::package("itoa", "1")].into_iter().collect();
    h.host.set_libraries(set);
    h.host.restore_idle().await;
    assert!(h.host.execute(ExecuteRequest::script(FINITE)).await.is_success());
    let old_dir = h.host.build_dir();

    h.host.set_name("renamed");
    h.host.restore_idle().await;

    let new_dir = h.host.build_dir();
    assert_eq!(h.host.name(), "renamed");
    assert_ne!(new_dir, old_dir);
    assert!(new_dir.ends_with("renamed"));
    // Re-resolved under the new name from the shared restore cache.
    assert_eq!(restore_hits(&h.sink), vec![false, true]);
    assert_eq!(h.tool.restores.load(Ordering::SeqCst), 1);

    assert!(h.host.execute(ExecuteRequest::script(FINITE)).await.is_success());
    assert!(new_dir.join("script.rs").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_platform_change_stops_running_child_first() {
    let h = harness();

    let run = spawn_execute(&h.host, LOOPING);
    wait_until(|| h.sink.dumped_values().iter().any(|v| v == "a")).await;
    let pid = looping_pid(&h.sink);
    let build_dir = h.host.build_dir();

    let wasm = ExecutionPlatform::managed(
        "wasm32-wasip1",
        None,
        std::path::PathBuf::from("/usr/bin/wasmtime"),
    );
    tokio::time::timeout(Duration::from_secs(5), h.host.set_platform(wasm.clone()))
        .await
        .expect("platform switch waits only for teardown");

    // By the time the directory is cleared the child has been reaped.
    assert_ne!(unsafe { libc::kill(pid, 0) }, 0);
    assert!(!h.host.is_running());
    assert_eq!(std::fs::read_dir(&build_dir).unwrap().count(), 0);
    assert_eq!(run.await.unwrap(), RunOutcome::Cancelled);
    assert_eq!(h.host.platform(), wasm);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_with_unread_input_pending() {
    let h = harness();

    let run = spawn_execute(&h.host, LOOPING);
    wait_until(|| h.sink.dumped_values().iter().any(|v| v == "a")).await;
    let pid = looping_pid(&h.sink);

    // The child never reads, so this write fills the pipe and blocks.
    let writer = tokio::spawn({
        let host = h.host.clone();
        async move { host.send_input(&"x".repeat(1 << 20)).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.host.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(3), run)
        .await
        .expect("cancel is not held up by pending input")
        .unwrap();
    assert_eq!(outcome, RunOutcome::Cancelled);
    tokio::time::timeout(Duration::from_secs(3), writer)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(unsafe { libc::kill(pid, 0) }, 0);

    // The session stays usable.
    assert!(h.host.execute(ExecuteRequest::script(FINITE)).await.is_success());
}
