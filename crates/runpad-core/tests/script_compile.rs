//! Script runs against the real toolchain.
//!
//! Skipped when `rustc` and `cargo` cannot be located.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use runpad_core::{
    ExecuteRequest, ExecutionHost, HostBuilder, HostConfig, HostEvent, HostSink, RunOutcome,
    Severity, Toolchain,
};

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
}

fn host(dir: &tempfile::TempDir) -> Option<(ExecutionHost, Arc<RecordingSink>)> {
    let toolchain = match Toolchain::locate() {
        Ok(toolchain) => toolchain,
        Err(e) => {
            eprintln!("skipping: {e}");
            return None;
        }
    };
    let sink = Arc::new(RecordingSink::default());
    let host = HostBuilder::new(HostConfig::rooted_at(dir.path()), sink.clone())
        .toolchain(&toolchain)
        .name("script")
        .build()
        .unwrap();
    Some((host, sink))
}

#[tokio::test]
async fn test_trailing_expression_is_dumped() {
    let dir = tempfile::TempDir::new().unwrap();
    let Some((host, sink)) = host(&dir) else {
        return;
    };

    let outcome = host.execute(ExecuteRequest::script("1+1")).await;

    assert_eq!(outcome, RunOutcome::Completed { exit_code: 0 });
    let dumped: Vec<_> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            HostEvent::Dumped { record } => Some(record),
            _ => None,
        })
        .collect();
    assert_eq!(dumped.len(), 1);
    assert_eq!(dumped[0].value.as_deref(), Some("2"));
    assert_eq!(dumped[0].line_number, Some(1));
}

#[tokio::test]
async fn test_compile_error_maps_to_user_line() {
    let dir = tempfile::TempDir::new().unwrap();
    let Some((host, sink)) = host(&dir) else {
        return;
    };

    let outcome = host
        .execute(ExecuteRequest::script("let a = 1;\nlet b: String = a;\n"))
        .await;

    assert_eq!(outcome, RunOutcome::CompilationFailed);
    let diagnostics = sink
        .events()
        .into_iter()
        .find_map(|e| match e {
            HostEvent::Diagnostics { diagnostics } => Some(diagnostics),
            _ => None,
        })
        .unwrap();
    let error = diagnostics
        .iter()
        .find(|d| d.severity == Severity::Error)
        .unwrap();
    assert_eq!(error.code.as_deref(), Some("E0308"));
    assert_eq!(error.line, Some(2));
}

#[tokio::test]
async fn test_panic_is_reported_as_exception() {
    let dir = tempfile::TempDir::new().unwrap();
    let Some((host, sink)) = host(&dir) else {
        return;
    };

    let outcome = host
        .execute(ExecuteRequest::script("println!(\"before\");\npanic!(\"boom\");\n"))
        .await;

    assert!(matches!(outcome, RunOutcome::Completed { exit_code } if exit_code != 0));
    let events = sink.events();
    assert!(events.iter().any(
        |e| matches!(e, HostEvent::Dumped { record } if record.value.as_deref() == Some("before"))
    ));
    let exception = events
        .iter()
        .find_map(|e| match e {
            HostEvent::Exception { exception } => Some(exception.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(exception.message, "boom");
    assert_eq!(exception.object.line_number, Some(2));
}
