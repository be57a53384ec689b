//! Notifications raised by the execution host.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::compile::Diagnostic;
use crate::protocol::{ExceptionResult, ProgressResult, ResultObject};

/// Capacity used by [`ChannelSink::new`] callers that have no preference.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Everything a host reports, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    /// Diagnostics of one compile attempt. Raised exactly once per attempt,
    /// possibly empty.
    Diagnostics { diagnostics: Vec<Diagnostic> },

    /// A dumped value or a line of the child's standard error.
    Dumped { record: ResultObject },

    /// An exception (panic) reported by the child.
    Exception { exception: ExceptionResult },

    Progress { progress: ProgressResult },

    /// The child is waiting for a line on standard input.
    InputRequested,

    /// Disassembly of a successfully compiled artifact.
    Disassembly { text: String },

    /// A restore finished and its results were applied.
    RestoreCompleted {
        /// Empty when the restore succeeded.
        errors: Vec<Diagnostic>,
        /// Dropped references and similar non-fatal problems.
        warnings: Vec<Diagnostic>,
        cache_hit: bool,
        reference_count: usize,
    },

    /// The run ended abnormally.
    RunFailed { message: String },
}

/// Receiver of host events.
#[async_trait]
pub trait HostSink: Send + Sync {
    async fn emit(&self, event: HostEvent);
}

/// Bounded channel sink. A full channel makes the host wait; a closed one
/// drops events.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<HostEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<HostEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl HostSink for ChannelSink {
    async fn emit(&self, event: HostEvent) {
        if self.tx.send(event).await.is_err() {
            tracing::trace!("event receiver closed");
        }
    }
}
