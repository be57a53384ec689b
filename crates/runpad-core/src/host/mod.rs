//! Session orchestration.
//!
//! # Architecture
//!
//! ```text
//! update_references / set_libraries / set_platform / set_name
//!     │
//!     └── restore chain (one task per request, in order)
//!             │
//!             └── RestoreCache::resolve ──► RestoreCompleted
//!
//! execute
//!     │
//!     ├── await restore chain
//!     └── run lock
//!             ├── ScriptCompiler | ProgramBuilder ──► Diagnostics
//!             ├── ProcessSupervisor::launch
//!             └── FrameReader (stdout) + lines (stderr) ──► Dumped, Exception, ...
//! ```

pub mod events;
pub mod session;

pub use events::{ChannelSink, DEFAULT_EVENT_CAPACITY, HostEvent, HostSink};
pub use session::{ExecuteRequest, ExecutionHost, HOST_VERSION, HostBuilder, RunOutcome};
