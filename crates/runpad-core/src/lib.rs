//! Core of the runpad script execution host.
//!
//! This crate provides:
//! - Library references and execution platforms
//! - Dependency restore through a content-addressed cache
//! - Two compile strategies (direct `rustc`, or a `cargo` program build)
//! - Child process supervision and the frame protocol it speaks
//! - The execution host orchestrating restore, compile and run

pub mod cancel;
pub mod compile;
pub mod config;
pub mod disasm;
pub mod error;
pub mod host;
pub mod inspect;
pub mod library;
pub mod paths;
pub mod platform;
pub mod process;
pub mod protocol;
pub mod restore;
pub mod toolchain;

pub use cancel::{CancelDomain, Ticket};
pub use compile::{
    BuildTool, CargoBuildTool, CompileMode, CompileOutcome, Compiler, Diagnostic, ProgramBuilder,
    RustcCompiler, ScriptCompiler, Severity,
};
pub use config::HostConfig;
pub use disasm::{Disassembler, ObjdumpDisassembler};
pub use error::{Error, Result};
pub use host::{
    ChannelSink, ExecuteRequest, ExecutionHost, HostBuilder, HostEvent, HostSink, RunOutcome,
};
pub use inspect::{Directive, DirectiveInspector, DirectiveKind, SyntaxInspector};
pub use library::{LibraryRef, LibrarySet};
pub use paths::HostDirs;
pub use platform::{Architecture, ExecutionPlatform};
pub use process::{ChildProcess, InputHandle, ProcessSupervisor};
pub use protocol::{ExceptionResult, Frame, FrameReader, FrameWriter, ProgressResult, ResultObject};
pub use restore::{BuildCacheEntry, ResolvedReferences, RestoreCache};
pub use toolchain::Toolchain;
