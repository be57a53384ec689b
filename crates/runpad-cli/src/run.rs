//! `run` and `restore` command implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use runpad_core::host::DEFAULT_EVENT_CAPACITY;
use runpad_core::{
    ChannelSink, ExecuteRequest, ExecutionHost, ExecutionPlatform, HostBuilder, HostConfig,
    HostEvent, ObjdumpDisassembler, RunOutcome, Toolchain,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::colors;
use crate::output::print_event;

/// Options shared by `run` and `restore`.
pub struct HostOptions {
    pub name: Option<String>,
    pub target: Option<String>,
    pub launcher: Option<PathBuf>,
    pub disassemble: bool,
    pub offline: bool,
}

/// Options of `run`.
pub struct RunOptions {
    pub host: HostOptions,
    pub program: bool,
    pub release: bool,
}

struct Session {
    host: ExecutionHost,
    source: String,
    printer: JoinHandle<()>,
}

/// Build a host for `file`, start its restore and the event printer.
fn open(file: &Path, options: &HostOptions) -> anyhow::Result<Session> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let toolchain = Toolchain::locate()?;

    let name = options.name.clone().unwrap_or_else(|| {
        file.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "session".to_string())
    });

    let (sink, events) = ChannelSink::new(DEFAULT_EVENT_CAPACITY);
    let mut config = HostConfig::from_env();
    if options.offline {
        config = config.with_offline(true);
    }
    let mut builder = HostBuilder::new(config, Arc::new(sink))
        .toolchain(&toolchain)
        .name(&name);

    if let Some(target) = &options.target {
        let version = Some(toolchain.release.clone());
        let platform = match &options.launcher {
            Some(launcher) => ExecutionPlatform::managed(target, version, launcher.clone()),
            None => ExecutionPlatform::for_target(target, version),
        };
        builder = builder.platform(platform);
    }

    if options.disassemble {
        match ObjdumpDisassembler::locate() {
            Ok(disassembler) => builder = builder.disassembler(Arc::new(disassembler)),
            Err(e) => tracing::warn!("Disassembly unavailable: {}", e),
        }
    }

    let host = builder.build()?;
    tracing::info!("Session '{}' on {}", name, host.platform());

    let base_dir = file
        .canonicalize()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf));
    host.update_references(&source, base_dir.as_deref());

    Ok(Session {
        host,
        source,
        printer: tokio::spawn(print_events(events)),
    })
}

async fn print_events(mut events: mpsc::Receiver<HostEvent>) {
    while let Some(event) = events.recv().await {
        print_event(&event);
    }
}

/// Compile and run a snippet file. Returns the process exit code to use.
pub async fn execute(file: &Path, options: RunOptions) -> anyhow::Result<i32> {
    let start = Instant::now();
    let Session {
        host,
        source,
        printer,
    } = open(file, &options.host)?;

    let request = ExecuteRequest {
        source,
        mode: if options.program {
            runpad_core::CompileMode::Program
        } else {
            runpad_core::CompileMode::Script
        },
        release: options.release,
        disassemble: options.host.disassemble,
    };

    let stdin_task = tokio::spawn(forward_stdin(host.clone()));
    let interrupt_task = tokio::spawn({
        let host = host.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted");
                host.cancel();
            }
        }
    });

    let outcome = host.execute(request).await;

    stdin_task.abort();
    interrupt_task.abort();
    let _ = stdin_task.await;
    let _ = interrupt_task.await;
    drop(host);
    let _ = printer.await;

    let elapsed = start.elapsed().as_secs_f64();
    let code = match outcome {
        RunOutcome::Completed { exit_code } => {
            let color = if exit_code == 0 {
                colors::GREEN
            } else {
                colors::YELLOW
            };
            eprintln!(
                "{}Exited{} with code {} in {:.2}s",
                color,
                colors::RESET,
                exit_code,
                elapsed
            );
            exit_code
        }
        RunOutcome::Cancelled => {
            eprintln!("{}Cancelled{}", colors::YELLOW, colors::RESET);
            130
        }
        other => {
            eprintln!("{}Failed:{} {:?}", colors::RED, colors::RESET, other);
            1
        }
    };
    Ok(code)
}

/// Resolve the snippet's references and print them.
pub async fn restore(file: &Path, options: HostOptions) -> anyhow::Result<i32> {
    let Session { host, printer, .. } = open(file, &options)?;
    host.restore_idle().await;

    let errors = host.restore_errors();
    let references = host.references();
    let build_dir = host.build_dir();
    drop(host);
    let _ = printer.await;

    if !errors.is_empty() {
        eprintln!(
            "{}Restore failed{} with {} error(s)",
            colors::RED,
            colors::RESET,
            errors.len()
        );
        return Ok(1);
    }

    println!("{}References:{}", colors::BOLD, colors::RESET);
    for reference in &references.references {
        println!("  {} {}", reference.name, reference.path.display());
    }
    for analyzer in &references.analyzers {
        println!(
            "  {} {}{}(proc-macro){}",
            analyzer.name,
            analyzer.path.display(),
            colors::DIM,
            colors::RESET
        );
    }
    println!("{}Build directory:{} {}", colors::BOLD, colors::RESET, build_dir.display());
    Ok(0)
}

/// Print the located toolchain.
pub fn toolchain() -> anyhow::Result<i32> {
    let toolchain = Toolchain::locate()?;
    println!("{}{}{}", colors::BOLD, toolchain.version_line, colors::RESET);
    println!("  rustc  {}", toolchain.rustc.display());
    println!("  cargo  {}", toolchain.cargo.display());
    println!("  host   {}", toolchain.host);
    match toolchain.sysroot() {
        Ok(sysroot) => println!("  sysroot {}", sysroot.display()),
        Err(e) => tracing::warn!("{}", e),
    }
    Ok(0)
}

async fn forward_stdin(host: ExecutionHost) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        host.send_input(&line).await;
    }
}
