//! runpad CLI - compile and run Rust snippets.

mod colors;
mod output;
mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "runpad")]
#[command(about = "Compile and run Rust snippets with streamed results")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Restore and build without network access
    #[arg(long, global = true)]
    offline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run a snippet
    Run {
        /// Path to the snippet (.rs file)
        file: PathBuf,

        /// Treat the file as a full program with its own `fn main`
        #[arg(long)]
        program: bool,

        /// Build with optimizations
        #[arg(long)]
        release: bool,

        /// Print the disassembly before running
        #[arg(long)]
        disasm: bool,

        /// Session name (defaults to the file stem)
        #[arg(long)]
        name: Option<String>,

        /// Target triple (defaults to the host)
        #[arg(long)]
        target: Option<String>,

        /// Runtime launcher for the target, e.g. a WASI runtime
        #[arg(long, requires = "target")]
        launcher: Option<PathBuf>,
    },

    /// Resolve a snippet's references without running it
    Restore {
        /// Path to the snippet (.rs file)
        file: PathBuf,

        /// Session name (defaults to the file stem)
        #[arg(long)]
        name: Option<String>,

        /// Target triple (defaults to the host)
        #[arg(long)]
        target: Option<String>,
    },

    /// Show the located Rust toolchain
    Toolchain,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let code = match cli.command {
        Commands::Run {
            file,
            program,
            release,
            disasm,
            name,
            target,
            launcher,
        } => {
            let options = run::RunOptions {
                host: run::HostOptions {
                    name,
                    target,
                    launcher,
                    disassemble: disasm,
                    offline: cli.offline,
                },
                program,
                release,
            };
            run::execute(&file, options).await?
        }

        Commands::Restore { file, name, target } => {
            let options = run::HostOptions {
                name,
                target,
                launcher: None,
                disassemble: false,
                offline: cli.offline,
            };
            run::restore(&file, options).await?
        }

        Commands::Toolchain => run::toolchain()?,
    };

    // The stdin forwarder may still hold a blocking read.
    std::process::exit(code)
}
