use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use terraflow::console::{self, ConsoleOptions};

/// Reset SIGPIPE to default behavior so piping terraflow output exits cleanly
/// instead of panicking on broken pipe.
#[cfg(unix)]
fn reset_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }
}

/// terraflow - Live-updating Terraform/OpenTofu console
#[derive(Parser)]
#[command(name = "terraflow", version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Try Terraform expressions at an interactive command prompt
    Console {
        /// Path to a .tfvars file (repeatable). Passed through to terraform console.
        #[arg(long = "var-file", value_name = "PATH")]
        var_file: Vec<String>,

        /// Partial backend configuration, KEY=VALUE or a *.tfbackend path
        /// (repeatable). Triggers an initial init of the project.
        #[arg(long = "backend-config", value_name = "KEY=VALUE|PATH")]
        backend_config: Vec<String>,

        /// Pull remote state once and reuse it locally in .terraflow/
        #[arg(long)]
        pull_remote_state: bool,
    },

    /// Show the current terraflow version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    #[cfg(unix)]
    reset_sigpipe();

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Console {
            var_file,
            backend_config,
            pull_remote_state,
        } => {
            console::run(ConsoleOptions {
                var_files: var_file,
                backend_configs: backend_config,
                pull_remote_state,
            })
            .await
        }
        Commands::Version => {
            println!("terraflow {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
