mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "crucible-cli")]
#[command(about = "Crucible CLI - Submit code and inspect jobs", long_about = None)]
struct Cli {
    /// Base URL of the Crucible API
    #[arg(long, global = true, default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a source file for execution
    Submit {
        /// Language identifier (e.g. python3, cpp, java)
        #[arg(short, long)]
        language: String,

        /// Path to the source file
        #[arg(short, long)]
        file: String,

        /// Optional file fed to the program's standard input
        #[arg(long)]
        stdin_file: Option<String>,

        /// Run timeout override in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Memory limit override in MiB
        #[arg(long)]
        memory_limit_mib: Option<u64>,

        /// Poll until the job reaches a terminal state
        #[arg(short, long, default_value = "false")]
        wait: bool,
    },

    /// Fetch the record of a submitted job
    Status {
        /// Job id returned by submit
        job_id: String,
    },

    /// Show API health and queue depth
    Health,

    /// List supported languages
    Languages,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Submit {
            language,
            file,
            stdin_file,
            timeout_ms,
            memory_limit_mib,
            wait,
        } => {
            commands::submit(
                &cli.server,
                &language,
                &file,
                stdin_file.as_deref(),
                timeout_ms,
                memory_limit_mib,
                wait,
            )
            .await?;
        }
        Commands::Status { job_id } => {
            commands::status(&cli.server, &job_id).await?;
        }
        Commands::Health => {
            commands::health(&cli.server).await?;
        }
        Commands::Languages => {
            commands::languages(&cli.server).await?;
        }
    }

    Ok(())
}
