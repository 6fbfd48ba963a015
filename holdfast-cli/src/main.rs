//! # holdfast CLI
//!
//! Small demo programs that drive holdfast stores from the command line.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "holdfast")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to store configuration file (defaults are used if it is missing)
    #[arg(long, default_value = "holdfast.yml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Increment a counter; each increment schedules a task that ticks
    Counter {
        /// Number of increments to send
        #[arg(long, default_value_t = 3)]
        times: u64,
    },

    /// Count down with a stream effect, optionally stopping early
    Countdown {
        /// Starting value
        #[arg(long, default_value_t = 5)]
        from: u64,

        /// Milliseconds between ticks
        #[arg(long, default_value_t = 10)]
        interval_ms: u64,

        /// Cancel the countdown after this many ticks
        #[arg(long)]
        stop_after: Option<u64>,
    },

    /// Scope a keyed todo list and remove one row
    Todos {
        /// Number of todos to create
        #[arg(long, default_value_t = 3)]
        count: u64,

        /// Id of the todo to remove
        #[arg(long, default_value_t = 2)]
        remove: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = commands::load_config(&cli.config)?;

    match cli.command {
        Commands::Counter { times } => commands::run_counter(config, times).await,
        Commands::Countdown {
            from,
            interval_ms,
            stop_after,
        } => {
            let opts = commands::CountdownOptions {
                from,
                interval_ms,
                stop_after,
            };
            commands::run_countdown(config, opts).await
        }
        Commands::Todos { count, remove } => commands::run_todos(config, count, remove),
    }
}
