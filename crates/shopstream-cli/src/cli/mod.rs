//! CLI entry and dispatch.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use shopstream_core::config;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod commands;

#[derive(Parser)]
#[command(name = "shopstream")]
#[command(version)]
#[command(about = "Streaming shopping-assistant chat client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level or filter directive (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "SHOPSTREAM_LOG", default_value = "warn")]
    log_level: String,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Sends one query and streams the answer
    Chat {
        /// The shopping question to ask
        #[arg(value_name = "QUERY")]
        query: String,

        /// Override the session id from config
        #[arg(long, value_name = "ID")]
        session_id: Option<String>,

        #[command(flatten)]
        feedback: FeedbackArgs,

        /// Print the final transcript state as JSON instead of live output
        #[arg(long)]
        json: bool,
    },

    /// Decodes a recorded event stream offline
    Replay {
        /// File containing raw `text/event-stream` bytes
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Feed the capture in chunks of this many bytes
        #[arg(long, value_name = "BYTES", value_parser = clap::value_parser!(u64).range(1..))]
        chunk_size: Option<u64>,

        /// Query recorded as the user turn
        #[arg(long, default_value = "(replay)")]
        query: String,

        /// Print the final transcript state as JSON instead of live output
        #[arg(long)]
        json: bool,
    },

    /// Submits feedback for an earlier answer
    Feedback {
        /// Correlation id of the answer (from its `start` event)
        #[arg(long, value_name = "ID")]
        message_id: String,

        /// Override the session id from config
        #[arg(long, value_name = "ID")]
        session_id: Option<String>,

        #[command(flatten)]
        feedback: FeedbackArgs,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Product selection and rating shared by `chat` and `feedback`.
#[derive(clap::Args, Debug, Clone, Default)]
struct FeedbackArgs {
    /// Style code of a recommended product to select (repeatable)
    #[arg(long = "select", value_name = "CODE")]
    select: Vec<String>,

    /// Rating from 1 to 5
    #[arg(long, value_name = "N")]
    rating: Option<u8>,

    /// Free-form note sent with the feedback
    #[arg(long)]
    notes: Option<String>,
}

impl FeedbackArgs {
    fn options(&self) -> commands::feedback::FeedbackOptions<'_> {
        commands::feedback::FeedbackOptions {
            codes: &self.select,
            rating: self.rating,
            notes: self.notes.as_deref(),
        }
    }
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

/// Returned when Ctrl+C cancels a running turn.
#[derive(Debug)]
pub struct InterruptedError;

impl std::fmt::Display for InterruptedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Interrupted")
    }
}

impl std::error::Error for InterruptedError {}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

/// Logs go to stderr so stdout only carries answer text.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        },

        Commands::Chat {
            query,
            session_id,
            feedback,
            json,
        } => {
            let config = config::Config::load().context("load config")?;
            commands::chat::run(commands::chat::ChatRunOptions {
                config: &config,
                query: &query,
                session_id: session_id.as_deref(),
                feedback: feedback.options(),
                json,
            })
            .await
        }

        Commands::Replay {
            file,
            chunk_size,
            query,
            json,
        } => {
            let config = config::Config::load().context("load config")?;
            let chunk_size = chunk_size.map(usize::try_from).transpose()?;
            commands::replay::run(&config, &file, chunk_size, &query, json).await
        }

        Commands::Feedback {
            message_id,
            session_id,
            feedback,
        } => {
            let config = config::Config::load().context("load config")?;
            commands::feedback::run(
                &config,
                session_id.as_deref(),
                &message_id,
                feedback.options(),
            )
            .await
        }
    }
}
