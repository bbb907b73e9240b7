//! hrbot CLI: runs the WhatsApp webhook and the maintenance commands
//! around it (ingestion, log database, catalog checks, local questions).

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// HR policy assistant for WhatsApp
#[derive(Parser, Debug)]
#[command(name = "hrbot", version, about, long_about = None)]
struct Cli {
    /// Configuration file path (defaults to ./hrbot.toml, then the user config)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the webhook server
    Serve {
        /// Override the listening port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Ingest policy documents into the vector store
    Ingest {
        /// Drop the collection before ingesting
        #[arg(long)]
        rebuild: bool,
    },
    /// Answer one question locally, without WhatsApp
    Ask {
        /// The question, in Spanish
        question: String,
    },
    /// Create the interaction log tables
    InitDb,
    /// Show the policy catalog and compare it with the stored documents
    Catalog,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default hrbot.toml in the current directory
    Init,
    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "hrbot", "hrbot")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "hrbot.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    commands::handle_command(cli.command, cli.config.as_deref()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ingest_rebuild() {
        let cli = Cli::try_parse_from(["hrbot", "-v", "ingest", "--rebuild"]).unwrap();
        assert_eq!(cli.verbose, 1);
        assert!(matches!(cli.command, Commands::Ingest { rebuild: true }));
    }

    #[test]
    fn test_parse_ask_with_config() {
        let cli =
            Cli::try_parse_from(["hrbot", "--config", "x.toml", "ask", "¿Qué es la beca?"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        match cli.command {
            Commands::Ask { question } => assert_eq!(question, "¿Qué es la beca?"),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_config_show() {
        let cli = Cli::try_parse_from(["hrbot", "config", "show"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Show
            }
        ));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["hrbot"]).is_err());
    }
}
