//! Command-line client for the Buzz chat service.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use dotenv::dotenv;
use shared::config::ClientConfig;
use url::Url;

mod commands;
mod logging;

use commands::{chat::ChatArgs, conversations::ConversationsCommand, session::SessionCommand};

/// Buzz CLI
#[derive(Parser, Debug)]
#[command(name = "buzz", version)]
#[command(about = "Command-line client for the Buzz chat service", long_about = None)]
pub(crate) struct Cli {
    /// Path to the configuration file (config.yaml or config.json)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Buzz API base URL, overriding the configuration (e.g. `http://localhost:8000`)
    #[arg(long, global = true)]
    server: Option<Url>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Log in, log out, or show the current user
    #[command(subcommand)]
    Session(SessionCommand),

    /// List or start conversations
    #[command(subcommand)]
    Conversations(ConversationsCommand),

    /// Open a conversation and chat in real time
    Chat(ChatArgs),

    /// Generate shell completion scripts for the CLI
    Completion {
        /// The shell to generate the completion script for
        #[arg(long, short, value_enum)]
        shell: Shell,
    },

    /// Generate a configuration file in the current directory
    Config {
        /// Format of the configuration file to generate (yaml or json)
        #[arg(long, short, default_value = "yaml")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let Cli {
        config,
        server,
        command,
    } = Cli::parse();

    match command {
        Commands::Completion { shell } => {
            commands::completion::generate_completion(shell);
            Ok(())
        }
        Commands::Config { format } => commands::config::generate_config(&format),
        command => {
            let config = ClientConfig::load_config(config, server)
                .context("failed to load configuration")?;
            logging::initialize_tracing(&config);

            match command {
                Commands::Session(command) => commands::session::run(command, &config).await,
                Commands::Conversations(command) => {
                    commands::conversations::run(command, &config).await
                }
                Commands::Chat(args) => commands::chat::run(args, &config).await,
                Commands::Completion { .. } | Commands::Config { .. } => Ok(()),
            }
        }
    }
}
