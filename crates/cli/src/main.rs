//! ragloom CLI: the main entry point.
//!
//! Commands:
//! - `ask`     Answer a question from the web or a document collection
//! - `models`  List the models each configured provider offers
//! - `serve`   Start the HTTP gateway
//! - `config`  Print the effective or default configuration

use clap::{Parser, Subcommand};

mod commands;

use commands::ask::AskArgs;

#[derive(Parser)]
#[command(
    name = "ragloom",
    about = "ragloom: cited answers from retrieval-augmented generation",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question
    Ask(AskArgs),

    /// List provider models
    Models {
        /// Query every provider for its current model list
        #[arg(short, long)]
        refresh: bool,
    },

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print configuration as TOML (secrets redacted)
    Config {
        /// Print the built-in defaults instead of the effective configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ask(args) => commands::ask::run(args).await?,
        Commands::Models { refresh } => commands::models::run(refresh).await?,
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Config { default } => commands::config::run(default).await?,
    }

    Ok(())
}
