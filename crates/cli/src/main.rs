//! DocuAgent CLI — the main entry point.
//!
//! Commands:
//! - `onboard` — Write a starter config file
//! - `ask`     — Ask a question against the demo corpus
//! - `gateway` — Start the HTTP API server

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "docuagent",
    about = "DocuAgent — grounded, citation-backed document Q&A",
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
    /// Write a starter configuration file
    Onboard,

    /// Ask the agent a question
    Ask {
        /// The question to answer
        question: String,

        /// Print the execution trace after the answer
        #[arg(short, long)]
        trace: bool,

        /// Stream trace events as the agent works
        #[arg(short, long)]
        stream: bool,

        /// Principal identity for document scoping
        #[arg(short, long, default_value = "local")]
        principal: String,
    },

    /// Start the HTTP gateway server
    Gateway {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Ask {
            question,
            trace,
            stream,
            principal,
        } => commands::ask::run(question, trace, stream, principal).await?,
        Commands::Gateway { port } => commands::gateway::run(port).await?,
    }

    Ok(())
}
