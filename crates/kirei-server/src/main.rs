//! Kirei Server
//!
//! Retrieval-augmented chat API with streamed agent events.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use kirei_core::KireiConfig;
use kirei_server::{ingest, start_server, Services};

#[derive(Parser)]
#[command(name = "kirei-server")]
#[command(about = "Retrieval-augmented chat API server", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the chat API (default)
    Serve {
        /// Port to listen on (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Load passages from a JSON Lines file into the knowledge collection
    Ingest {
        /// File of `{"content": ..., "metadata": {...}}` lines
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = KireiConfig::from_env()?;

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.port = port;
            }
            start_server(config).await
        }
        Commands::Ingest { file } => {
            let services = Services::from_config(&config).await;
            let inserted = ingest::ingest_file(
                services.store.as_ref(),
                services.embedder.as_ref(),
                &config.collection,
                &file,
            )
            .await?;
            println!("Inserted {} passages into {}", inserted, config.collection);
            Ok(())
        }
    }
}
