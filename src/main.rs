//! # Constitution Search Service Main Driver
//!
//! ## Purpose
//! Main entry point for the constitution search server. Loads configuration,
//! wires the cache, storage and search components and runs the web server
//! until a shutdown signal arrives.
//!
//! ## Input/Output Specification
//! - **Input**: Configuration file, command line arguments, environment variables
//! - **Output**: Running web server with content, search and analytics endpoints
//!
//! ## Architecture Flow
//! 1. Parse command line arguments and load configuration
//! 2. Initialize logging and tracing
//! 3. Open storage and wire application components
//! 4. Optionally warm the content cache
//! 5. Start the web API server
//! 6. Flush storage on shutdown

use clap::{Arg, Command};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use constitution_search::{
    api::ApiServer,
    config::Config,
    content::PopulateMode,
    errors::Result,
    AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("constitution-server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Cached constitution content with search, popularity and reading analytics")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Server port")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("warm-cache")
                .long("warm-cache")
                .help("Load the document into the cache before serving")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").unwrap();
    let mut config = Config::from_file(config_path)?;
    if let Some(port) = matches.get_one::<u16>("port") {
        config.server.port = *port;
    }

    init_logging(&config)?;

    info!("Starting constitution search service");
    info!("Configuration loaded from: {}", config_path);

    let state = AppState::build(config)?;

    if matches.get_flag("warm-cache") {
        let document = state.content.get_document(PopulateMode::Immediate).await?;
        info!(
            chapters = document.chapters.len(),
            "Content cache warmed"
        );
    }

    let server_state = state.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = ApiServer::new(server_state).run().await {
            error!("Server error: {}", e);
        }
    });

    info!(
        "Constitution search service started on {}:{}",
        state.config.server.host, state.config.server.port
    );

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = server_handle => {
            warn!("Server stopped unexpectedly");
        }
    }

    state.storage.flush().await?;
    info!("Constitution search service shut down");

    Ok(())
}

/// Initialize logging and tracing
fn init_logging(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}
