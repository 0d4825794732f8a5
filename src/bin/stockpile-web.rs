// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Stockpile Control Panel
//!
//! Standalone server for the scrape and library HTTP routes.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use stockpile::config::AppConfig;
use stockpile::library::Library;
use stockpile::Result;

#[derive(Parser, Debug)]
#[command(name = "stockpile-web")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version = "0.4.0")]
#[command(about = "Stockpile control panel server")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Host to bind to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Library database path
    #[arg(long)]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Stockpile control panel v0.4.0");

    let mut config = AppConfig::load(&args.config)?;

    // Apply CLI overrides
    if let Some(host) = args.host {
        config.web.host = host;
    }
    if let Some(port) = args.port {
        config.web.port = port;
    }
    if let Some(database) = args.database {
        config.library.path = database.to_string_lossy().to_string();
    }

    let library = Library::open(&config.library)?;
    info!("Library: {} ({} images)", config.library.path, library.db().get_image_count()?);
    info!("Scraped images go to {}", config.library.download_dir);

    stockpile::web::start_server(config, library).await
}
