// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Stockpile: local image library, scrape sessions and frame blending
//!
//! Command-line front end over the library store, the node registry and the
//! frame-blend utilities.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use stockpile::config::AppConfig;
use stockpile::db::ImageQuery;
use stockpile::library::{import_json_file, ImageMeta, Library};
use stockpile::nodes::{NodeContext, NodeInputs, NodeRegistry};
use stockpile::scraper::SessionManager;
use stockpile::video::{self, BlendMode, Curve, StitchOptions};
use stockpile::{Result, StockpileError};

/// Stockpile CLI - scraped image library and frame tools
#[derive(Parser, Debug)]
#[command(name = "stockpile")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version = "0.4.0")]
#[command(
    about = "Local image library, scraper control panel and frame blending tools",
    long_about = None
)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Library database path (overrides config)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP control panel
    Serve {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Import a JSON array of scraped images
    Import {
        /// JSON file written by a scraper
        file: PathBuf,
    },

    /// Add a single image to the library
    Add {
        image: PathBuf,

        #[arg(long)]
        category: Option<String>,

        /// Comma-separated tags
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,

        #[arg(short, long)]
        source: Option<String>,

        /// Machine name (defaults to this host)
        #[arg(short, long)]
        machine: Option<String>,
    },

    /// Search the library
    Search {
        #[command(flatten)]
        filter: FilterArgs,

        /// Maximum results
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// List known categories
    Categories,

    /// List known machine names
    Machines,

    /// Show library statistics
    Stats,

    /// Vacuum the library database (reclaim space)
    Vacuum,

    /// Pick images from the library and write them as PNGs
    Pick {
        #[command(flatten)]
        filter: FilterArgs,

        /// Selection mode: first, random, all or index
        #[arg(long, default_value = "random")]
        mode: String,

        /// Number of images to write
        #[arg(short = 'n', long, default_value = "1")]
        count: i64,

        /// Seed for random selection
        #[arg(long, default_value = "0")]
        seed: i64,

        /// Index for index selection (wraps around)
        #[arg(long, default_value = "0")]
        index: i64,

        /// Output directory
        #[arg(short, long, default_value = "picked")]
        output: PathBuf,
    },

    /// Stitch directories of frames into one clip
    Stitch {
        /// Frame directories, in order (at least two)
        #[arg(required = true, num_args = 2..)]
        clips: Vec<PathBuf>,

        #[arg(short, long, default_value = "stitched")]
        output: PathBuf,

        #[arg(long, default_value = "4")]
        overlap: usize,

        #[arg(long, default_value = "8")]
        crossfade: usize,

        #[arg(long, default_value = "2")]
        interpolation: usize,

        /// linear, ease_in_out, cosine or sigmoid
        #[arg(long, default_value = "ease_in_out")]
        curve: String,
    },

    /// Blend two directories of frames
    Blend {
        a: PathBuf,
        b: PathBuf,

        #[arg(short, long, default_value = "blended")]
        output: PathBuf,

        /// 0.0 = all of a, 1.0 = all of b
        #[arg(short, long, default_value = "0.5")]
        factor: f32,

        /// mix, add, multiply, screen or overlay
        #[arg(short, long, default_value = "mix")]
        mode: String,
    },

    /// Make a directory of frames loop seamlessly
    Loop {
        input: PathBuf,

        #[arg(short, long, default_value = "looped")]
        output: PathBuf,

        #[arg(long, default_value = "8")]
        blend_frames: usize,

        #[arg(long, default_value = "ease_in_out")]
        curve: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

/// Library filters shared by search and pick
#[derive(clap::Args, Debug, Default)]
struct FilterArgs {
    #[arg(long)]
    category: Option<String>,

    /// Substring of the filename or any tag
    #[arg(long)]
    query: Option<String>,

    #[arg(short, long)]
    machine: Option<String>,

    #[arg(long)]
    min_width: Option<u32>,

    #[arg(long)]
    min_height: Option<u32>,
}

impl FilterArgs {
    fn to_query(&self) -> ImageQuery {
        ImageQuery {
            category: self.category.clone(),
            search_query: self.query.clone(),
            machine_name: self.machine.clone(),
            min_width: self.min_width,
            min_height: self.min_height,
            limit: None,
        }
    }
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Load configuration
    let mut config = AppConfig::load(&cli.config)?;
    if let Some(database) = &cli.database {
        config.library.path = database.to_string_lossy().to_string();
    }

    let json = cli.format == "json";
    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.web.host = host;
            }
            if let Some(port) = port {
                config.web.port = port;
            }
            let library = Library::open(&config.library)?;
            info!("Library: {}", config.library.path);
            stockpile::web::start_server(config, library).await
        }
        Commands::Import { file } => run_import(&config, &file, json),
        Commands::Add { image, category, tags, source, machine } => {
            let library = Library::open(&config.library)?;
            let meta = ImageMeta { category, tags, source, machine_name: machine };
            let record = library.add_image(&image, meta)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!(
                    "Added #{}: {} ({}x{})",
                    record.id, record.filename, record.width, record.height
                );
            }
            Ok(())
        }
        Commands::Search { filter, limit } => run_search(&config, &filter, limit, json),
        Commands::Categories => {
            let library = Library::open(&config.library)?;
            print_list("Categories", &library.categories()?, json)
        }
        Commands::Machines => {
            let library = Library::open(&config.library)?;
            print_list("Machine names", &library.machine_names()?, json)
        }
        Commands::Stats => run_stats(&config, json),
        Commands::Vacuum => {
            Library::open(&config.library)?.db().vacuum()?;
            println!("Library database vacuumed");
            Ok(())
        }
        Commands::Pick { filter, mode, count, seed, index, output } => {
            let inputs = NodeInputs::new()
                .with("category", filter.category.unwrap_or_default())
                .with("search_query", filter.query.unwrap_or_default())
                .with("machine_name", filter.machine.unwrap_or_default())
                .with("min_width", filter.min_width.unwrap_or(0))
                .with("min_height", filter.min_height.unwrap_or(0))
                .with("selection_mode", mode)
                .with("count", count)
                .with("seed", seed)
                .with("image_index", index);
            run_pick(&config, inputs, &output).await
        }
        Commands::Stitch { clips, output, overlap, crossfade, interpolation, curve } => {
            let options = StitchOptions {
                overlap_frames: overlap,
                crossfade_frames: crossfade,
                interpolation_frames: interpolation,
                curve: curve.parse()?,
            };
            let batches = clips
                .iter()
                .map(|dir| video::load_frames(dir))
                .collect::<Result<Vec<_>>>()?;
            let frames = video::stitch_all(batches, &options)?;
            write_frames(&frames, &output, "stitched")
        }
        Commands::Blend { a, b, output, factor, mode } => {
            let mode: BlendMode = mode.parse()?;
            let (a, b) = (video::load_frames(&a)?, video::load_frames(&b)?);
            let frames = video::blend_batches(&a, &b, factor, mode);
            write_frames(&frames, &output, "blended")
        }
        Commands::Loop { input, output, blend_frames, curve } => {
            let curve: Curve = curve.parse()?;
            let frames = video::seamless_loop(video::load_frames(&input)?, blend_frames, curve);
            write_frames(&frames, &output, "looped")
        }
        Commands::Config { action } => run_config_command(config, action),
    }
}

fn run_import(config: &AppConfig, file: &Path, json: bool) -> Result<()> {
    let library = Library::open(&config.library)?;
    let report = import_json_file(&library, file)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("Imported {} images, {} failed", report.success, report.failed);
    for failure in &report.errors {
        println!(
            "  [{}] {}: {}",
            failure.index,
            failure.image_path.as_deref().unwrap_or("-"),
            failure.error
        );
    }
    Ok(())
}

fn run_search(config: &AppConfig, filter: &FilterArgs, limit: usize, json: bool) -> Result<()> {
    let library = Library::open(&config.library)?;
    let records = library.search(&filter.to_query().limit(limit))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    println!("{} images:", records.len());
    for r in &records {
        let missing = if r.file_exists() { "" } else { " (missing)" };
        println!(
            "  #{} {} [{}] {}x{} {} {}{}",
            r.id, r.filename, r.category, r.width, r.height, r.source, r.tags.join(","), missing
        );
    }
    Ok(())
}

fn run_stats(config: &AppConfig, json: bool) -> Result<()> {
    let library = Library::open(&config.library)?;
    let stats = library.stats()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    println!("Library Statistics ({}):", config.library.path);
    println!("  Images: {}", stats.total_images);
    println!("  Tags: {}", stats.tag_count);
    println!("  Categories:");
    for (category, count) in &stats.categories {
        println!("    {} ({})", category, count);
    }
    println!("  Sources:");
    for (source, count) in &stats.sources {
        println!("    {} ({})", source, count);
    }
    Ok(())
}

fn print_list(title: &str, items: &[String], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(items)?);
    } else {
        println!("{}:", title);
        for item in items {
            println!("  {}", item);
        }
    }
    Ok(())
}

async fn run_pick(config: &AppConfig, inputs: NodeInputs, output: &Path) -> Result<()> {
    let library = Library::open(&config.library)?;
    let sessions = SessionManager::new(library.clone(), config)?;
    let ctx = NodeContext { library, sessions };

    let outputs = NodeRegistry::new().run("LoadImageFromLibrary", &ctx, inputs).await?;
    let frames = outputs
        .into_iter()
        .next()
        .and_then(|v| v.into_images())
        .ok_or_else(|| StockpileError::Validation("Node produced no images".to_string()))?;
    write_frames(&frames, output, "picked")
}

fn write_frames(frames: &[video::Frame], output: &Path, prefix: &str) -> Result<()> {
    if frames.is_empty() {
        warn!("Nothing to write");
        return Ok(());
    }
    let written = video::save_frames(frames, output, prefix)?;
    println!("Wrote {} frames to {:?}", written.len(), output);
    Ok(())
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output, force } => {
            if output.exists() && !force {
                return Err(StockpileError::Config(format!(
                    "{} already exists. Use --force to overwrite",
                    output.display()
                )));
            }
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
    }

    Ok(())
}
