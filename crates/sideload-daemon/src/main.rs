//! Sideload - Main entry point
//!
//! Downloads releases from the mirror and installs them on attached Android
//! devices. One-shot commands run a single operation; `run` keeps every
//! service alive until interrupted.

mod commands;
mod config;
mod context;
mod credentials;
mod freshness;
mod metadata;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "sideload")]
#[command(about = "Download releases and install them on Android devices")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "sideload.toml")]
    config: PathBuf,

    /// Override the cache directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Override the download directory
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached devices
    Devices,
    /// List catalog entries and their status
    List {
        /// Only show entries whose game or release name contains this text
        #[arg(short, long)]
        filter: Option<String>,
        /// Reconcile installed state against this device
        #[arg(short, long)]
        device: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
        /// Download fresh metadata even if the cached copy is recent
        #[arg(long)]
        force_metadata: bool,
    },
    /// Show one release
    Info {
        release: String,
    },
    /// Download releases, optionally installing them
    Get {
        #[arg(required = true)]
        releases: Vec<String>,
        /// Install after downloading
        #[arg(long, requires = "device")]
        install: bool,
        /// Target device id
        #[arg(short, long)]
        device: Option<String>,
        /// Download fresh metadata even if the cached copy is recent
        #[arg(long)]
        force_metadata: bool,
    },
    /// Install an APK or OBB file that is not in the catalog
    InstallFile {
        file: PathBuf,
        /// Target device id
        #[arg(short, long)]
        device: String,
        /// OBB directory name under /sdcard/Android/obb/
        #[arg(long)]
        obb_package: Option<String>,
    },
    /// Delete downloaded releases
    Delete {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        releases: Vec<String>,
        /// Delete every downloaded release
        #[arg(long)]
        all: bool,
    },
    /// Run all services until interrupted
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Sideload v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;
    if let Some(cache_dir) = args.cache_dir {
        config.paths.cache_dir = cache_dir;
    }
    if let Some(download_dir) = args.download_dir {
        config.paths.download_dir = download_dir;
    }

    info!(
        cache = %config.paths.cache_dir.display(),
        downloads = %config.paths.download_dir.display(),
        "Configuration loaded"
    );

    match args.command {
        Command::Devices => commands::devices(&config).await,
        Command::List {
            filter,
            device,
            json,
            force_metadata,
        } => {
            commands::list(
                &config,
                filter.as_deref(),
                device.as_deref(),
                json,
                force_metadata,
            )
            .await
        }
        Command::Info { release } => commands::info(&config, &release).await,
        Command::Get {
            releases,
            install,
            device,
            force_metadata,
        } => {
            let target = if install { device.as_deref() } else { None };
            commands::get(&config, &releases, target, force_metadata).await
        }
        Command::InstallFile {
            file,
            device,
            obb_package,
        } => commands::install_file(&config, &file, &device, obb_package.as_deref()).await,
        Command::Delete { releases, all } => commands::delete(&config, &releases, all).await,
        Command::Run => commands::run(&config).await,
    }
}
