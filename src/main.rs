use anyhow::Context;
use asset_mirror::commands::*;
use asset_mirror::core::{config::SyncConfig, print_error};
use clap::{Args, Parser, Subcommand};
use std::env;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "asset-mirror")]
#[command(about = "Mirror game versions into a verified cache and publish one branch per version")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Path to a config file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Selection {
    /// Only process this version id
    #[arg(long, value_name = "ID")]
    version: Option<String>,
    /// Stop at the first version that fails
    #[arg(long)]
    fail_fast: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, verify and materialize version trees
    Download {
        #[command(flatten)]
        selection: Selection,
        /// Redo versions whose download marker is stale
        #[arg(short, long)]
        force: bool,
        /// Keep locale files under */lang/
        #[arg(short = 'l', long)]
        include_lang: bool,
        /// Write a restore ledger per version
        #[arg(short = 'r', long)]
        create_restore: bool,
        /// Keep client archives in the cache
        #[arg(long, conflicts_with = "drop_archives")]
        keep_archives: bool,
        /// Evict client archives once a version is materialized
        #[arg(long)]
        drop_archives: bool,
    },
    /// Commit and push materialized trees to per-version branches
    Publish {
        #[command(flatten)]
        selection: Selection,
    },
    /// Rebuild output trees from restore ledgers without network access
    Restore {
        #[command(flatten)]
        selection: Selection,
    },
    /// Validate upstream documents against the typed model
    Check {
        #[command(flatten)]
        selection: Selection,
        /// Re-hash every blob in the cache
        #[arg(long)]
        verify_cache: bool,
    },
}

fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = SyncConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let summary = match cli.command {
        Commands::Download {
            selection,
            force,
            include_lang,
            create_restore,
            keep_archives,
            drop_archives,
        } => execute_download(
            &config,
            DownloadOptions {
                version: selection.version,
                force,
                include_lang,
                create_restore,
                keep_archives: match (keep_archives, drop_archives) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
                fail_fast: selection.fail_fast,
            },
        )
        .context("Download failed")?,
        Commands::Publish { selection } => execute_publish(
            &config,
            PublishOptions {
                version: selection.version,
                fail_fast: selection.fail_fast,
            },
        )
        .context("Publish failed")?,
        Commands::Restore { selection } => execute_restore(
            &config,
            RestoreOptions {
                version: selection.version,
                fail_fast: selection.fail_fast,
            },
        )
        .context("Restore failed")?,
        Commands::Check {
            selection,
            verify_cache,
        } => execute_check(
            &config,
            CheckOptions {
                version: selection.version,
                verify_cache,
                fail_fast: selection.fail_fast,
            },
        )
        .context("Check failed")?,
    };

    Ok(summary.is_success())
}

fn main() {
    let cli = Cli::parse();

    // Configure logging based on --debug flag
    if cli.debug {
        env::set_var("RUST_LOG", "debug");
    } else {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            print_error(&format!("{e:#}"));
            std::process::exit(1);
        }
    }
}
