use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI for mirroring GIPHY profiles into Telegram sticker packs
#[derive(Parser)]
#[command(name = "packrat")]
#[command(about = "Mirrors GIPHY profiles and collections into Telegram sticker packs", long_about = None)]
pub struct Cli {
    /// TOML config file; falls back to environment variables
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Synchronize new items from a profile into its sticker pack
    Sync {
        /// GIPHY profile handle or URL
        profile: String,
        /// Named collection; omit to mirror the profile feed
        #[arg(short = 'C', long)]
        collection: Option<String>,
        /// Maximum new items to process this run
        #[arg(long)]
        cap: Option<usize>,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// List discovered collections for a profile
    Collections {
        /// GIPHY profile handle or URL
        profile: String,
    },
    /// Show how many items the ledger has recorded
    Status {
        /// GIPHY profile handle or URL
        profile: String,
        /// Named collection; omit for the profile feed
        #[arg(short = 'C', long)]
        collection: Option<String>,
    },
}
