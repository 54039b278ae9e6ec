//! CLI argument definitions using clap
//!
//! The command implementations live in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Basket - Turn receipt photos into structured, normalized purchase data
#[derive(Parser)]
#[command(name = "basket")]
#[command(about = "Self-hosted receipt ingestion and normalization", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "basket.db", global = true)]
    pub db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set BASKET_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database and seed default categories
    Init,

    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Disable authentication (for local development only)
        ///
        /// WARNING: Do not use this flag when exposing the server to a network.
        /// By default, the server requires Cloudflare Access headers or an API key.
        #[arg(long)]
        no_auth: bool,

        /// Directory for receipt images (default: $BASKET_STORAGE_DIR or ./receipts)
        #[arg(long)]
        storage_dir: Option<PathBuf>,

        /// Public base URL used in signed image links
        /// (default: $BASKET_PUBLIC_URL or http://HOST:PORT)
        #[arg(long)]
        public_url: Option<String>,
    },

    /// Ingest a receipt image through the full pipeline
    ///
    /// The extraction model fetches the image from a signed URL, so
    /// BASKET_PUBLIC_URL must point at a running `basket serve`.
    Ingest {
        /// Receipt image (JPEG, PNG, WebP or HEIC)
        #[arg(short, long)]
        file: PathBuf,

        /// Owner id to file the receipt under
        #[arg(short, long, default_value = "local-dev")]
        owner: String,

        /// Directory for receipt images (default: $BASKET_STORAGE_DIR or ./receipts)
        #[arg(long)]
        storage_dir: Option<PathBuf>,
    },

    /// Re-run extraction and normalization for an existing receipt
    Reprocess {
        /// Receipt ID
        #[arg(long)]
        id: i64,

        /// Owner id the receipt belongs to
        #[arg(short, long, default_value = "local-dev")]
        owner: String,

        /// Directory for receipt images (default: $BASKET_STORAGE_DIR or ./receipts)
        #[arg(long)]
        storage_dir: Option<PathBuf>,
    },

    /// Inspect stored receipts
    Receipts {
        #[command(subcommand)]
        action: ReceiptsAction,
    },

    /// List categories
    Categories,

    /// List cached item name translations
    Translations {
        /// Maximum number of entries to show
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Manage AI prompts
    Prompts {
        #[command(subcommand)]
        action: PromptsAction,
    },
}

#[derive(Subcommand)]
pub enum ReceiptsAction {
    /// List receipts for an owner
    List {
        /// Owner id
        #[arg(short, long, default_value = "local-dev")]
        owner: String,

        /// Maximum number of receipts to show
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Show a receipt with its line items
    Show {
        /// Receipt ID
        id: i64,

        /// Owner id
        #[arg(short, long, default_value = "local-dev")]
        owner: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List receipts left without items by an interrupted run
    Partial {
        /// Restrict to one owner (default: all owners)
        #[arg(short, long)]
        owner: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum PromptsAction {
    /// List all prompts and their override status
    List,
}
