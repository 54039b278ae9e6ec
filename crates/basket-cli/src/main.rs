//! Basket CLI - Receipt ingestion and normalization
//!
//! Usage:
//!   basket init                      Initialize database
//!   basket serve --port 3000         Start web server
//!   basket ingest --file photo.jpg   Run a receipt through the pipeline
//!   basket receipts list             Show stored receipts

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt),
        Commands::Serve {
            port,
            host,
            no_auth,
            storage_dir,
            public_url,
        } => {
            commands::cmd_serve(
                &cli.db,
                &host,
                port,
                no_auth,
                cli.no_encrypt,
                storage_dir.as_deref(),
                public_url.as_deref(),
            )
            .await
        }
        Commands::Ingest {
            file,
            owner,
            storage_dir,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let pipeline = commands::build_pipeline(db, storage_dir.as_deref())?;
            commands::cmd_ingest(&pipeline, &file, &owner).await
        }
        Commands::Reprocess {
            id,
            owner,
            storage_dir,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let pipeline = commands::build_pipeline(db, storage_dir.as_deref())?;
            commands::cmd_reprocess(&pipeline, id, &owner).await
        }
        Commands::Receipts { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                ReceiptsAction::List { owner, limit } => {
                    commands::cmd_receipts_list(&db, &owner, limit)
                }
                ReceiptsAction::Show { id, owner, json } => {
                    commands::cmd_receipts_show(&db, id, &owner, json)
                }
                ReceiptsAction::Partial { owner } => {
                    commands::cmd_receipts_partial(&db, owner.as_deref())
                }
            }
        }
        Commands::Categories => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_categories(&db)
        }
        Commands::Translations { limit } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_translations(&db, limit)
        }
        Commands::Prompts { action } => match action {
            PromptsAction::List => commands::cmd_prompts_list(),
        },
    }
}
