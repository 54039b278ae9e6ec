//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `open_blob_store` / `build_pipeline` - Wiring for pipeline commands
//! - `cmd_init` - Initialize the database

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use basket_core::{AIClient, Database, IngestionPipeline, LocalBlobStore, PipelineConfig};

/// Storage directory used when neither --storage-dir nor BASKET_STORAGE_DIR is set
pub const DEFAULT_STORAGE_DIR: &str = "receipts";

/// Public base URL used when BASKET_PUBLIC_URL is not set
pub const DEFAULT_PUBLIC_URL: &str = "http://127.0.0.1:3000";

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow!("Database path must be valid UTF-8"))?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Resolve the blob directory: flag, then BASKET_STORAGE_DIR, then ./receipts
pub fn resolve_storage_dir(flag: Option<&Path>) -> PathBuf {
    flag.map(Path::to_path_buf)
        .or_else(|| {
            std::env::var("BASKET_STORAGE_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR))
}

/// Open the local blob store, signing with BASKET_SIGNING_KEY
pub fn open_blob_store(storage_dir: &Path, public_url: &str) -> Result<Arc<LocalBlobStore>> {
    let signing_key = std::env::var("BASKET_SIGNING_KEY")
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            anyhow!("BASKET_SIGNING_KEY is not set (needed to sign receipt image URLs)")
        })?;

    let store = LocalBlobStore::new(storage_dir, public_url, signing_key)
        .with_context(|| format!("Failed to open storage at {}", storage_dir.display()))?;
    Ok(Arc::new(store))
}

/// Wire a pipeline from the environment for one-shot CLI runs
pub fn build_pipeline(db: Database, storage_dir: Option<&Path>) -> Result<IngestionPipeline> {
    let ai = AIClient::from_env().ok_or_else(|| {
        anyhow!(
            "No AI backend configured. Set OPENAI_COMPATIBLE_HOST \
             (or AI_BACKEND=ollama with OLLAMA_HOST)"
        )
    })?;

    let public_url = std::env::var("BASKET_PUBLIC_URL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_PUBLIC_URL.to_string());
    let blobs = open_blob_store(&resolve_storage_dir(storage_dir), &public_url)?;

    let config = PipelineConfig::load().context("Failed to load pipeline configuration")?;

    Ok(IngestionPipeline::new(db, blobs, ai, config))
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let db = open_db(db_path, no_encrypt)?;

    let seeded = db
        .seed_default_categories()
        .context("Failed to seed categories")?;
    println!("   Seeded {} default categories", seeded);

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Start the server: basket serve");
    println!("  2. Ingest a receipt: basket ingest --file receipt.jpg");

    Ok(())
}
