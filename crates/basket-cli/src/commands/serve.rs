//! Server command implementation

use std::path::Path;

use anyhow::{Context, Result};
use basket_core::PipelineConfig;

use super::{open_blob_store, open_db, resolve_storage_dir};

pub async fn cmd_serve(
    db_path: &Path,
    host: &str,
    port: u16,
    no_auth: bool,
    no_encrypt: bool,
    storage_dir: Option<&Path>,
    public_url: Option<&str>,
) -> Result<()> {
    let storage_dir = resolve_storage_dir(storage_dir);
    let public_url = public_url
        .map(str::to_string)
        .or_else(|| std::env::var("BASKET_PUBLIC_URL").ok().filter(|s| !s.is_empty()))
        .unwrap_or_else(|| format!("http://{}:{}", host, port));

    println!("🚀 Starting Basket web server...");
    println!("   Database: {}", db_path.display());
    println!("   Storage: {}", storage_dir.display());
    println!("   Listening: http://{}:{}", host, port);
    println!("   Signed URLs: {}/files/...", public_url.trim_end_matches('/'));

    let api_keys =
        basket_server::parse_api_keys(&std::env::var("BASKET_API_KEYS").unwrap_or_default());

    if no_auth {
        println!();
        println!("   ⚠️  Authentication DISABLED - do not expose to network!");
    } else {
        println!("   🔒 Authentication: Cloudflare Access (header)");
        if !api_keys.is_empty() {
            println!(
                "   🔑 API keys: {} configured (BASKET_API_KEYS)",
                api_keys.len()
            );
        }
    }
    if no_encrypt {
        println!("   ⚠️  Encryption DISABLED (--no-encrypt)");
    }
    println!();
    println!("   Press Ctrl+C to stop");

    let db = open_db(db_path, no_encrypt)?;

    // Idempotent
    db.seed_default_categories()
        .context("Failed to seed categories")?;

    let blobs = open_blob_store(&storage_dir, &public_url)?;
    let pipeline_config = PipelineConfig::load().context("Failed to load pipeline configuration")?;

    let config = basket_server::ServerConfig {
        require_auth: !no_auth,
        allowed_origins: vec![],
        api_keys,
    };

    basket_server::serve_with_config(db, blobs, pipeline_config, host, port, config).await?;

    Ok(())
}
