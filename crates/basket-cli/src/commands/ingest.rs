//! Pipeline commands: ingest a new image, reprocess an existing receipt

use std::path::Path;

use anyhow::{Context, Result};
use basket_core::{IngestError, IngestionPipeline, ProcessedReceipt};

use super::receipts::print_receipt;

/// Read an image from disk and run it through the full pipeline
pub async fn cmd_ingest(pipeline: &IngestionPipeline, file: &Path, owner: &str) -> Result<()> {
    let image = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    println!("📷 Ingesting {} ({} bytes)...", file.display(), image.len());

    match pipeline.ingest(&image, owner).await {
        Ok(processed) => {
            print_processed(&processed);
            Ok(())
        }
        Err(e) => Err(report_failure(e)),
    }
}

/// Re-run extraction, normalization and persistence for a stored receipt
pub async fn cmd_reprocess(
    pipeline: &IngestionPipeline,
    receipt_id: i64,
    owner: &str,
) -> Result<()> {
    println!("🔄 Reprocessing receipt #{}...", receipt_id);

    match pipeline.process(receipt_id, owner).await {
        Ok(processed) => {
            print_processed(&processed);
            Ok(())
        }
        Err(e) => Err(report_failure(e)),
    }
}

pub(crate) fn print_processed(processed: &ProcessedReceipt) {
    print_receipt(&processed.receipt);

    println!(
        "   Currency source: {:?}    Items total: {:.2}",
        processed.currency_source, processed.items_total
    );
    if processed.translations_inserted > 0 {
        println!(
            "   📚 {} new translation(s) cached",
            processed.translations_inserted
        );
    }
    if processed.degraded {
        println!("   ⚠️  Some item names could not be translated; raw names were kept");
    }
    println!("✅ Receipt #{} processed", processed.id());
}

fn report_failure(e: IngestError) -> anyhow::Error {
    if let Some(id) = e.receipt_id() {
        eprintln!("❌ Receipt #{} failed ({})", id, e.kind());
        if e.is_retryable() {
            eprintln!("   Retry with: basket reprocess --id {}", id);
        }
    }
    anyhow::Error::new(e)
}
