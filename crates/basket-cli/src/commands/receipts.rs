//! Receipt inspection commands

use anyhow::{anyhow, Result};
use basket_core::{Database, Receipt, ReceiptStatus, ReceiptWithItems};

use super::truncate;

/// List an owner's receipts, newest first
pub fn cmd_receipts_list(db: &Database, owner: &str, limit: i64) -> Result<()> {
    let receipts = db.list_receipts(owner, limit.max(1))?;

    if receipts.is_empty() {
        println!("No receipts for '{}'", owner);
        return Ok(());
    }

    println!("\n🧾 Receipts for {} ({})", owner, receipts.len());
    println!("{}", "─".repeat(70));
    for receipt in &receipts {
        print_receipt_line(receipt);
    }
    println!();
    Ok(())
}

/// Show one receipt with its items
pub fn cmd_receipts_show(db: &Database, receipt_id: i64, owner: &str, json: bool) -> Result<()> {
    let receipt = db
        .get_receipt_with_items(receipt_id, owner)?
        .ok_or_else(|| anyhow!("Receipt #{} not found for '{}'", receipt_id, owner))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&receipt)?);
    } else {
        print_receipt(&receipt);
    }
    Ok(())
}

/// List receipts whose header landed without items
pub fn cmd_receipts_partial(db: &Database, owner: Option<&str>) -> Result<()> {
    let receipts = db.list_partial_receipts(owner)?;

    if receipts.is_empty() {
        println!("✅ No partially committed receipts");
        return Ok(());
    }

    println!("\n⚠️  Partially committed receipts ({})", receipts.len());
    println!("{}", "─".repeat(70));
    for receipt in &receipts {
        print_receipt_line(receipt);
        println!(
            "         ↳ basket reprocess --id {} --owner {}",
            receipt.id, receipt.owner_id
        );
    }
    println!();
    Ok(())
}

fn status_icon(status: ReceiptStatus) -> &'static str {
    match status {
        ReceiptStatus::Pending => "⏳",
        ReceiptStatus::Processed => "✓",
        ReceiptStatus::Failed => "❌",
    }
}

fn print_receipt_line(receipt: &Receipt) {
    let store = receipt.store_name.as_deref().unwrap_or("Unknown");
    let date_marker = if receipt.date_inferred { "*" } else { "" };
    println!(
        "  #{:<5} {} {:<28} {:>9.2} {}  {}{}",
        receipt.id,
        status_icon(receipt.status),
        truncate(store, 28),
        receipt.total_amount,
        receipt.currency_code,
        receipt.purchase_date,
        date_marker
    );
    if let Some(err) = &receipt.error_message {
        println!("         {}", truncate(err, 60));
    }
}

/// Print a receipt header followed by its item table
pub(crate) fn print_receipt(receipt: &ReceiptWithItems) {
    let header = &receipt.receipt;
    println!();
    println!(
        "🧾 #{} {} ({})",
        header.id,
        header.store_name.as_deref().unwrap_or("Unknown store"),
        header.status.as_str()
    );
    println!(
        "   Date: {}{}",
        header.purchase_date,
        if header.date_inferred {
            " (inferred)"
        } else {
            ""
        }
    );
    println!(
        "   Total: {:.2} {}    Discounts: {:.2}",
        header.total_amount, header.currency_code, header.total_discount
    );
    if let Some(path) = &header.image_path {
        println!("   📷 {}", path);
    }

    if receipt.items.is_empty() {
        println!("   (no items)");
        return;
    }

    println!("   {}", "─".repeat(66));
    for item in &receipt.items {
        let discount = if item.is_discounted {
            format!(" (-{:.2})", item.discount_amount)
        } else {
            String::new()
        };
        println!(
            "   {:<30} {:>5} x {:>7.2} = {:>8.2}{}",
            truncate(&item.readable_name, 30),
            item.quantity,
            item.unit_price,
            item.total_price,
            discount
        );
        if !item.raw_name.eq_ignore_ascii_case(&item.readable_name) {
            println!("     ↳ {}", item.raw_name);
        }
    }
}
