//! Category and translation cache commands

use anyhow::Result;
use basket_core::Database;

use super::truncate;

pub fn cmd_categories(db: &Database) -> Result<()> {
    let categories = db.list_categories()?;

    if categories.is_empty() {
        println!("No categories. Run 'basket init' to seed the defaults.");
        return Ok(());
    }

    println!("{:<5} {:<20} KEYWORDS", "ID", "NAME");
    println!("{}", "-".repeat(70));
    for category in &categories {
        println!(
            "{:<5} {:<20} {}",
            category.id,
            category.name,
            truncate(category.keywords.as_deref().unwrap_or(""), 44)
        );
    }
    Ok(())
}

/// Show the most recent translation cache entries
pub fn cmd_translations(db: &Database, limit: i64) -> Result<()> {
    let entries = db.list_translations(limit.max(1))?;
    let total = db.count_translations()?;

    if entries.is_empty() {
        println!("Translation cache is empty");
        return Ok(());
    }

    println!("{:<30} {:<30} {:>8}", "ORIGINAL", "READABLE", "CATEGORY");
    println!("{}", "-".repeat(70));
    for entry in &entries {
        let category = entry
            .category_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<30} {:<30} {:>8}",
            truncate(&entry.original_name, 30),
            truncate(&entry.readable_name, 30),
            category
        );
    }
    println!();
    println!("Showing {} of {} cached translations", entries.len(), total);
    Ok(())
}
