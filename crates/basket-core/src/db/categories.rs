//! Category store operations

use rusqlite::{params, OptionalExtension};
use tracing::info;

use super::Database;
use crate::error::Result;
use crate::models::Category;

/// Default grocery categories with keyword hints for the extraction model
pub const DEFAULT_CATEGORIES: &[(&str, &str)] = &[
    ("Produce", "fruit,vegetables,herbs,salad,potatoes,onions,bananas,apples"),
    ("Dairy & Eggs", "milk,cheese,yogurt,butter,cream,eggs,quark"),
    ("Meat & Seafood", "chicken,beef,pork,fish,salmon,sausage,ham,minced"),
    ("Bakery", "bread,rolls,croissant,baguette,cake,pastry"),
    ("Pantry", "pasta,rice,flour,sugar,oil,canned,sauce,spices,cereal"),
    ("Frozen", "frozen,ice cream,pizza,frozen vegetables"),
    ("Beverages", "water,juice,soda,coffee,tea,beer,wine,sports drink"),
    ("Snacks", "chips,chocolate,candy,cookies,nuts,crackers"),
    ("Household", "detergent,paper towels,toilet paper,cleaning,bags,foil"),
    ("Personal Care", "shampoo,soap,toothpaste,deodorant,cosmetics"),
    ("Other", ""),
];

impl Database {
    /// Seed the default categories (idempotent - skips existing names)
    pub fn seed_default_categories(&self) -> Result<usize> {
        let conn = self.conn()?;
        let mut inserted = 0;

        for (name, keywords) in DEFAULT_CATEGORIES {
            let keywords = if keywords.is_empty() {
                None
            } else {
                Some(*keywords)
            };
            inserted += conn.execute(
                "INSERT INTO categories (name, keywords) VALUES (?, ?) ON CONFLICT(name) DO NOTHING",
                params![name, keywords],
            )?;
        }

        if inserted > 0 {
            info!(inserted, "Seeded default categories");
        }
        Ok(inserted)
    }

    /// List all categories
    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name, keywords FROM categories ORDER BY id")?;

        let categories = stmt
            .query_map([], |row| {
                Ok(Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    keywords: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(categories)
    }

    /// Get a category by ID
    pub fn get_category(&self, id: i64) -> Result<Option<Category>> {
        let conn = self.conn()?;
        let category = conn
            .query_row(
                "SELECT id, name, keywords FROM categories WHERE id = ?",
                params![id],
                |row| {
                    Ok(Category {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        keywords: row.get(2)?,
                    })
                },
            )
            .optional()?;

        Ok(category)
    }

    /// Create a category, returning its ID (or the existing ID for a duplicate name)
    pub fn create_category(&self, name: &str, keywords: Option<&str>) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO categories (name, keywords) VALUES (?, ?) ON CONFLICT(name) DO NOTHING",
            params![name, keywords],
        )?;
        let id = conn.query_row(
            "SELECT id FROM categories WHERE name = ?",
            params![name],
            |row| row.get(0),
        )?;
        Ok(id)
    }
}
