//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `categories` - Category store (read-only to the pipeline)
//! - `receipts` - Receipt placeholders, headers, and line items
//! - `translations` - Item-name translation cache

use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::{Error, Result};

mod categories;
mod receipts;
mod translations;

pub use categories::DEFAULT_CATEGORIES;
pub use translations::InsertOutcome;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "BASKET_DB_KEY";

/// How long a connection waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the same key,
/// regardless of database path.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Changing this invalidates every existing encrypted database
    const APP_SALT: &[u8; 16] = b"basket-salt-v1-x";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    let hash = Argon2::default()
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    let hash_out = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_out.as_bytes()))
}

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    db_path: String,
}

impl Database {
    /// Create a new encrypted database connection pool
    ///
    /// Requires `BASKET_DB_KEY` to be set. The key is derived from the
    /// passphrase via Argon2 and handed to SQLCipher.
    pub fn new(path: &str) -> Result<Self> {
        match std::env::var(DB_KEY_ENV).ok() {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Database encryption required. Set {} environment variable with your passphrase, \
                or use --no-encrypt for unencrypted databases (not recommended for production).",
                DB_KEY_ENV
            ))),
        }
    }

    /// Create a new unencrypted database connection pool
    ///
    /// Only use for development or testing.
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Create a new database with an explicit encryption key
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let key_pragma = match passphrase {
            Some(pass) => Some(format!("PRAGMA key = 'x\"{}\"';", derive_key(pass)?)),
            None => None,
        };

        // Per-connection settings: the key must come first, and
        // foreign_keys/busy_timeout do not persist in the file.
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            if let Some(pragma) = &key_pragma {
                conn.execute_batch(pragma)?;
            }
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(())
        });

        let pool = Pool::builder().max_size(10).build(manager)?;

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create a throwaway database (for testing)
    ///
    /// Uses a temporary file rather than `:memory:` so that every pooled
    /// connection sees the same database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "basket_test_{}_{}.db",
            std::process::id(),
            id
        ));
        let path = path.to_string_lossy().to_string();

        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(format!("{}-wal", path));
        let _ = std::fs::remove_file(format!("{}-shm", path));

        Self::new_unencrypted(&path)
    }

    /// Check if the database is encrypted
    pub fn is_encrypted(&self) -> Result<bool> {
        let conn = self.conn()?;
        // SQLCipher sets cipher_version if encryption is active
        let result: rusqlite::Result<String> =
            conn.query_row("PRAGMA cipher_version;", [], |row| row.get(0));
        Ok(result.is_ok() && std::env::var(DB_KEY_ENV).is_ok())
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- WAL mode: readers don't block the single writer
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            -- Spending categories (closed set offered to the extraction model)
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                keywords TEXT,                               -- comma separated hints
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            -- Receipts: created as a placeholder at upload time, filled in by the writer
            CREATE TABLE IF NOT EXISTS receipts (
                id INTEGER PRIMARY KEY,
                owner_id TEXT NOT NULL,
                store_name TEXT,
                purchase_date DATE NOT NULL,                 -- YYYY-MM-DD
                date_inferred INTEGER NOT NULL DEFAULT 0,    -- 1 when the date fell back to today
                total_amount REAL NOT NULL DEFAULT 0,
                total_discount REAL NOT NULL DEFAULT 0,
                currency_code TEXT NOT NULL,                 -- EUR, USD, CAD, GBP, JPY, AUD, CNY
                currency_evidence TEXT,
                image_path TEXT,                             -- NULL until the upload completes
                status TEXT NOT NULL DEFAULT 'pending',      -- pending, processed, failed
                processing_attempts INTEGER NOT NULL DEFAULT 0,
                last_processed_at DATETIME,
                error_message TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_receipts_owner ON receipts(owner_id, purchase_date);
            CREATE INDEX IF NOT EXISTS idx_receipts_status ON receipts(status);

            -- Line items: replaced as a whole batch on every successful commit
            CREATE TABLE IF NOT EXISTS receipt_items (
                id INTEGER PRIMARY KEY,
                receipt_id INTEGER NOT NULL REFERENCES receipts(id) ON DELETE CASCADE,
                raw_name TEXT NOT NULL,
                readable_name TEXT NOT NULL,
                unit_price REAL NOT NULL,
                quantity REAL NOT NULL DEFAULT 1,
                discount_amount REAL NOT NULL DEFAULT 0,
                original_unit_price REAL,                    -- only set when discounted
                is_discounted INTEGER NOT NULL DEFAULT 0,
                total_price REAL NOT NULL,
                category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_receipt_items_receipt ON receipt_items(receipt_id);
            CREATE INDEX IF NOT EXISTS idx_receipt_items_category ON receipt_items(category_id);

            -- Translation cache shared by all receipts
            -- Both names are unique regardless of case; concurrent writers rely on it
            CREATE TABLE IF NOT EXISTS item_translations (
                id INTEGER PRIMARY KEY,
                original_name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                readable_name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        info!("Database schema initialized");
        Ok(())
    }
}
