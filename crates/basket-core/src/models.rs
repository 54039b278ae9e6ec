//! Data models for Basket

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Currency of record for a receipt
///
/// The resolver only assigns a code; no conversion ever happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CurrencyCode {
    Eur,
    Usd,
    Cad,
    Gbp,
    Jpy,
    Aud,
    Cny,
}

impl CurrencyCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eur => "EUR",
            Self::Usd => "USD",
            Self::Cad => "CAD",
            Self::Gbp => "GBP",
            Self::Jpy => "JPY",
            Self::Aud => "AUD",
            Self::Cny => "CNY",
        }
    }

    /// All supported currencies
    pub fn all() -> &'static [CurrencyCode] {
        &[
            Self::Eur,
            Self::Usd,
            Self::Cad,
            Self::Gbp,
            Self::Jpy,
            Self::Aud,
            Self::Cny,
        ]
    }
}

impl std::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CurrencyCode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "EUR" => Ok(Self::Eur),
            "USD" => Ok(Self::Usd),
            "CAD" => Ok(Self::Cad),
            "GBP" => Ok(Self::Gbp),
            "JPY" => Ok(Self::Jpy),
            "AUD" => Ok(Self::Aud),
            "CNY" => Ok(Self::Cny),
            _ => Err(format!("Unknown currency code: {}", s)),
        }
    }
}

/// Processing status of a receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    /// Placeholder created, extraction has not succeeded yet
    #[default]
    Pending,
    /// Header and items committed
    Processed,
    /// Last processing attempt failed (see error_message)
    Failed,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ReceiptStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown receipt status: {}", s)),
        }
    }
}

/// A stored receipt header
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub id: i64,
    /// Owner of the receipt (user id from the upload request)
    pub owner_id: String,
    pub store_name: Option<String>,
    pub purchase_date: NaiveDate,
    /// True when the purchase date could not be read and today was used instead
    pub date_inferred: bool,
    pub total_amount: f64,
    /// Sum of item discounts
    pub total_discount: f64,
    pub currency_code: CurrencyCode,
    /// How the currency was determined
    pub currency_evidence: Option<String>,
    /// Blob storage path, None until the upload completes
    pub image_path: Option<String>,
    pub status: ReceiptStatus,
    pub processing_attempts: i64,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Resolved header fields written by the persistence writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptHeader {
    pub store_name: Option<String>,
    pub purchase_date: NaiveDate,
    pub date_inferred: bool,
    pub total_amount: f64,
    pub total_discount: f64,
    pub currency_code: CurrencyCode,
    pub currency_evidence: Option<String>,
}

/// A stored receipt line item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptItem {
    pub id: i64,
    pub receipt_id: i64,
    /// Name as read from the receipt
    pub raw_name: String,
    /// Canonical name from the translation cache
    pub readable_name: String,
    pub unit_price: f64,
    pub quantity: f64,
    pub discount_amount: f64,
    /// Price before discount, only set when a discount was detected
    pub original_unit_price: Option<f64>,
    pub is_discounted: bool,
    pub total_price: f64,
    pub category_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A normalized line item ready to be inserted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReceiptItem {
    pub raw_name: String,
    pub readable_name: String,
    pub unit_price: f64,
    pub quantity: f64,
    pub discount_amount: f64,
    pub original_unit_price: Option<f64>,
    pub category_id: Option<i64>,
}

impl NewReceiptItem {
    pub fn is_discounted(&self) -> bool {
        self.discount_amount > 0.0 || self.original_unit_price.is_some()
    }

    /// Line total after discount
    pub fn total_price(&self) -> f64 {
        let total = self.unit_price * self.quantity - self.discount_amount;
        (total * 100.0).round() / 100.0
    }
}

/// Receipt header with its line items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptWithItems {
    #[serde(flatten)]
    pub receipt: Receipt,
    pub items: Vec<ReceiptItem>,
}

/// A translation cache entry
///
/// `original_name` and `readable_name` are each unique (case-insensitive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationEntry {
    pub id: i64,
    /// Corrected spelling of the item name
    pub original_name: String,
    /// Canonical English name
    pub readable_name: String,
    pub category_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A translation queued for insertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTranslation {
    pub original_name: String,
    pub readable_name: String,
    pub category_id: Option<i64>,
}

/// A spending category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    /// Comma-separated hints passed to the extraction model
    pub keywords: Option<String>,
}
