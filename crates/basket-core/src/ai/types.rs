//! AI backend response types
//!
//! These types are backend-agnostic and produced by every implementation
//! after parsing and validation.

use serde::{Deserialize, Serialize};

/// Structured guess returned by the extraction call
///
/// Values are validated but not yet resolved: the date is still the string
/// printed on the receipt and the currency is only a hint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawExtraction {
    pub store_name: Option<String>,
    /// Date as printed (any day/month order)
    pub purchase_date: Option<String>,
    pub total_amount: f64,
    /// Three-letter code when the model saw one explicitly
    pub currency_code: Option<String>,
    /// Symbol, code or tax marker the model saw
    pub currency_evidence: Option<String>,
    pub items: Vec<RawItem>,
}

/// A line item as read from the receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub name: String,
    pub unit_price: f64,
    pub quantity: f64,
    /// Always a member of the category set offered to the model
    pub category_id: Option<i64>,
    pub discount_amount: f64,
    pub original_unit_price: Option<f64>,
}

/// Correction and translation of one item name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemTranslation {
    /// Name as it was sent to the model
    pub raw_name: String,
    /// Spelling-corrected full product name
    pub corrected_name: String,
    /// Canonical English name
    pub readable_name: String,
    #[serde(default)]
    pub category_id: Option<i64>,
}
