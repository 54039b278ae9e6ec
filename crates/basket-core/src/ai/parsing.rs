//! Parsing and validation of model output
//!
//! Models wrap JSON in prose or markdown code fences. Parsing first strips
//! fences, then takes the outermost `{...}` span, then deserializes into a
//! lenient wire shape that is validated into the typed result.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::error::{Error, Result};

use super::types::{ItemTranslation, RawExtraction, RawItem};

/// Maximum length of raw model output kept in error messages
const RAW_PREVIEW_LEN: usize = 200;

/// Extraction output that could not be turned into a [`RawExtraction`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionParseError {
    #[error("no JSON object in model output | Raw: {raw}")]
    NoJson { raw: String },

    #[error("invalid JSON in model output: {message} | Raw: {raw}")]
    InvalidJson { message: String, raw: String },

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

fn preview(s: &str) -> String {
    if s.len() > RAW_PREVIEW_LEN {
        let mut end = RAW_PREVIEW_LEN;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    } else {
        s.to_string()
    }
}

/// Remove a surrounding markdown code fence (```json ... ```), if any
pub fn strip_code_fences(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let after_open = &trimmed[open + 3..];
    // Skip the language tag on the opening fence line
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_open[body_start..];
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// Locate the outermost JSON object in a model response
fn find_json_object(response: &str) -> Option<&str> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (start < end).then(|| &response[start..=end])
}

/// Extraction result as the model writes it, before validation
#[derive(Debug, Deserialize)]
struct WireExtraction {
    #[serde(default)]
    store_name: Option<String>,
    #[serde(default)]
    purchase_date: Option<String>,
    #[serde(default)]
    total_amount: Option<Value>,
    #[serde(default)]
    currency_code: Option<String>,
    #[serde(default)]
    currency_evidence: Option<String>,
    #[serde(default)]
    items: Vec<WireItem>,
}

#[derive(Debug, Deserialize)]
struct WireItem {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    unit_price: Option<Value>,
    #[serde(default)]
    quantity: Option<Value>,
    #[serde(default)]
    category_id: Option<Value>,
    #[serde(default)]
    discount_amount: Option<Value>,
    #[serde(default)]
    original_unit_price: Option<Value>,
}

/// Read a JSON number, also accepting numeric strings like "3,49" or "€3.49"
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
                .collect();
            cleaned.replace(',', ".").parse().ok()
        }
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

fn optional_number(
    value: &Option<Value>,
    field: &str,
) -> std::result::Result<Option<f64>, ExtractionParseError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => number(v).map(Some).ok_or_else(|| ExtractionParseError::InvalidValue {
            field: field.to_string(),
            reason: format!("not a number: {}", v),
        }),
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Parse extraction output and validate it against the offered category ids
pub fn parse_extraction(
    response: &str,
    category_ids: &HashSet<i64>,
) -> std::result::Result<RawExtraction, ExtractionParseError> {
    let body = strip_code_fences(response);
    let json_str = find_json_object(body).ok_or_else(|| ExtractionParseError::NoJson {
        raw: preview(response),
    })?;

    let wire: WireExtraction =
        serde_json::from_str(json_str).map_err(|e| ExtractionParseError::InvalidJson {
            message: e.to_string(),
            raw: preview(json_str),
        })?;

    validate_extraction(wire, category_ids)
}

fn validate_extraction(
    wire: WireExtraction,
    category_ids: &HashSet<i64>,
) -> std::result::Result<RawExtraction, ExtractionParseError> {
    let total_amount = optional_number(&wire.total_amount, "total_amount")?
        .ok_or(ExtractionParseError::MissingField("total_amount"))?;
    if total_amount < 0.0 {
        return Err(ExtractionParseError::InvalidValue {
            field: "total_amount".to_string(),
            reason: format!("negative total {}", total_amount),
        });
    }

    let mut items = Vec::with_capacity(wire.items.len());
    for (index, item) in wire.items.into_iter().enumerate() {
        let Some(name) = non_blank(item.name) else {
            debug!(index, "Dropping extracted item without a name");
            continue;
        };

        let unit_price = optional_number(&item.unit_price, "unit_price")?.ok_or(
            ExtractionParseError::InvalidValue {
                field: format!("items[{}].unit_price", index),
                reason: "missing".to_string(),
            },
        )?;
        if unit_price < 0.0 {
            return Err(ExtractionParseError::InvalidValue {
                field: format!("items[{}].unit_price", index),
                reason: format!("negative price {}", unit_price),
            });
        }

        let quantity = optional_number(&item.quantity, "quantity")?.unwrap_or(1.0);
        if quantity <= 0.0 {
            return Err(ExtractionParseError::InvalidValue {
                field: format!("items[{}].quantity", index),
                reason: format!("quantity must be positive, got {}", quantity),
            });
        }

        // Models often write discounts as negative amounts
        let discount_amount = optional_number(&item.discount_amount, "discount_amount")?
            .map(f64::abs)
            .unwrap_or(0.0);

        let original_unit_price = optional_number(&item.original_unit_price, "original_unit_price")?
            .filter(|p| *p > 0.0)
            .filter(|p| discount_amount > 0.0 || *p > unit_price);

        let category_id = match item.category_id.as_ref().and_then(number) {
            Some(id) if id.fract() == 0.0 && category_ids.contains(&(id as i64)) => Some(id as i64),
            Some(id) => {
                debug!(index, category_id = id, "Dropping category outside the offered set");
                None
            }
            None => None,
        };

        items.push(RawItem {
            name,
            unit_price,
            quantity,
            category_id,
            discount_amount,
            original_unit_price,
        });
    }

    let currency_code = non_blank(wire.currency_code)
        .map(|c| c.to_uppercase())
        .filter(|c| c != "NULL");

    Ok(RawExtraction {
        store_name: non_blank(wire.store_name),
        purchase_date: non_blank(wire.purchase_date),
        total_amount,
        currency_code,
        currency_evidence: non_blank(wire.currency_evidence),
        items,
    })
}

#[derive(Debug, Deserialize)]
struct WireTranslations {
    #[serde(default)]
    items: Vec<WireTranslation>,
}

#[derive(Debug, Deserialize)]
struct WireTranslation {
    #[serde(default)]
    raw_name: Option<String>,
    #[serde(default)]
    corrected_name: Option<String>,
    #[serde(default)]
    readable_name: Option<String>,
    #[serde(default)]
    category_id: Option<Value>,
}

/// Parse translation output, keeping only entries for names that were asked for
///
/// Entries with a blank readable name are dropped. A missing corrected name
/// falls back to the raw name. Category ids outside the offered set are cleared.
pub fn parse_translations(
    response: &str,
    requested: &[String],
    category_ids: &HashSet<i64>,
) -> Result<Vec<ItemTranslation>> {
    let body = strip_code_fences(response);
    let json_str = find_json_object(body).ok_or_else(|| {
        Error::InvalidData(format!(
            "No JSON found in translation response | Raw: {}",
            preview(response)
        ))
    })?;

    let wire: WireTranslations = serde_json::from_str(json_str).map_err(|e| {
        Error::InvalidData(format!(
            "Invalid translation JSON from AI: {} | Raw: {}",
            e,
            preview(json_str)
        ))
    })?;

    let mut translations = Vec::with_capacity(wire.items.len());
    for (index, entry) in wire.items.into_iter().enumerate() {
        // Models sometimes drop raw_name; fall back to the request order
        let raw_name = non_blank(entry.raw_name).or_else(|| requested.get(index).cloned());
        let Some(raw_name) = raw_name else {
            continue;
        };
        let Some(requested_name) = requested
            .iter()
            .find(|r| r.trim().eq_ignore_ascii_case(raw_name.trim()))
        else {
            debug!(raw_name = %raw_name, "Ignoring translation for a name that was not requested");
            continue;
        };
        let Some(readable_name) = non_blank(entry.readable_name) else {
            continue;
        };
        let corrected_name = non_blank(entry.corrected_name).unwrap_or_else(|| requested_name.trim().to_string());
        let category_id = entry
            .category_id
            .as_ref()
            .and_then(number)
            .filter(|id| id.fract() == 0.0)
            .map(|id| id as i64)
            .filter(|id| category_ids.contains(id));

        translations.push(ItemTranslation {
            raw_name: requested_name.clone(),
            corrected_name,
            readable_name,
            category_id,
        });
    }

    Ok(translations)
}
