//! Date and currency disambiguation for extracted receipts
//!
//! Receipts print dates in whatever order the store's locale uses and often
//! show a bare symbol instead of a currency code. The resolver turns the
//! model's raw guesses into a concrete `NaiveDate` and `CurrencyCode`, falling
//! back to today's date or the configured default currency when the signal is
//! missing. It never fails.

use std::sync::OnceLock;

use chrono::{DateTime, Months, NaiveDate};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::models::CurrencyCode;

/// How far back a purchase date may plausibly lie
const PLAUSIBLE_YEARS: u32 = 5;

/// Where a resolved currency came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrencySource {
    /// The model returned a valid ISO code
    Explicit,
    /// Detected from symbols, codes, or tax markers in the evidence text
    Evidence,
    /// Nothing usable; configured default applied
    Default,
}

/// Resolved date and currency for one receipt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub purchase_date: NaiveDate,
    /// True when the raw date was unusable and `now` was substituted
    pub date_inferred: bool,
    pub currency: CurrencyCode,
    pub currency_source: CurrencySource,
}

/// Resolves raw date and currency strings against a deployment default
#[derive(Debug, Clone)]
pub struct DateCurrencyResolver {
    default_currency: CurrencyCode,
}

impl DateCurrencyResolver {
    pub fn new(default_currency: CurrencyCode) -> Self {
        Self { default_currency }
    }

    pub fn default_currency(&self) -> CurrencyCode {
        self.default_currency
    }

    pub fn resolve(
        &self,
        raw_date: Option<&str>,
        raw_currency: Option<&str>,
        currency_evidence: Option<&str>,
        now: NaiveDate,
    ) -> Resolution {
        let (purchase_date, date_inferred) = match raw_date.and_then(|d| resolve_date(d, now)) {
            Some(date) => (date, false),
            None => {
                warn!(
                    raw_date = raw_date.unwrap_or(""),
                    fallback = %now,
                    "Purchase date unusable, falling back to today"
                );
                (now, true)
            }
        };

        let (currency, currency_source) =
            self.resolve_currency(raw_currency, currency_evidence);
        debug!(
            currency = currency.as_str(),
            source = ?currency_source,
            "Resolved receipt currency"
        );

        Resolution {
            purchase_date,
            date_inferred,
            currency,
            currency_source,
        }
    }

    fn resolve_currency(
        &self,
        raw_currency: Option<&str>,
        evidence: Option<&str>,
    ) -> (CurrencyCode, CurrencySource) {
        let raw_currency = raw_currency.map(str::trim).filter(|c| !c.is_empty());

        if let Some(code) = raw_currency
            .filter(|c| c.len() == 3 && c.chars().all(|ch| ch.is_ascii_alphabetic()))
            .and_then(|c| c.parse::<CurrencyCode>().ok())
        {
            return (code, CurrencySource::Explicit);
        }

        // A non-code guess such as "$" still counts as evidence
        let text = [raw_currency, evidence]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        match detect_currency(&text) {
            Some(code) => (code, CurrencySource::Evidence),
            None => (self.default_currency, CurrencySource::Default),
        }
    }
}

/// Parse a printed receipt date, choosing the most plausible reading
///
/// Returns `None` when nothing parses or no reading falls inside the last
/// five years of `now`.
pub fn resolve_date(raw: &str, now: NaiveDate) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let earliest = now
        .checked_sub_months(Months::new(PLAUSIBLE_YEARS * 12))
        .unwrap_or(NaiveDate::MIN);
    let plausible = |d: &NaiveDate| *d >= earliest && *d <= now;

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive()).filter(plausible);
    }

    candidates(raw)
        .into_iter()
        .filter(plausible)
        .min_by_key(|d| (*d - now).num_days().abs())
}

/// Every calendar-valid reading of a numeric date string
fn candidates(raw: &str) -> Vec<NaiveDate> {
    // Drop a trailing time ("14.03.2024 12:31", "2024-03-14T12:31:00")
    let date_part = raw
        .split(|c: char| c.is_whitespace() || c == 'T')
        .next()
        .unwrap_or(raw);

    let segments: Vec<&str> = date_part.split(['-', '/', '.']).collect();
    if segments.len() != 3
        || segments
            .iter()
            .any(|s| s.is_empty() || s.len() > 4 || !s.chars().all(|c| c.is_ascii_digit()))
    {
        return Vec::new();
    }

    let num = |s: &str| s.parse::<u32>().ok();
    let (Some(a), Some(b), Some(c)) = (num(segments[0]), num(segments[1]), num(segments[2]))
    else {
        return Vec::new();
    };

    let mut readings = Vec::new();
    if segments[0].len() == 4 {
        // Year first is always year-month-day
        readings.push((a as i32, b, c));
    } else if segments[2].len() == 4 || segments[2].len() == 2 {
        let year = expand_year(segments[2], c);
        readings.push((year, a, b)); // month/day
        readings.push((year, b, a)); // day/month
    }

    let mut dates: Vec<NaiveDate> = readings
        .into_iter()
        .filter_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d))
        .collect();
    dates.dedup();
    dates
}

fn expand_year(segment: &str, value: u32) -> i32 {
    if segment.len() == 2 {
        2000 + value as i32
    } else {
        value as i32
    }
}

fn iso_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(EUR|USD|CAD|GBP|JPY|AUD|CNY|RMB)\b").expect("valid regex"))
}

fn prefixed_dollar_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(CA|C|AU|A|US|U\.S\.)\$").expect("valid regex"))
}

fn eu_tax_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(MwSt|USt|TVA|IVA|BTW|MVA)\b").expect("valid regex"))
}

fn ca_tax_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(HST|PST|QST|TPS|TVQ)\b").expect("valid regex"))
}

fn au_tax_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bABN\b").expect("valid regex"))
}

/// Detect a currency from free text printed on a receipt
///
/// Checked strongest signal first: ISO codes, prefixed dollar signs, other
/// currency symbols, then country-specific tax markers.
pub fn detect_currency(text: &str) -> Option<CurrencyCode> {
    if text.trim().is_empty() {
        return None;
    }

    if let Some(m) = iso_code_re().find(text) {
        return match m.as_str() {
            "RMB" => Some(CurrencyCode::Cny),
            code => code.parse().ok(),
        };
    }

    if let Some(caps) = prefixed_dollar_re().captures(text) {
        return match &caps[1] {
            "CA" | "C" => Some(CurrencyCode::Cad),
            "AU" | "A" => Some(CurrencyCode::Aud),
            _ => Some(CurrencyCode::Usd),
        };
    }

    if text.contains("CN¥") || text.contains('元') {
        return Some(CurrencyCode::Cny);
    }
    if text.contains('€') {
        return Some(CurrencyCode::Eur);
    }
    if text.contains('£') {
        return Some(CurrencyCode::Gbp);
    }
    if text.contains('¥') || text.contains('円') || text.contains('￥') {
        return Some(CurrencyCode::Jpy);
    }

    if eu_tax_re().is_match(text) {
        return Some(CurrencyCode::Eur);
    }
    if ca_tax_re().is_match(text) {
        return Some(CurrencyCode::Cad);
    }
    if au_tax_re().is_match(text) {
        return Some(CurrencyCode::Aud);
    }

    // Bare dollar sign last: every more specific marker above wins over it
    if text.contains('$') {
        return Some(CurrencyCode::Usd);
    }

    None
}
