//! Pipeline configuration
//!
//! Resolution order, later layers win:
//! 1. Embedded defaults (`config/pipeline.toml`, compiled into the binary)
//! 2. Override file (~/.local/share/basket/config/pipeline.toml)
//! 3. `BASKET_*` environment variables
//!
//! Keys missing from a layer keep the value of the layer below.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::CurrencyCode;

const DEFAULT_CONFIG: &str = include_str!("../../../config/pipeline.toml");

/// Tunables for the ingestion pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Currency used when a receipt gives no signal at all
    pub default_currency: CurrencyCode,
    pub extraction_timeout: Duration,
    pub translation_timeout: Duration,
    /// Applies to each blob store call (upload, sign)
    pub storage_timeout: Duration,
    /// Lifetime of the signed URL handed to the extraction model
    pub signed_url_ttl_secs: u64,
    /// Maximum cached translations sent as few-shot context
    pub few_shot_limit: usize,
    /// Allowed gap between item sum and printed total before warning
    pub total_tolerance: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_currency: CurrencyCode::Eur,
            extraction_timeout: Duration::from_secs(90),
            translation_timeout: Duration::from_secs(45),
            storage_timeout: Duration::from_secs(20),
            signed_url_ttl_secs: 60,
            few_shot_limit: 50,
            total_tolerance: 0.05,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    default_currency: Option<String>,
    extraction_timeout_secs: Option<u64>,
    translation_timeout_secs: Option<u64>,
    storage_timeout_secs: Option<u64>,
    signed_url_ttl_secs: Option<u64>,
    few_shot_limit: Option<usize>,
    total_tolerance: Option<f64>,
}

impl PipelineConfig {
    /// Load defaults, the override file at the default path, then the environment
    pub fn load() -> Result<Self> {
        let mut config = Self::from_toml(DEFAULT_CONFIG)?;
        if let Some(path) = default_config_path() {
            config.apply_file(&path)?;
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load defaults plus a specific override file (no environment)
    pub fn with_config_path(path: &Path) -> Result<Self> {
        let mut config = Self::from_toml(DEFAULT_CONFIG)?;
        config.apply_file(path)?;
        Ok(config)
    }

    /// Parse a full or partial TOML document on top of the built-in defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config = Self::default();
        config.apply_toml(content)?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Applying pipeline config override");
        self.apply_toml(&content)
    }

    fn apply_toml(&mut self, content: &str) -> Result<()> {
        let raw: RawConfig = toml::from_str(content)?;

        if let Some(currency) = raw.default_currency {
            self.default_currency = parse_currency(&currency)?;
        }
        if let Some(secs) = raw.extraction_timeout_secs {
            self.extraction_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = raw.translation_timeout_secs {
            self.translation_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = raw.storage_timeout_secs {
            self.storage_timeout = Duration::from_secs(secs);
        }
        if let Some(ttl) = raw.signed_url_ttl_secs {
            self.signed_url_ttl_secs = ttl;
        }
        if let Some(limit) = raw.few_shot_limit {
            self.few_shot_limit = limit;
        }
        if let Some(tolerance) = raw.total_tolerance {
            self.total_tolerance = tolerance;
        }
        self.validate()
    }

    /// Apply `BASKET_*` overrides from a variable lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BASKET_DEFAULT_CURRENCY") {
            self.default_currency = parse_currency(&v)?;
        }
        if let Some(v) = lookup("BASKET_EXTRACTION_TIMEOUT_SECS") {
            self.extraction_timeout = Duration::from_secs(parse_env("BASKET_EXTRACTION_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("BASKET_TRANSLATION_TIMEOUT_SECS") {
            self.translation_timeout = Duration::from_secs(parse_env("BASKET_TRANSLATION_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("BASKET_STORAGE_TIMEOUT_SECS") {
            self.storage_timeout = Duration::from_secs(parse_env("BASKET_STORAGE_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("BASKET_SIGNED_URL_TTL_SECS") {
            self.signed_url_ttl_secs = parse_env("BASKET_SIGNED_URL_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("BASKET_FEW_SHOT_LIMIT") {
            self.few_shot_limit = parse_env("BASKET_FEW_SHOT_LIMIT", &v)?;
        }
        if let Some(v) = lookup("BASKET_TOTAL_TOLERANCE") {
            self.total_tolerance = parse_env("BASKET_TOTAL_TOLERANCE", &v)?;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        for (name, timeout) in [
            ("extraction_timeout_secs", self.extraction_timeout),
            ("translation_timeout_secs", self.translation_timeout),
            ("storage_timeout_secs", self.storage_timeout),
        ] {
            if timeout.is_zero() {
                return Err(Error::Config(format!("{} must be greater than 0", name)));
            }
        }
        if self.signed_url_ttl_secs == 0 {
            return Err(Error::Config("signed_url_ttl_secs must be greater than 0".into()));
        }
        if !self.total_tolerance.is_finite() || self.total_tolerance < 0.0 {
            return Err(Error::Config("total_tolerance must be a non-negative number".into()));
        }
        Ok(())
    }
}

fn parse_currency(value: &str) -> Result<CurrencyCode> {
    value.parse().map_err(Error::Config)
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid value for {}: '{}'", key, value)))
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("basket").join("config").join("pipeline.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_embedded_config_matches_defaults() {
        let config = PipelineConfig::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_partial_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, "default_currency = \"cad\"\nfew_shot_limit = 5\n").unwrap();

        let config = PipelineConfig::with_config_path(&path).unwrap();
        assert_eq!(config.default_currency, CurrencyCode::Cad);
        assert_eq!(config.few_shot_limit, 5);
        assert_eq!(config.extraction_timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_missing_override_file_is_ignored() {
        let config = PipelineConfig::with_config_path(Path::new("/nonexistent/pipeline.toml"));
        assert_eq!(config.unwrap(), PipelineConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            PipelineConfig::from_toml("default_currency = \"BTC\""),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml("extraction_timeout_secs = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml("unknown_key = 1"),
            Err(Error::Toml(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("BASKET_DEFAULT_CURRENCY", "usd"),
            ("BASKET_EXTRACTION_TIMEOUT_SECS", "5"),
            ("BASKET_TOTAL_TOLERANCE", "0.5"),
        ]);
        let mut config = PipelineConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.default_currency, CurrencyCode::Usd);
        assert_eq!(config.extraction_timeout, Duration::from_secs(5));
        assert_eq!(config.total_tolerance, 0.5);
        assert_eq!(config.few_shot_limit, 50);

        let mut config = PipelineConfig::default();
        let result = config.apply_env(|k| (k == "BASKET_FEW_SHOT_LIMIT").then(|| "many".to_string()));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
