// ⚙️ Configuration - JSON file + environment overrides
//
// Precedence: ROUNDUP_* env vars > config file > defaults.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::amount::parse_cents;

pub const CONFIG_ENV: &str = "ROUNDUP_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "roundup.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file holding learned mappings and their audit trail
    pub database_path: PathBuf,

    /// Decimal string, e.g. "1.00"
    pub round_up_amount: String,

    /// Ticker that receives the whole round-up when nothing resolves
    pub default_ticker: String,

    pub retailer_approval_confidence: f64,
    pub brand_approval_confidence: f64,

    /// Optional CSV replacing the built-in brand table
    pub brand_table_path: Option<PathBuf>,

    /// Optional JSON replacing the built-in keyword patterns
    pub pattern_table_path: Option<PathBuf>,

    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: PathBuf::from("roundup.db"),
            round_up_amount: "1.00".to_string(),
            default_ticker: "VTI".to_string(),
            retailer_approval_confidence: 0.95,
            brand_approval_confidence: 0.90,
            brand_table_path: None,
            pattern_table_path: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// File named by ROUNDUP_CONFIG, else ./roundup.json when present, else
    /// defaults; then environment overrides; then validation
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Config::from_file(&path)?,
            Err(_) if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Config::from_file(DEFAULT_CONFIG_FILE)?
            }
            Err(_) => Config::default(),
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;
        Ok(config)
    }

    /// Apply ROUNDUP_DB, ROUNDUP_AMOUNT and ROUNDUP_DEFAULT_TICKER
    pub fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = var("ROUNDUP_DB") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(amount) = var("ROUNDUP_AMOUNT") {
            self.round_up_amount = amount;
        }
        if let Some(ticker) = var("ROUNDUP_DEFAULT_TICKER") {
            self.default_ticker = ticker;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.round_up_cents()?;

        if self.default_ticker.trim().is_empty() {
            bail!("default_ticker must not be empty");
        }

        for (name, value) in [
            ("retailer_approval_confidence", self.retailer_approval_confidence),
            ("brand_approval_confidence", self.brand_approval_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be within [0, 1], got {}", name, value);
            }
        }

        Ok(())
    }

    /// The configured round-up in cents; must be positive
    pub fn round_up_cents(&self) -> Result<i64> {
        let cents = parse_cents(&self.round_up_amount)
            .ok_or_else(|| anyhow!("Invalid round_up_amount: {:?}", self.round_up_amount))?;
        if cents <= 0 {
            bail!("round_up_amount must be positive, got {:?}", self.round_up_amount);
        }
        Ok(cents)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.round_up_cents().unwrap(), 100);
        assert_eq!(config.default_ticker, "VTI");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roundup.json");
        fs::write(&path, r#"{"round_up_amount": "2.50", "default_ticker": "VOO"}"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.round_up_cents().unwrap(), 250);
        assert_eq!(config.default_ticker, "VOO");
        assert_eq!(config.brand_approval_confidence, 0.90);
        assert_eq!(config.database_path, PathBuf::from("roundup.db"));
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roundup.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(Config::from_file(&path).is_err());
        assert!(Config::from_file(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ROUNDUP_DB", "/tmp/other.db"),
            ("ROUNDUP_AMOUNT", "0.75"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.database_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.round_up_cents().unwrap(), 75);
        assert_eq!(config.default_ticker, "VTI");
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.round_up_amount = "0.00".to_string();
        assert!(config.validate().is_err());

        config.round_up_amount = "abc".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.default_ticker = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.brand_approval_confidence = 1.5;
        assert!(config.validate().is_err());
    }
}
