//! Experiment configuration loaded from TOML
//!
//! ```toml
//! [shop]
//! checkouts = 2
//! service_rate = 10.0
//! max_queue_length = 10
//!
//! [arrivals]
//! customers = 200
//! arrival_rate = 30.0
//! avg_items = 3
//! seed = 42
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{ShopError, validate_rate};

/// Top-level experiment configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub shop: ShopConfig,
    pub arrivals: ArrivalConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopConfig {
    pub checkouts: usize,
    /// Items per second per checkout
    pub service_rate: f64,
    #[serde(default)]
    pub max_queue_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrivalConfig {
    pub customers: usize,
    /// Customers per second
    pub arrival_rate: f64,
    #[serde(default = "default_avg_items")]
    pub avg_items: usize,
    pub seed: Option<u64>,
}

fn default_avg_items() -> usize {
    1
}

impl ExperimentConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<ExperimentConfig, ShopError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ShopError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        ExperimentConfig::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<ExperimentConfig, ShopError> {
        let config: ExperimentConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ShopError> {
        if self.shop.checkouts == 0 {
            return Err(ShopError::NoCheckouts);
        }
        validate_rate(self.shop.service_rate, ShopError::InvalidServiceRate)?;
        validate_rate(self.arrivals.arrival_rate, ShopError::InvalidArrivalRate)?;
        if self.arrivals.avg_items == 0 {
            return Err(ShopError::InvalidAverageItems);
        }
        Ok(())
    }

    /// Customers per second one checkout serves on average
    pub fn customer_service_rate(&self) -> f64 {
        self.shop.service_rate / self.arrivals.avg_items as f64
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        ExperimentConfig {
            shop: ShopConfig {
                checkouts: 2,
                service_rate: 10.0,
                max_queue_length: 10,
            },
            arrivals: ArrivalConfig {
                customers: 200,
                arrival_rate: 30.0,
                avg_items: 3,
                seed: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config = ExperimentConfig::from_toml_str(
            r#"
            [shop]
            checkouts = 3
            service_rate = 12.5
            max_queue_length = 4

            [arrivals]
            customers = 50
            arrival_rate = 8.0
            avg_items = 5
            seed = 9
            "#,
        )
        .unwrap();

        assert_eq!(config.shop.checkouts, 3);
        assert_eq!(config.shop.service_rate, 12.5);
        assert_eq!(config.shop.max_queue_length, 4);
        assert_eq!(config.arrivals.customers, 50);
        assert_eq!(config.arrivals.avg_items, 5);
        assert_eq!(config.arrivals.seed, Some(9));
        assert_eq!(config.customer_service_rate(), 2.5);
    }

    #[test]
    fn optional_fields_fall_back() {
        let config = ExperimentConfig::from_toml_str(
            r#"
            [shop]
            checkouts = 1
            service_rate = 1.0

            [arrivals]
            customers = 10
            arrival_rate = 2.0
            "#,
        )
        .unwrap();

        assert_eq!(config.shop.max_queue_length, 0);
        assert_eq!(config.arrivals.avg_items, 1);
        assert_eq!(config.arrivals.seed, None);
    }

    #[test]
    fn rejects_invalid_values() {
        let zero_checkouts = r#"
            [shop]
            checkouts = 0
            service_rate = 1.0
            [arrivals]
            customers = 1
            arrival_rate = 1.0
        "#;
        assert!(matches!(
            ExperimentConfig::from_toml_str(zero_checkouts),
            Err(ShopError::NoCheckouts)
        ));

        let negative_rate = r#"
            [shop]
            checkouts = 1
            service_rate = -2.0
            [arrivals]
            customers = 1
            arrival_rate = 1.0
        "#;
        assert!(matches!(
            ExperimentConfig::from_toml_str(negative_rate),
            Err(ShopError::InvalidServiceRate(_))
        ));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            ExperimentConfig::from_toml_str("[shop]\ncheckouts = \"two\""),
            Err(ShopError::ConfigParse(_))
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ExperimentConfig::load("does/not/exist.toml").unwrap_err();
        assert!(err.to_string().contains("does/not/exist.toml"));
    }

    #[test]
    fn default_is_valid() {
        assert!(ExperimentConfig::default().validate().is_ok());
    }
}
