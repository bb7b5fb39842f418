//! Command line and environment configuration.

use crate::application::provisioning::Pricing;
use clap::{Parser, ValueEnum};
use rust_decimal::Decimal;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProcessorKind {
    /// Talk to the payment processor's HTTP API.
    Http,
    /// In-process processor that issues intents locally.
    Fake,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "gsp-billing")]
#[command(version, about = "Game server billing: provisioning and payment reconciliation")]
pub struct Config {
    /// Address to listen on.
    #[arg(long, env = "GSP_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Shared secret used to verify processor webhook signatures.
    #[arg(long, env = "GSP_WEBHOOK_SECRET", hide_env_values = true)]
    pub webhook_secret: String,

    /// Payment processor implementation.
    #[arg(long, value_enum, default_value_t = ProcessorKind::Http)]
    pub processor: ProcessorKind,

    /// Base URL of the payment processor API.
    #[arg(long, env = "GSP_PROCESSOR_URL")]
    pub processor_url: Option<String>,

    /// Secret API key for the payment processor.
    #[arg(long, env = "GSP_PROCESSOR_KEY", hide_env_values = true)]
    pub processor_key: Option<String>,

    /// Timeout for payment intent creation, in seconds.
    #[arg(long, env = "GSP_PROCESSOR_TIMEOUT_SECS", default_value_t = 10)]
    pub processor_timeout_secs: u64,

    /// Accepted clock skew for webhook signatures, in seconds.
    #[arg(long, env = "GSP_SIGNATURE_TOLERANCE_SECS", default_value_t = 300)]
    pub signature_tolerance_secs: u64,

    /// Prices of tiers 1, 2 and 3 in major units, comma separated.
    #[arg(long, env = "GSP_TIER_PRICES", default_value = "3.00,5.00,10.00")]
    pub tier_prices: String,

    /// ISO currency code for all payments.
    #[arg(long, env = "GSP_CURRENCY", default_value = "eur")]
    pub currency: String,

    /// Path to a persistent ledger. Requires the `storage-rocksdb` feature.
    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Output logs as JSON.
    #[arg(long)]
    pub log_json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

/// Settings needed to reach the HTTP payment processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorSettings {
    pub base_url: String,
    pub secret_key: String,
}

impl Config {
    pub fn processor_timeout(&self) -> Duration {
        Duration::from_secs(self.processor_timeout_secs)
    }

    pub fn signature_tolerance(&self) -> Duration {
        Duration::from_secs(self.signature_tolerance_secs)
    }

    pub fn pricing(&self) -> Result<Pricing, ConfigError> {
        let prices = parse_tier_prices(&self.tier_prices)?;
        let currency = self.currency.trim();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::Invalid(
                "GSP_CURRENCY",
                format!("'{currency}' is not a three letter currency code"),
            ));
        }
        Pricing::from_major(prices, currency)
            .map_err(|e| ConfigError::Invalid("GSP_TIER_PRICES", e.to_string()))
    }

    pub fn processor_settings(&self) -> Result<ProcessorSettings, ConfigError> {
        let base_url = self
            .processor_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("GSP_PROCESSOR_URL"))?;
        let secret_key = self
            .processor_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::Missing("GSP_PROCESSOR_KEY"))?;
        Ok(ProcessorSettings {
            base_url,
            secret_key,
        })
    }

    /// Checks settings that clap cannot express on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.webhook_secret.trim().is_empty() {
            return Err(ConfigError::Missing("GSP_WEBHOOK_SECRET"));
        }
        if self.processor_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "GSP_PROCESSOR_TIMEOUT_SECS",
                "must be at least 1".to_string(),
            ));
        }
        self.pricing()?;
        if self.processor == ProcessorKind::Http {
            self.processor_settings()?;
        }
        Ok(())
    }
}

fn parse_tier_prices(raw: &str) -> Result<[Decimal; 3], ConfigError> {
    let prices = raw
        .split(',')
        .map(|p| {
            p.trim()
                .parse::<Decimal>()
                .map_err(|e| ConfigError::Invalid("GSP_TIER_PRICES", format!("'{}': {e}", p.trim())))
        })
        .collect::<Result<Vec<_>, _>>()?;

    <[Decimal; 3]>::try_from(prices).map_err(|prices| {
        ConfigError::Invalid(
            "GSP_TIER_PRICES",
            format!("expected 3 prices, got {}", prices.len()),
        )
    })
}
