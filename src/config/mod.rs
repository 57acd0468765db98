//! Configuration management for the inventory hedger.
//!
//! Loads settings from environment variables and config files.

use crate::token::Token;
use anyhow::{Context, Result};
use serde::Deserialize;

/// Zero address used for the smart chain's native coin.
const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// CEX credentials and venue selectors
    pub exchange: ExchangeConfig,
    /// Smart-chain token contract addresses
    pub tokens: TokenAddresses,
    /// Rebalance trigger parameters and state location
    pub rebalance: RebalanceSettings,
    /// Engine and monitor timing knobs
    #[serde(default)]
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// API key for authentication
    pub api_key: String,
    /// Secret key for request signing
    pub api_secret: String,
    /// API passphrase
    pub api_password: String,
    /// REST endpoint, overridable for tests
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// The CEX's name for the smart chain, used in deposit/withdrawal
    /// chain selectors (e.g. "Solana")
    pub smart_chain_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenAddresses {
    pub wbtc: String,
    pub usdc: String,
    pub usdt: String,
    /// Native-coin placeholder when unset
    #[serde(default = "default_native_address")]
    pub eth: String,
    #[serde(default = "default_native_address")]
    pub sol: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RebalanceSettings {
    /// Trigger when the inventory split differs from parity by more than
    /// this many parts-per-million
    pub threshold_ppm: u64,
    /// Fraction of the notional imbalance to correct per cycle, in PPM
    pub amount_ppm: u64,
    /// Directory holding the live state document and archive
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    /// Live document file stem (`<state_dir>/<state_file>.json`)
    #[serde(default = "default_state_file")]
    pub state_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    /// Engine tick interval in seconds
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// RETRYING wormhole delay in seconds
    #[serde(default = "default_retry_time")]
    pub retry_time_secs: u64,
    /// Post-action cooldown in seconds
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    /// Balance monitor interval in seconds
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,
}

fn default_base_url() -> String {
    "https://www.okx.com".to_string()
}

fn default_native_address() -> String {
    ZERO_ADDRESS.to_string()
}

fn default_state_dir() -> String {
    "storage".to_string()
}

fn default_state_file() -> String {
    "hedger-state".to_string()
}

fn default_check_interval() -> u64 {
    5
}

fn default_retry_time() -> u64 {
    15
}

fn default_cooldown() -> u64 {
    5
}

fn default_monitor_interval() -> u64 {
    120
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            retry_time_secs: default_retry_time(),
            cooldown_secs: default_cooldown(),
            monitor_interval_secs: default_monitor_interval(),
        }
    }
}

impl TokenAddresses {
    /// Contract address of a smart-chain token. Bitcoin rails have no
    /// contract address.
    pub fn address_of(&self, token: Token) -> Option<&str> {
        match token {
            Token::Btc | Token::BtcLn => None,
            Token::Usdc => Some(&self.usdc),
            Token::Usdt => Some(&self.usdt),
            Token::Eth => Some(&self.eth),
            Token::Sol => Some(&self.sol),
        }
    }
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .prefix("HEDGER"),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.rebalance.threshold_ppm > 0 && self.rebalance.threshold_ppm <= 1_000_000,
            "threshold_ppm must be within (0, 1000000]"
        );

        anyhow::ensure!(
            self.rebalance.amount_ppm > 0 && self.rebalance.amount_ppm <= 1_000_000,
            "amount_ppm must be within (0, 1000000]"
        );

        anyhow::ensure!(
            !self.exchange.api_key.is_empty() && !self.exchange.api_secret.is_empty(),
            "exchange credentials must be set"
        );

        anyhow::ensure!(
            !self.exchange.smart_chain_name.is_empty(),
            "smart_chain_name must be set"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            exchange: ExchangeConfig {
                api_key: "key".to_string(),
                api_secret: "secret".to_string(),
                api_password: "pass".to_string(),
                base_url: default_base_url(),
                smart_chain_name: "Solana".to_string(),
            },
            tokens: TokenAddresses {
                wbtc: "wbtc-mint".to_string(),
                usdc: "usdc-mint".to_string(),
                usdt: "usdt-mint".to_string(),
                eth: default_native_address(),
                sol: default_native_address(),
            },
            rebalance: RebalanceSettings {
                threshold_ppm: 200_000,
                amount_ppm: 500_000,
                state_dir: default_state_dir(),
                state_file: default_state_file(),
            },
            timing: TimingConfig::default(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_ppm_bounds_enforced() {
        let mut config = test_config();
        config.rebalance.threshold_ppm = 1_000_001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bitcoin_has_no_contract_address() {
        let config = test_config();
        assert!(config.tokens.address_of(Token::Btc).is_none());
        assert_eq!(config.tokens.address_of(Token::Usdc), Some("usdc-mint"));
    }
}
