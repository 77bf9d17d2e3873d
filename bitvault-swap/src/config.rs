//! Configuration management for BitVault swap flows.
//!
//! Settings are stored in TOML. Every field has a default, so an empty
//! file (or a partial one) yields a usable configuration. Nothing here is
//! security-critical: no keys, no endpoints with credentials.

use anyhow::{anyhow, Result};
use bitcoin::Network;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::logging::LogConfig;
use crate::types::{
    Venue, DEFAULT_PADDING_COUNT, ESTIMATE_TX_SIZE, MAX_TX_SIZE_FOR_OFFERS, PADDING_UTXO_VALUE,
    UTXO_DUST,
};

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapConfig {
    /// Bitcoin network name (Bitcoin, Testnet, Signet, Regtest)
    #[serde(default = "default_network")]
    pub network: String,

    #[serde(default)]
    pub settlement: SettlementConfig,

    #[serde(default)]
    pub padding: PaddingConfig,

    #[serde(default)]
    pub logging: LogConfig,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            settlement: SettlementConfig::default(),
            padding: PaddingConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

/// Blocking waits after a padding or setup broadcast, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementConfig {
    #[serde(default = "default_okx_delay")]
    pub okx_secs: u64,

    #[serde(default = "default_long_delay")]
    pub magisat_secs: u64,

    #[serde(default = "default_long_delay")]
    pub magic_eden_secs: u64,

    /// Wait after Ordinals-Wallet accepted a purchase that carried a setup transaction
    #[serde(default = "default_setup_delay")]
    pub ordinals_wallet_setup_secs: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            okx_secs: default_okx_delay(),
            magisat_secs: default_long_delay(),
            magic_eden_secs: default_long_delay(),
            ordinals_wallet_setup_secs: default_setup_delay(),
        }
    }
}

impl SettlementConfig {
    /// Settlement delay after a padding broadcast for `venue`
    pub fn delay_for(&self, venue: Venue) -> Duration {
        let secs = match venue {
            Venue::Okx => self.okx_secs,
            Venue::Magisat => self.magisat_secs,
            Venue::MagicEden => self.magic_eden_secs,
            Venue::OrdinalsWallet => self.ordinals_wallet_setup_secs,
            // Unisat broadcasts its own dummy PSBT and submits immediately
            Venue::Unisat => 0,
        };
        Duration::from_secs(secs)
    }

    /// All delays zeroed, for tests and regtest
    pub fn immediate() -> Self {
        Self {
            okx_secs: 0,
            magisat_secs: 0,
            magic_eden_secs: 0,
            ordinals_wallet_setup_secs: 0,
        }
    }
}

/// Padding UTXO and size-estimate parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaddingConfig {
    #[serde(default = "default_padding_value")]
    pub utxo_value: u64,

    #[serde(default = "default_padding_count")]
    pub default_count: usize,

    /// vsize used to fund a padding batch before fee convergence
    #[serde(default = "default_estimate_tx_size")]
    pub estimate_tx_size: u64,

    /// vsize bound of a purchase, used for affordability checks
    #[serde(default = "default_offer_tx_size")]
    pub offer_tx_size: u64,
}

impl Default for PaddingConfig {
    fn default() -> Self {
        Self {
            utxo_value: default_padding_value(),
            default_count: default_padding_count(),
            estimate_tx_size: default_estimate_tx_size(),
            offer_tx_size: default_offer_tx_size(),
        }
    }
}

impl SwapConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file: {}", e))?;

        let config: SwapConfig = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        fs::write(path, content).map_err(|e| anyhow!("Failed to write config file: {}", e))?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.bitcoin_network()?;

        if self.padding.utxo_value <= UTXO_DUST {
            return Err(anyhow!(
                "Invalid padding value {}: must be above the dust threshold of {} sats",
                self.padding.utxo_value,
                UTXO_DUST
            ));
        }

        if self.padding.default_count == 0 {
            return Err(anyhow!("Invalid padding count: must be greater than 0"));
        }

        if self.padding.estimate_tx_size == 0 || self.padding.offer_tx_size == 0 {
            return Err(anyhow!("Invalid transaction size estimate: must be greater than 0"));
        }

        Ok(())
    }

    /// Parse the configured network name
    pub fn bitcoin_network(&self) -> Result<Network> {
        match self.network.as_str() {
            "Bitcoin" | "bitcoin" | "Mainnet" | "mainnet" => Ok(Network::Bitcoin),
            "Testnet" | "testnet" => Ok(Network::Testnet),
            "Signet" | "signet" => Ok(Network::Signet),
            "Regtest" | "regtest" => Ok(Network::Regtest),
            other => Err(anyhow!("Invalid network type: {}", other)),
        }
    }
}

/// Ensure a configuration file exists at the specified path
/// If it doesn't exist, create it with default values
pub fn ensure_config_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(|e| anyhow!("Failed to create config directory: {}", e))?;
            }
        }

        SwapConfig::default().save(path)?;
    }

    Ok(())
}

// Default value functions

fn default_network() -> String {
    "Bitcoin".to_string()
}

fn default_okx_delay() -> u64 {
    30
}

fn default_long_delay() -> u64 {
    60
}

fn default_setup_delay() -> u64 {
    5
}

fn default_padding_value() -> u64 {
    PADDING_UTXO_VALUE
}

fn default_padding_count() -> usize {
    DEFAULT_PADDING_COUNT
}

fn default_estimate_tx_size() -> u64 {
    ESTIMATE_TX_SIZE
}

fn default_offer_tx_size() -> u64 {
    MAX_TX_SIZE_FOR_OFFERS
}
