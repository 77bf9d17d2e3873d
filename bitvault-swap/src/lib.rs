//! BitVault Swap Library
//!
//! This crate builds fee-accurate partially signed Bitcoin transactions and
//! drives ordinals, BRC-20 and rune purchases against the supported
//! marketplaces (Unisat, OKX, Ordinals-Wallet, Magisat, Magic Eden).
//!
//! # Modules
//!
//! - `types`: UTXOs, transaction templates, venues and purchase results
//! - `error`: Error type shared by every operation
//! - `address`: Address and script classification
//! - `fee_model`: Per-script vbyte tables and fee estimation
//! - `coin_select`: Value-descending UTXO selection
//! - `psbt_builder`: Fee convergence loop and padding batches
//! - `utxo_lifecycle`: Local UTXO set reconciliation after broadcasts
//! - `provider`: Chain-data, signer and clock collaborators
//! - `marketplace`: Venue protocols and the offer processor
//! - `config`: Configuration management
//! - `logging`: Security-aware logging infrastructure
//!
//! # Security Considerations
//!
//! - PSBT signing is delegated to a [`provider::Signer`]; private keys are
//!   only borrowed for address-ownership signatures and never logged
//! - Logged addresses and transaction ids are truncated
//! - Flows on one spending address are serialized so UTXOs are never
//!   double-selected

/// Common data types
pub mod types;

/// Error handling
pub mod error;

/// Address and script classification
pub mod address;

/// Vbyte tables and fee estimation
pub mod fee_model;

/// UTXO selection
pub mod coin_select;

/// PSBT construction with fee convergence
pub mod psbt_builder;

/// UTXO set reconciliation
pub mod utxo_lifecycle;

/// External collaborators
pub mod provider;

/// Marketplace offer flows
pub mod marketplace;

/// Configuration management
pub mod config;

/// Secure logging functionality
pub mod logging;

pub use error::{ErrorCategory, SwapError, SwapResult};

pub use types::{
    AddressType, AssetType, BidSession, BuiltPsbt, ProcessOfferResponse, TxInputTemplate,
    TxOutputTemplate, Utxo, Venue, DUMMY_UTXO_SATS, PADDING_UTXO_VALUE, UTXO_DUST,
};

pub use config::SwapConfig;

pub use psbt_builder::{
    build_dummy_utxo_batch, build_psbt_with_fee, prepare_address_for_dummy_utxos, BuildRequest,
    DummyUtxoOptions,
};

pub use marketplace::{
    offers::{MarketplaceOffer, OfferRequest, SpendAccount},
    BuyOffersOptions, OfferProcessor, ProcessListingOptions, ProcessOfferOptions,
};

pub use provider::{ChainDataProvider, Signer, Sleeper};

pub use bitcoin::{Network, OutPoint, Txid};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization
///
/// Installs the default logger. Safe to call more than once; only the
/// first call has an effect.
pub fn init() -> Result<(), String> {
    logging::init(&logging::LogConfig::default())
        .map_err(|e| format!("Failed to initialize logging: {}", e))
}

/// Library initialization from a loaded configuration
pub fn init_with_config(config: &SwapConfig) -> Result<(), String> {
    logging::init(&config.logging).map_err(|e| format!("Failed to initialize logging: {}", e))
}
