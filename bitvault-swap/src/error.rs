//! Standardized error handling for BitVault swap flows
//!
//! Every builder and marketplace operation returns [`SwapResult`]. Helpers
//! never catch and suppress: errors travel up to the flow orchestrator
//! unchanged, and the orchestrator performs no recovery beyond the
//! additional-UTXO rounds of the fee-convergence loop.
//!
//! # Security Considerations
//!
//! - Signing failures never carry key material, only the failing context
//! - [`SwapError::user_message`] is safe to show in a UI
//!
//! # Usage
//!
//! ```
//! use bitvault_swap::error::{SwapError, SwapResult};
//!
//! fn require_inputs(count: usize) -> SwapResult<()> {
//!     if count == 0 {
//!         return Err(SwapError::EmptyTransaction);
//!     }
//!     Ok(())
//! }
//!
//! assert!(require_inputs(0).is_err());
//! ```

use std::error::Error as StdError;
use thiserror::Error;

use crate::types::Venue;

/// The main error type for PSBT construction and marketplace flows
#[derive(Debug, Error)]
pub enum SwapError {
    /// Coin selection ran out of UTXOs before covering the required amount
    #[error("Insufficient funds: {context} (need {required} sats, {available} sats available, short by {shortfall} sats)")]
    InsufficientFunds {
        context: String,
        required: u64,
        available: u64,
        shortfall: u64,
    },

    /// A UTXO is missing its outpoint, index or spending script
    #[error("Invalid UTXO data: {0}")]
    InvalidUtxoData(String),

    /// An address or script could not be classified
    #[error("Unsupported address type: {0}")]
    UnsupportedAddressType(String),

    /// A marketplace endpoint rejected the request or omitted a required field
    #[error("Marketplace error [{venue}]: {message}")]
    VenueProtocol { venue: Venue, message: String },

    /// The signer failed, or required key material is absent
    #[error("Signing error: {context}")]
    Signing {
        context: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// A transaction cannot be estimated or built without inputs and outputs
    #[error("Cant create a psbt with 0 inputs & outputs")]
    EmptyTransaction,

    /// Caller-supplied data is malformed
    #[error("Validation error: {0}")]
    Validation(String),

    /// The chain-data collaborator failed
    #[error("Chain data error: {context}")]
    ChainData {
        context: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// PSBT, transaction, hex, base64 or JSON decoding failed
    #[error("Serialization error: {context}")]
    Serialization {
        context: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// Configuration errors
    #[error("Configuration error: {context}")]
    Config {
        context: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
}

/// Type alias for a Result with SwapError
pub type SwapResult<T> = Result<T, SwapError>;

impl SwapError {
    /// Create a venue protocol error carrying the venue's message verbatim
    pub fn venue<S: Into<String>>(venue: Venue, message: S) -> Self {
        SwapError::VenueProtocol {
            venue,
            message: message.into(),
        }
    }

    /// Create a signing error without a source
    pub fn signing<S: Into<String>>(context: S) -> Self {
        SwapError::Signing {
            context: context.into(),
            source: None,
        }
    }

    /// Create a signing error wrapping the signer's own failure
    pub fn signing_with_source<S: Into<String>, E: StdError + Send + Sync + 'static>(
        context: S,
        source: E,
    ) -> Self {
        SwapError::Signing {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a chain-data error without a source
    pub fn chain_data<S: Into<String>>(context: S) -> Self {
        SwapError::ChainData {
            context: context.into(),
            source: None,
        }
    }

    /// Create a serialization error without a source
    pub fn serialization<S: Into<String>>(context: S) -> Self {
        SwapError::Serialization {
            context: context.into(),
            source: None,
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        SwapError::Validation(message.into())
    }

    /// Create an insufficient-funds error; `shortfall` is derived from the other two
    pub fn insufficient_funds<S: Into<String>>(context: S, required: u64, available: u64) -> Self {
        SwapError::InsufficientFunds {
            context: context.into(),
            required,
            available,
            shortfall: required.saturating_sub(available),
        }
    }

    /// Get the category of this error for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            SwapError::InsufficientFunds { .. } => ErrorCategory::Funds,
            SwapError::InvalidUtxoData(_) | SwapError::Validation(_) => ErrorCategory::Validation,
            SwapError::UnsupportedAddressType(_) => ErrorCategory::Address,
            SwapError::VenueProtocol { .. } => ErrorCategory::Venue,
            SwapError::Signing { .. } => ErrorCategory::Signing,
            SwapError::EmptyTransaction => ErrorCategory::Validation,
            SwapError::ChainData { .. } => ErrorCategory::ChainData,
            SwapError::Serialization { .. } => ErrorCategory::Serialization,
            SwapError::Config { .. } => ErrorCategory::Config,
        }
    }

    /// Get a sanitized message suitable for displaying to users
    pub fn user_message(&self) -> String {
        match self {
            SwapError::Signing { .. } => "Signing failed".to_string(),
            SwapError::InsufficientFunds { shortfall, .. } if *shortfall > 0 => {
                format!("Not enough funds: {} more sats required", shortfall)
            }
            SwapError::InsufficientFunds { .. } => {
                "Not enough funds to cover the transaction fee".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Whether the error comes from a collaborator rather than from local validation
    pub fn is_external(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Venue | ErrorCategory::ChainData | ErrorCategory::Signing
        )
    }
}

/// Error category for logging purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Funds,
    Validation,
    Address,
    Venue,
    Signing,
    ChainData,
    Serialization,
    Config,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Funds => "Funds",
            ErrorCategory::Validation => "Validation",
            ErrorCategory::Address => "Address",
            ErrorCategory::Venue => "Venue",
            ErrorCategory::Signing => "Signing",
            ErrorCategory::ChainData => "ChainData",
            ErrorCategory::Serialization => "Serialization",
            ErrorCategory::Config => "Config",
        }
    }
}

impl From<bitcoin::psbt::Error> for SwapError {
    fn from(err: bitcoin::psbt::Error) -> Self {
        SwapError::Serialization {
            context: format!("PSBT error: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

impl From<bitcoin::consensus::encode::Error> for SwapError {
    fn from(err: bitcoin::consensus::encode::Error) -> Self {
        SwapError::Serialization {
            context: format!("Bitcoin serialization error: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

impl From<bitcoin::address::Error> for SwapError {
    fn from(err: bitcoin::address::Error) -> Self {
        SwapError::UnsupportedAddressType(format!("Invalid Bitcoin address: {}", err))
    }
}

impl From<hex::FromHexError> for SwapError {
    fn from(err: hex::FromHexError) -> Self {
        SwapError::Serialization {
            context: format!("Hex decoding error: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

impl From<base64::DecodeError> for SwapError {
    fn from(err: base64::DecodeError) -> Self {
        SwapError::Serialization {
            context: format!("Base64 decoding error: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_json::Error> for SwapError {
    fn from(err: serde_json::Error) -> Self {
        SwapError::Serialization {
            context: format!("JSON serialization error: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

impl From<toml::de::Error> for SwapError {
    fn from(err: toml::de::Error) -> Self {
        SwapError::Config {
            context: format!("TOML deserialization error: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

impl From<bitcoin::secp256k1::Error> for SwapError {
    fn from(err: bitcoin::secp256k1::Error) -> Self {
        SwapError::signing_with_source("secp256k1 operation failed", err)
    }
}
