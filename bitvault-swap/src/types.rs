//! Common data types for BitVault swap flows
//!
//! These types describe the spendable state (UTXOs), the transaction
//! templates the builder threads through fee convergence, and the
//! per-venue identifiers used by the marketplace adapters.
//!
//! # Security Boundaries
//!
//! These types are safe to pass between the builder, the marketplace
//! adapters and the collaborators. They MUST NOT contain private keys;
//! key handles only ever live behind the [`crate::provider::Signer`] trait.

use bitcoin::psbt::PsbtSighashType;
use bitcoin::secp256k1::XOnlyPublicKey;
use bitcoin::{OutPoint, ScriptBuf, Txid};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SwapError;

// Constants for Bitcoin-specific values

/// Minimum output value; anything at or below is never tracked as spendable
pub const UTXO_DUST: u64 = 546;

/// Value of a single padding ("dummy") UTXO
pub const PADDING_UTXO_VALUE: u64 = 600;

/// Default number of padding UTXOs a marketplace purchase expects
pub const DEFAULT_PADDING_COUNT: usize = 2;

/// Total value of the default padding pair
pub const DUMMY_UTXO_SATS: u64 = PADDING_UTXO_VALUE * DEFAULT_PADDING_COUNT as u64;

/// Conservative vsize used to fund fixed-shape transactions before convergence
pub const ESTIMATE_TX_SIZE: u64 = 350;

/// Upper bound of a marketplace purchase transaction, used for cost estimates
pub const MAX_TX_SIZE_FOR_OFFERS: u64 = 482;

/// Venues that only accept confirmed funding UTXOs
pub const CONFIRMED_UTXO_ENFORCED: [Venue; 2] = [Venue::Unisat, Venue::OrdinalsWallet];

/// Venues that require padding UTXOs before a purchase
pub const DUMMY_UTXO_ENFORCED: [Venue; 4] = [
    Venue::Okx,
    Venue::OrdinalsWallet,
    Venue::Magisat,
    Venue::MagicEden,
];

/// Output script family of an address or script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressType {
    /// P2PKH
    Legacy,
    /// P2SH-P2WPKH
    NestedSegwit,
    /// P2WPKH
    NativeSegwit,
    /// P2TR
    Taproot,
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AddressType::Legacy => "p2pkh",
            AddressType::NestedSegwit => "p2sh-p2wpkh",
            AddressType::NativeSegwit => "p2wpkh",
            AddressType::Taproot => "p2tr",
        };
        f.write_str(name)
    }
}

/// Kind of asset being traded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Brc20,
    Runes,
    Ordinals,
    Collectible,
    Btc,
}

/// Marketplace identifier, the tag every venue flow dispatches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Venue {
    #[serde(rename = "unisat")]
    Unisat,
    #[serde(rename = "okx")]
    Okx,
    #[serde(rename = "ordinals-wallet")]
    OrdinalsWallet,
    #[serde(rename = "magisat")]
    Magisat,
    #[serde(rename = "magic-eden")]
    MagicEden,
}

impl Venue {
    /// Wire name of the venue
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Unisat => "unisat",
            Venue::Okx => "okx",
            Venue::OrdinalsWallet => "ordinals-wallet",
            Venue::Magisat => "magisat",
            Venue::MagicEden => "magic-eden",
        }
    }

    pub fn enforces_confirmed_utxos(&self) -> bool {
        CONFIRMED_UTXO_ENFORCED.contains(self)
    }

    pub fn enforces_dummy_utxos(&self) -> bool {
        DUMMY_UTXO_ENFORCED.contains(self)
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Venue {
    type Err = SwapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unisat" => Ok(Venue::Unisat),
            "okx" => Ok(Venue::Okx),
            "ordinals-wallet" => Ok(Venue::OrdinalsWallet),
            "magisat" => Ok(Venue::Magisat),
            "magic-eden" => Ok(Venue::MagicEden),
            other => Err(SwapError::Validation(format!("Unknown marketplace: {}", other))),
        }
    }
}

/// Unspent transaction output as observed by the chain-data collaborator
///
/// Immutable once observed. Two UTXOs are the same output when their
/// outpoints match, regardless of the remaining fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    /// Value in satoshis
    pub value: u64,
    pub script_pubkey: ScriptBuf,
    pub address: String,
    /// Number of confirmations (0 for unconfirmed)
    pub confirmations: u32,
    #[serde(default)]
    pub inscriptions: Vec<String>,
    #[serde(default)]
    pub runes: Vec<String>,
}

impl Utxo {
    pub fn new(
        txid: Txid,
        vout: u32,
        value: u64,
        script_pubkey: ScriptBuf,
        address: impl Into<String>,
    ) -> Self {
        Self {
            txid,
            vout,
            value,
            script_pubkey,
            address: address.into(),
            confirmations: 0,
            inscriptions: Vec::new(),
            runes: Vec::new(),
        }
    }

    pub fn with_confirmations(mut self, confirmations: u32) -> Self {
        self.confirmations = confirmations;
        self
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmations > 0
    }

    pub fn same_outpoint(&self, other: &Utxo) -> bool {
        self.txid == other.txid && self.vout == other.vout
    }
}

/// One input of a transaction under construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInputTemplate {
    pub outpoint: OutPoint,
    /// Value of the spent output, committed to by segwit sighashes
    pub witness_value: u64,
    /// Script of the spent output
    pub witness_script: ScriptBuf,
    /// Attached only for taproot spends
    pub tap_internal_key: Option<XOnlyPublicKey>,
    /// Set for counterparty inputs a venue co-signs with a non-default sighash
    pub sighash_type: Option<PsbtSighashType>,
}

impl TxInputTemplate {
    /// Template spending `utxo`, attaching `tap_internal_key` only for taproot spend addresses
    pub fn from_utxo(
        utxo: &Utxo,
        address_type: AddressType,
        tap_internal_key: Option<XOnlyPublicKey>,
    ) -> Result<Self, SwapError> {
        if utxo.script_pubkey.is_empty() {
            return Err(SwapError::InvalidUtxoData(format!(
                "UTXO {}:{} has no spending script",
                utxo.txid, utxo.vout
            )));
        }

        Ok(Self {
            outpoint: utxo.outpoint(),
            witness_value: utxo.value,
            witness_script: utxo.script_pubkey.clone(),
            tap_internal_key: match address_type {
                AddressType::Taproot => tap_internal_key,
                _ => None,
            },
            sighash_type: None,
        })
    }
}

/// One output of a transaction under construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutputTemplate {
    pub address: String,
    /// Value in satoshis
    pub value: u64,
}

impl TxOutputTemplate {
    pub fn new(address: impl Into<String>, value: u64) -> Self {
        Self {
            address: address.into(),
            value,
        }
    }
}

/// Unsigned transaction emitted by the builder
///
/// `psbt_hex` and `psbt_base64` are two encodings of the same PSBT; the
/// templates are exactly what was serialized into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPsbt {
    pub psbt_hex: String,
    pub psbt_base64: String,
    pub inputs: Vec<TxInputTemplate>,
    pub outputs: Vec<TxOutputTemplate>,
}

/// Result of a completed purchase
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcessOfferResponse {
    /// Transaction that created padding UTXOs, when one was needed
    pub dummy_tx_id: Option<String>,
    pub purchase_tx_id: String,
}

/// Ephemeral per-purchase state, never persisted
#[derive(Debug, Clone, Default)]
pub struct BidSession {
    pub dummy_tx_id: Option<String>,
    pub purchase_tx_id: Option<String>,
    pub selected_utxos: Vec<Utxo>,
}

impl BidSession {
    /// Close the session, failing when the venue never reported a purchase
    pub fn finish(self, venue: Venue) -> Result<ProcessOfferResponse, SwapError> {
        match self.purchase_tx_id {
            Some(purchase_tx_id) if !purchase_tx_id.is_empty() => Ok(ProcessOfferResponse {
                dummy_tx_id: self.dummy_tx_id,
                purchase_tx_id,
            }),
            _ => Err(SwapError::venue(venue, "Purchase transaction ID is missing")),
        }
    }
}
