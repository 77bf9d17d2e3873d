//! External collaborators of the swap flows
//!
//! The crate never talks to the network or holds wallet keys itself. The
//! chain indexer, the signer and the clock are reached through the traits
//! in this module; the marketplace HTTP surface lives in
//! [`crate::marketplace::api`].
//!
//! Implementations normalize whatever container shapes their backend
//! returns before handing data to the core (see [`normalize_key_values`]),
//! so flow code never branches on response shape.

pub mod mock;

use async_trait::async_trait;
use bitcoin::secp256k1::SecretKey;
use bitcoin::{OutPoint, ScriptBuf, Txid};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{SwapError, SwapResult};
use crate::types::Utxo;

/// Fee estimates keyed by confirmation target ("1", "3", "6", ...), in sat/vB
pub type FeeEstimates = BTreeMap<String, Decimal>;

/// Confirmation target used when a caller-supplied fee rate is rejected
pub const NEXT_BLOCK_TARGET: &str = "1";

/// Inputs and outputs of a broadcast transaction, as reported by the indexer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInfo {
    pub txid: Txid,
    /// Outpoints the transaction consumed
    pub inputs: Vec<OutPoint>,
    pub outputs: Vec<TxInfoOutput>,
    pub confirmed: bool,
}

/// One output of a [`TxInfo`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInfoOutput {
    /// None for outputs without an address form (OP_RETURN and friends)
    pub address: Option<String>,
    pub value: u64,
    pub script_pubkey: ScriptBuf,
}

/// Chain-data collaborator: fee estimates, transaction lookups, broadcast
#[async_trait]
pub trait ChainDataProvider: Send + Sync {
    async fn fee_estimates(&self) -> SwapResult<FeeEstimates>;

    async fn transaction_info(&self, txid: &Txid) -> SwapResult<TxInfo>;

    /// Broadcast a fully signed raw transaction
    async fn broadcast(&self, raw_tx_hex: &str) -> SwapResult<Txid>;

    /// Spendable UTXOs currently held by `address`
    async fn address_utxos(&self, address: &str) -> SwapResult<Vec<Utxo>>;
}

/// Output of [`Signer::sign_all_inputs`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPsbt {
    /// Base64 encoding
    pub signed_psbt: String,
    /// Hex encoding of the same PSBT
    pub signed_hex_psbt: String,
}

/// Wallet signer
///
/// Signs every input the wallet owns and leaves the rest untouched. With
/// `finalize` unset the partial signatures stay in the PSBT so a
/// counterparty can co-sign.
#[async_trait]
pub trait Signer: Send + Sync {
    /// `raw_psbt` may be hex or base64
    async fn sign_all_inputs(&self, raw_psbt: &str, finalize: bool) -> SwapResult<SignedPsbt>;

    /// Key of the wallet's native segwit account, used for ownership proofs
    fn segwit_key(&self) -> Option<SecretKey> {
        None
    }

    /// Key of the wallet's taproot account, used for ownership proofs
    fn taproot_key(&self) -> Option<SecretKey> {
        None
    }
}

/// Clock used for settlement waits
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock sleeper backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Normalize a key/value container into an ordered map
///
/// Backends return either a plain JSON object or a serialized map as an
/// array of `[key, value]` entries. Both collapse to the same map; any
/// other shape is a serialization error.
pub fn normalize_key_values(raw: &Value) -> SwapResult<Map<String, Value>> {
    match raw {
        Value::Object(map) => Ok(map.clone()),
        Value::Array(entries) => {
            let mut map = Map::new();
            for entry in entries {
                match entry.as_array().map(Vec::as_slice) {
                    Some([key, value]) => {
                        let key = match key {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        map.insert(key, value.clone());
                    }
                    _ => {
                        return Err(SwapError::serialization(format!(
                            "Expected a [key, value] entry, got {}",
                            entry
                        )))
                    }
                }
            }
            Ok(map)
        }
        other => Err(SwapError::serialization(format!(
            "Expected a key/value container, got {}",
            other
        ))),
    }
}

/// Normalize a raw fee-estimate response into [`FeeEstimates`]
pub fn normalize_fee_estimates(raw: &Value) -> SwapResult<FeeEstimates> {
    normalize_key_values(raw)?
        .into_iter()
        .map(|(target, rate)| {
            let rate = match &rate {
                Value::Number(n) => {
                    let text = n.to_string();
                    Decimal::from_str(&text)
                        .or_else(|_| Decimal::from_scientific(&text))
                        .ok()
                }
                Value::String(s) => Decimal::from_str(s).ok(),
                _ => None,
            }
            .ok_or_else(|| {
                SwapError::serialization(format!("Invalid fee rate for target {}: {}", target, rate))
            })?;
            Ok((target, rate))
        })
        .collect()
}
