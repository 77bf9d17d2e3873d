//! In-memory collaborators
//!
//! # WARNING: FOR TESTING PURPOSES ONLY
//!
//! Nothing here touches a network or a wallet. Broadcasts are decoded and
//! recorded, venue answers are scripted, signing returns the PSBT unchanged
//! and sleeps return immediately. Using these in production would submit
//! unsigned transactions and report purchases that never happened.

use async_trait::async_trait;
use bitcoin::consensus::encode::deserialize;
use bitcoin::secp256k1::SecretKey;
use bitcoin::{Address, Network, Transaction, Txid};
use rust_decimal_macros::dec;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{
    normalize_fee_estimates, ChainDataProvider, FeeEstimates, Signer, SignedPsbt, Sleeper, TxInfo,
    TxInfoOutput,
};
use crate::error::{SwapError, SwapResult};
use crate::marketplace::api::*;
use crate::psbt_builder::{decode_psbt, encode_psbt};
use crate::types::{AssetType, Utxo};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Chain data held in memory
///
/// Broadcast transactions are decoded and registered so a later
/// [`ChainDataProvider::transaction_info`] call sees them, the way an
/// indexer would after mempool acceptance.
pub struct MockChainData {
    network: Network,
    fee_estimates: FeeEstimates,
    confirm_broadcasts: bool,
    transactions: Mutex<HashMap<Txid, TxInfo>>,
    broadcasts: Mutex<Vec<String>>,
    address_utxos: Mutex<HashMap<String, Vec<Utxo>>>,
}

impl Default for MockChainData {
    fn default() -> Self {
        let mut fee_estimates = FeeEstimates::new();
        fee_estimates.insert("1".to_string(), dec!(20));
        fee_estimates.insert("3".to_string(), dec!(10));
        fee_estimates.insert("6".to_string(), dec!(5));

        Self {
            network: Network::Bitcoin,
            fee_estimates,
            confirm_broadcasts: false,
            transactions: Mutex::new(HashMap::new()),
            broadcasts: Mutex::new(Vec::new()),
            address_utxos: Mutex::new(HashMap::new()),
        }
    }
}

impl MockChainData {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            ..Default::default()
        }
    }

    pub fn with_fee_estimates(mut self, fee_estimates: FeeEstimates) -> Self {
        self.fee_estimates = fee_estimates;
        self
    }

    /// Fee estimates as a backend would return them, object or `[key, value]` pairs
    pub fn with_raw_fee_estimates(self, raw: &Value) -> SwapResult<Self> {
        Ok(self.with_fee_estimates(normalize_fee_estimates(raw)?))
    }

    /// Report broadcast transactions as already confirmed
    pub fn with_confirmed_broadcasts(mut self) -> Self {
        self.confirm_broadcasts = true;
        self
    }

    pub fn with_transaction(self, info: TxInfo) -> Self {
        lock(&self.transactions).insert(info.txid, info);
        self
    }

    pub fn with_address_utxos(self, address: impl Into<String>, utxos: Vec<Utxo>) -> Self {
        lock(&self.address_utxos).insert(address.into(), utxos);
        self
    }

    pub fn set_address_utxos(&self, address: impl Into<String>, utxos: Vec<Utxo>) {
        lock(&self.address_utxos).insert(address.into(), utxos);
    }

    /// Raw transaction hex of every broadcast, in order
    pub fn broadcasts(&self) -> Vec<String> {
        lock(&self.broadcasts).clone()
    }

    fn register(&self, tx: &Transaction) -> TxInfo {
        let info = TxInfo {
            txid: tx.txid(),
            inputs: tx.input.iter().map(|input| input.previous_output).collect(),
            outputs: tx
                .output
                .iter()
                .map(|output| TxInfoOutput {
                    address: Address::from_script(&output.script_pubkey, self.network)
                        .ok()
                        .map(|address| address.to_string()),
                    value: output.value,
                    script_pubkey: output.script_pubkey.clone(),
                })
                .collect(),
            confirmed: self.confirm_broadcasts,
        };
        lock(&self.transactions).insert(info.txid, info.clone());
        info
    }
}

#[async_trait]
impl ChainDataProvider for MockChainData {
    async fn fee_estimates(&self) -> SwapResult<FeeEstimates> {
        Ok(self.fee_estimates.clone())
    }

    async fn transaction_info(&self, txid: &Txid) -> SwapResult<TxInfo> {
        lock(&self.transactions)
            .get(txid)
            .cloned()
            .ok_or_else(|| SwapError::chain_data(format!("Transaction {} not found", txid)))
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> SwapResult<Txid> {
        let bytes = hex::decode(raw_tx_hex)?;
        let tx: Transaction = deserialize(&bytes)?;
        lock(&self.broadcasts).push(raw_tx_hex.to_string());
        Ok(self.register(&tx).txid)
    }

    async fn address_utxos(&self, address: &str) -> SwapResult<Vec<Utxo>> {
        Ok(lock(&self.address_utxos).get(address).cloned().unwrap_or_default())
    }
}

/// Method names under which [`MockMarketplaceApi`] answers are scripted
pub mod method {
    pub const GET_SELLER_PSBT: &str = "get_seller_psbt";
    pub const SUBMIT_BUYER_PSBT: &str = "submit_buyer_psbt";
    pub const GET_LISTING_PSBT: &str = "get_listing_psbt";
    pub const SUBMIT_LISTING_PSBT: &str = "submit_listing_psbt";
    pub const UNISAT_INIT_BID: &str = "unisat_init_bid";
    pub const UNISAT_SUBMIT_BID: &str = "unisat_submit_bid";
    pub const OKX_OFFER_PSBT: &str = "okx_offer_psbt";
    pub const OKX_SUBMIT_BID: &str = "okx_submit_bid";
    pub const ORDINALS_WALLET_OFFER_PSBT: &str = "ordinals_wallet_offer_psbt";
    pub const ORDINALS_WALLET_SUBMIT: &str = "ordinals_wallet_submit";
}

/// Marketplace with scripted answers
///
/// Answers are queued per method and consumed in order; the last answer
/// of a method is repeated once the queue would run dry. A method with no
/// script at all fails with a validation error. Every request is logged
/// as JSON together with its method name.
#[derive(Default)]
pub struct MockMarketplaceApi {
    responses: Mutex<HashMap<&'static str, VecDeque<Value>>>,
    requests: Mutex<Vec<(String, Value)>>,
}

impl MockMarketplaceApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an answer for `method` (see [`method`])
    pub fn with_response<T: Serialize>(self, method: &'static str, response: T) -> Self {
        let value = serde_json::to_value(response).unwrap_or(Value::Null);
        lock(&self.responses).entry(method).or_default().push_back(value);
        self
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<(String, Value)> {
        lock(&self.requests).clone()
    }

    /// Requests received by one method, in order
    pub fn requests_for(&self, method: &str) -> Vec<Value> {
        lock(&self.requests)
            .iter()
            .filter(|(name, _)| name == method)
            .map(|(_, request)| request.clone())
            .collect()
    }

    fn answer<R: DeserializeOwned>(&self, method: &'static str, request: Value) -> SwapResult<R> {
        lock(&self.requests).push((method.to_string(), request));

        let mut responses = lock(&self.responses);
        let queue = responses
            .get_mut(method)
            .ok_or_else(|| SwapError::validation(format!("No scripted response for {}", method)))?;
        let value = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
        .ok_or_else(|| SwapError::validation(format!("No scripted response for {}", method)))?;

        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl MarketplaceApi for MockMarketplaceApi {
    async fn get_seller_psbt(&self, request: &GetSellerPsbtRequest) -> SwapResult<ApiResponse<SellerPsbt>> {
        self.answer(method::GET_SELLER_PSBT, serde_json::to_value(request)?)
    }

    async fn submit_buyer_psbt(
        &self,
        request: &SubmitBuyerPsbtRequest,
    ) -> SwapResult<ApiResponse<SubmittedPurchase>> {
        self.answer(method::SUBMIT_BUYER_PSBT, serde_json::to_value(request)?)
    }

    async fn get_listing_psbt(&self, request: &GetListingPsbtRequest) -> SwapResult<ApiResponse<ListingPsbt>> {
        self.answer(method::GET_LISTING_PSBT, serde_json::to_value(request)?)
    }

    async fn submit_listing_psbt(
        &self,
        request: &SubmitListingPsbtRequest,
    ) -> SwapResult<ApiResponse<SubmitListingResponse>> {
        self.answer(method::SUBMIT_LISTING_PSBT, serde_json::to_value(request)?)
    }

    async fn unisat_init_bid(
        &self,
        asset_type: AssetType,
        request: &UnisatBidRequest,
    ) -> SwapResult<UnisatBidResponse> {
        let mut logged = serde_json::to_value(request)?;
        logged["assetType"] = serde_json::to_value(asset_type)?;
        self.answer(method::UNISAT_INIT_BID, logged)
    }

    async fn unisat_submit_bid(
        &self,
        asset_type: AssetType,
        bid: &UnisatSignedBid,
    ) -> SwapResult<UnisatSubmitResponse> {
        let mut logged = serde_json::to_value(bid)?;
        logged["assetType"] = serde_json::to_value(asset_type)?;
        self.answer(method::UNISAT_SUBMIT_BID, logged)
    }

    async fn okx_offer_psbt(&self, offer_id: &str, is_rune: bool) -> SwapResult<OkxSellerPsbt> {
        self.answer(
            method::OKX_OFFER_PSBT,
            serde_json::json!({ "offerId": offer_id, "rune": is_rune }),
        )
    }

    async fn okx_submit_bid(&self, submission: &OkxSubmission) -> SwapResult<ApiResponse<String>> {
        self.answer(method::OKX_SUBMIT_BID, serde_json::to_value(submission)?)
    }

    async fn ordinals_wallet_offer_psbt(
        &self,
        asset_type: AssetType,
        request: &OrdinalsWalletBidRequest,
    ) -> SwapResult<ApiResponse<OrdinalsWalletOfferPsbt>> {
        let mut logged = serde_json::to_value(request)?;
        logged["assetType"] = serde_json::to_value(asset_type)?;
        self.answer(method::ORDINALS_WALLET_OFFER_PSBT, logged)
    }

    async fn ordinals_wallet_submit(
        &self,
        asset_type: AssetType,
        submission: &OrdinalsWalletSubmission,
    ) -> SwapResult<ApiResponse<OrdinalsWalletSubmitResult>> {
        let mut logged = serde_json::to_value(submission)?;
        logged["assetType"] = serde_json::to_value(asset_type)?;
        self.answer(method::ORDINALS_WALLET_SUBMIT, logged)
    }
}

/// Signer that returns every PSBT unchanged
///
/// Records each request with its finalize flag. Optional secret keys are
/// exposed for ownership proofs.
#[derive(Default)]
pub struct MockSigner {
    segwit_key: Option<SecretKey>,
    taproot_key: Option<SecretKey>,
    requests: Mutex<Vec<(String, bool)>>,
}

impl MockSigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_segwit_key(mut self, key: SecretKey) -> Self {
        self.segwit_key = Some(key);
        self
    }

    pub fn with_taproot_key(mut self, key: SecretKey) -> Self {
        self.taproot_key = Some(key);
        self
    }

    /// `(raw_psbt, finalize)` of every signing request, in order
    pub fn requests(&self) -> Vec<(String, bool)> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl Signer for MockSigner {
    async fn sign_all_inputs(&self, raw_psbt: &str, finalize: bool) -> SwapResult<SignedPsbt> {
        let psbt = decode_psbt(raw_psbt)?;
        lock(&self.requests).push((raw_psbt.to_string(), finalize));

        let (signed_hex_psbt, signed_psbt) = encode_psbt(&psbt);
        Ok(SignedPsbt {
            signed_psbt,
            signed_hex_psbt,
        })
    }

    fn segwit_key(&self) -> Option<SecretKey> {
        self.segwit_key
    }

    fn taproot_key(&self) -> Option<SecretKey> {
        self.taproot_key
    }
}

/// Sleeper that records requested durations and returns at once
#[derive(Default)]
pub struct RecordingSleeper {
    requested: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requested(&self) -> Vec<Duration> {
        lock(&self.requested).clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        lock(&self.requested).push(duration);
    }
}
