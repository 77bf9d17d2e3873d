//! Marketplace offer flows
//!
//! [`OfferProcessor`] drives a purchase end to end against one venue:
//! padding setup, seller PSBT retrieval, buyer signing and submission.
//! Each venue's protocol lives in its own submodule as an `impl` block on
//! the processor; this module holds the dispatch, the shared padding setup
//! and the per-address lock.
//!
//! # Concurrency
//!
//! A flow holds its spending address's lock from coin selection until the
//! purchase is submitted. Behind the lock sits the address's [`AddressView`]:
//! the outpoints this processor already spent and the outputs it created.
//! Every flow applies the view to its caller's snapshot before selecting, so
//! a second flow started from the same stale snapshot never reselects an
//! outpoint the first one broadcast or handed to a venue. Flows on
//! different addresses run concurrently.

pub mod api;
pub mod bip322;
pub mod magic_eden;
pub mod magisat;
pub mod offers;
pub mod okx;
pub mod ordinals_wallet;
pub mod unisat;

use bitcoin::consensus::encode::serialize_hex;
use bitcoin::{Network, OutPoint, Txid};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::address::require_type;
use crate::config::SwapConfig;
use crate::error::{SwapError, SwapResult};
use crate::logging::{log_marketplace, log_transaction, sanitize_for_logging, LogLevel};
use crate::provider::{ChainDataProvider, Signer, SignedPsbt, Sleeper};
use crate::psbt_builder::{decode_psbt, prepare_address_for_dummy_utxos, DummyUtxoOptions};
use crate::types::{AddressType, AssetType, ProcessOfferResponse, Utxo, Venue};
use crate::utxo_lifecycle::reconcile;

use api::MarketplaceApi;
use offers::{batch_marketplace_offers, sanitize_fee_rate, select_spend_address, MarketplaceOffer, OfferRequest, SpendAccount};

/// Local spend history of one address
///
/// Holds what the indexer may not have caught up with yet: outpoints spent
/// by transactions this processor broadcast or submitted, and the outputs
/// its own broadcasts paid back to the address.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AddressView {
    spent: HashSet<OutPoint>,
    created: Vec<Utxo>,
}

impl AddressView {
    pub fn new() -> Self {
        Self::default()
    }

    /// `snapshot` without the spent outpoints, plus the created outputs it lacks
    pub fn apply(&self, snapshot: Vec<Utxo>) -> Vec<Utxo> {
        let mut utxos: Vec<Utxo> = snapshot
            .into_iter()
            .filter(|utxo| !self.spent.contains(&utxo.outpoint()))
            .collect();
        for created in &self.created {
            if !utxos.iter().any(|utxo| utxo.same_outpoint(created)) {
                utxos.push(created.clone());
            }
        }
        utxos
    }

    pub fn record_spent(&mut self, outpoints: impl IntoIterator<Item = OutPoint>) {
        self.spent.extend(outpoints);
        let spent = &self.spent;
        self.created.retain(|utxo| !spent.contains(&utxo.outpoint()));
    }

    /// Record the difference between a set and its reconciled successor
    pub fn record_reconciled(&mut self, before: &[Utxo], after: &[Utxo]) {
        let consumed: Vec<OutPoint> = before
            .iter()
            .filter(|utxo| !after.iter().any(|other| other.same_outpoint(utxo)))
            .map(Utxo::outpoint)
            .collect();
        self.record_spent(consumed);

        for utxo in after {
            let known = before.iter().chain(&self.created).any(|other| other.same_outpoint(utxo));
            if !known && !self.spent.contains(&utxo.outpoint()) {
                self.created.push(utxo.clone());
            }
        }
    }

    pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.spent.contains(outpoint)
    }

    pub fn created(&self) -> &[Utxo] {
        &self.created
    }
}

/// One lock per spending address, each guarding that address's [`AddressView`]
///
/// Entries are never evicted: a view is the only record of spends the
/// indexer has not reported yet, so the map lives exactly as long as its
/// [`OfferProcessor`] and grows by one entry per address it has spent from.
#[derive(Debug, Default)]
pub struct AddressLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<AddressView>>>>,
}

impl AddressLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock of `address`
    pub async fn acquire(&self, address: &str) -> OwnedMutexGuard<AddressView> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(address.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Inputs of a single purchase
#[derive(Debug, Clone)]
pub struct ProcessOfferOptions {
    /// Spending address
    pub address: String,
    pub pubkey: String,
    pub offer: OfferRequest,
    pub receive_address: String,
    pub receive_public_key: Option<String>,
    /// Spendable UTXOs of the spending address
    pub utxos: Vec<Utxo>,
    /// sat/vB
    pub fee_rate: Decimal,
    pub asset_type: AssetType,
}

/// Inputs of a multi-offer purchase
#[derive(Debug, Clone)]
pub struct BuyOffersOptions {
    pub offers: Vec<MarketplaceOffer>,
    pub account: SpendAccount,
    /// UTXOs of every account address
    pub utxos: Vec<Utxo>,
    pub receive_address: String,
    pub receive_public_key: Option<String>,
    pub fee_rate: Decimal,
    pub asset_type: AssetType,
}

/// An asset put up for sale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketplaceListing {
    pub ticker: String,
    pub amount: Option<String>,
    pub marketplace: Venue,
    pub price: Option<u64>,
    pub unit_price: Option<u64>,
    pub total_price: Option<u64>,
    /// UTXO holding the asset
    pub utxo: Utxo,
    pub inscription_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProcessListingOptions {
    pub address: String,
    pub pubkey: String,
    pub listing: MarketplaceListing,
    /// Where the sale proceeds go
    pub receive_btc_address: String,
    pub asset_type: AssetType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessListingResponse {
    pub success: bool,
    pub listing_id: String,
}

/// Padding outputs created ahead of a purchase
#[derive(Debug, Clone)]
pub struct DummySetup {
    pub txid: Txid,
    /// Spendable set after reconciling the setup transaction
    pub utxos: Vec<Utxo>,
}

/// Drives marketplace purchases and listings
pub struct OfferProcessor {
    chain: Arc<dyn ChainDataProvider>,
    api: Arc<dyn MarketplaceApi>,
    signer: Arc<dyn Signer>,
    sleeper: Arc<dyn Sleeper>,
    config: SwapConfig,
    locks: AddressLocks,
}

impl OfferProcessor {
    pub fn new(
        chain: Arc<dyn ChainDataProvider>,
        api: Arc<dyn MarketplaceApi>,
        signer: Arc<dyn Signer>,
        sleeper: Arc<dyn Sleeper>,
        config: SwapConfig,
    ) -> Self {
        Self {
            chain,
            api,
            signer,
            sleeper,
            config,
            locks: AddressLocks::new(),
        }
    }

    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    pub(crate) fn network(&self) -> SwapResult<Network> {
        self.config.bitcoin_network().map_err(|e| SwapError::Config {
            context: e.to_string(),
            source: Some(e.into()),
        })
    }

    /// Buy one offer or one same-venue batch
    pub async fn process_offer(&self, mut options: ProcessOfferOptions) -> SwapResult<ProcessOfferResponse> {
        let mut view = self.locks.acquire(&options.address).await;
        options.utxos = view.apply(std::mem::take(&mut options.utxos));
        let view = &mut *view;

        let address_type = require_type(&options.address)?;
        let venue = options.offer.venue()?;

        log_marketplace(
            LogLevel::Info,
            "processing offer",
            Some(json!({
                "venue": venue.as_str(),
                "address": sanitize_for_logging(&options.address),
                "batch": options.offer.is_batch(),
            })),
        );

        let result = match venue {
            Venue::Unisat => self.process_unisat_offer(&options, view).await,
            Venue::Okx => self.process_okx_offer(&options, view, address_type).await,
            Venue::OrdinalsWallet => self.process_ordinals_wallet_offer(&options, view).await,
            Venue::Magisat => self.process_magisat_offer(&options, view, address_type).await,
            Venue::MagicEden => self.process_magic_eden_offer(&options, view, address_type).await,
        };

        if let Err(e) = &result {
            log_marketplace(
                LogLevel::Warn,
                "offer failed",
                Some(json!({ "venue": venue.as_str(), "category": e.category().as_str(), "error": e.to_string() })),
            );
        }

        result
    }

    /// List an asset for sale
    pub async fn process_listing(&self, options: ProcessListingOptions) -> SwapResult<ProcessListingResponse> {
        let _guard = self.locks.acquire(&options.address).await;

        match options.listing.marketplace {
            Venue::Unisat => self.process_unisat_listing(&options).await,
            other => Err(SwapError::validation(format!(
                "Listings are not supported on {}",
                other
            ))),
        }
    }

    /// Buy several offers, possibly across venues
    ///
    /// Offers are grouped per venue and bought in order from the first
    /// account address that can afford them all. Stops at the first failure.
    pub async fn buy_offers(&self, options: BuyOffersOptions) -> SwapResult<Vec<ProcessOfferResponse>> {
        let fee_rate = sanitize_fee_rate(self.chain.as_ref(), options.fee_rate).await?;
        let selection = select_spend_address(
            &options.offers,
            self.chain.as_ref(),
            fee_rate,
            &options.account,
            &options.utxos,
        )
        .await?;

        let mut utxos = selection.utxos;
        let mut responses = Vec::new();

        for (index, offer) in batch_marketplace_offers(&selection.offers).into_iter().enumerate() {
            // Earlier purchases consumed outputs
            if index > 0 {
                utxos = self.chain.address_utxos(&selection.address).await?;
            }

            let response = self
                .process_offer(ProcessOfferOptions {
                    address: selection.address.clone(),
                    pubkey: selection.pubkey.clone(),
                    offer,
                    receive_address: options.receive_address.clone(),
                    receive_public_key: options.receive_public_key.clone(),
                    utxos: utxos.clone(),
                    fee_rate,
                    asset_type: options.asset_type,
                })
                .await?;
            responses.push(response);
        }

        Ok(responses)
    }

    /// Create `n_utxos` padding outputs on the spending address when missing
    ///
    /// Signs and broadcasts the padding batch, waits out the venue's
    /// settlement delay and returns the reconciled UTXO set, which is also
    /// recorded in `view`. `None` when the address already holds enough
    /// padding or the venue does not trade against padding.
    pub(crate) async fn setup_dummy_utxos(
        &self,
        options: &ProcessOfferOptions,
        view: &mut AddressView,
        address_type: AddressType,
        n_utxos: usize,
        venue: Venue,
    ) -> SwapResult<Option<DummySetup>> {
        if !venue.enforces_dummy_utxos() {
            return Ok(None);
        }

        let network = self.network()?;
        let dummy = DummyUtxoOptions::new(
            &options.address,
            &options.pubkey,
            address_type,
            &options.utxos,
            options.fee_rate,
            network,
        )
        .with_padding(&self.config.padding)
        .with_count(n_utxos);

        let Some(batch) = prepare_address_for_dummy_utxos(&dummy)? else {
            return Ok(None);
        };

        let signed = self.signer.sign_all_inputs(&batch.psbt_base64, true).await?;
        let txid = self.broadcast_signed(&signed, view).await?;

        let delay = self.config.settlement.delay_for(venue);
        log_transaction(
            LogLevel::Info,
            "broadcast padding utxos, waiting for settlement",
            Some(json!({
                "venue": venue.as_str(),
                "txid": txid.to_string(),
                "padding_outputs": batch.outputs.len(),
                "delay_secs": delay.as_secs(),
            })),
        );
        self.sleeper.sleep(delay).await;

        let utxos = reconcile(options.utxos.clone(), &txid, &options.address, self.chain.as_ref()).await?;
        view.record_reconciled(&options.utxos, &utxos);
        Ok(Some(DummySetup { txid, utxos }))
    }

    /// Extract a finalized transaction from a signed PSBT and broadcast it
    ///
    /// The transaction's inputs are recorded as spent once the broadcast
    /// is accepted.
    pub(crate) async fn broadcast_signed(&self, signed: &SignedPsbt, view: &mut AddressView) -> SwapResult<Txid> {
        let tx = decode_psbt(&signed.signed_psbt)?.extract_tx();
        let txid = self.chain.broadcast(&serialize_hex(&tx)).await?;
        view.record_spent(tx.input.iter().map(|input| input.previous_output));
        Ok(txid)
    }
}

/// Outpoints spent by a PSBT (hex or base64)
pub fn psbt_outpoints(raw_psbt: &str) -> SwapResult<Vec<OutPoint>> {
    Ok(decode_psbt(raw_psbt)?
        .unsigned_tx
        .input
        .iter()
        .map(|input| input.previous_output)
        .collect())
}
