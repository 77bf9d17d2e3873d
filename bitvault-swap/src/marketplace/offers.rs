//! Offer shapes and the helpers that run before any venue flow
//!
//! Grouping offers per venue, estimating what a purchase will cost,
//! choosing the address that pays for it and sanitizing the fee rate.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::address::require_type;
use crate::coin_select::{select_utxos, utxos_worth};
use crate::error::{SwapError, SwapResult};
use crate::fee_model::estimate_fee_rounded;
use crate::logging::{log_marketplace, sanitize_for_logging, LogLevel};
use crate::provider::{ChainDataProvider, NEXT_BLOCK_TARGET};
use crate::types::{
    AddressType, TxOutputTemplate, Utxo, Venue, DEFAULT_PADDING_COUNT, MAX_TX_SIZE_FOR_OFFERS,
    PADDING_UTXO_VALUE, UTXO_DUST,
};

/// A single offer as listed by a venue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketplaceOffer {
    pub ticker: String,
    pub offer_id: String,
    #[serde(default)]
    pub amount: Option<String>,
    /// Seller address
    #[serde(default)]
    pub address: Option<String>,
    pub marketplace: Venue,
    #[serde(default)]
    pub price: Option<u64>,
    #[serde(default)]
    pub unit_price: Option<u64>,
    #[serde(default)]
    pub total_price: Option<u64>,
    #[serde(default)]
    pub psbt: Option<String>,
    #[serde(default)]
    pub outpoint: Option<String>,
    #[serde(default)]
    pub inscription_id: Option<String>,
}

impl MarketplaceOffer {
    pub fn new(venue: Venue, offer_id: impl Into<String>, ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            offer_id: offer_id.into(),
            amount: None,
            address: None,
            marketplace: venue,
            price: None,
            unit_price: None,
            total_price: None,
            psbt: None,
            outpoint: None,
            inscription_id: None,
        }
    }

    pub fn with_total_price(mut self, total_price: u64) -> Self {
        self.total_price = Some(total_price);
        self
    }

    pub fn with_price(mut self, price: u64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_amount(mut self, amount: impl Into<String>) -> Self {
        self.amount = Some(amount.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_inscription_id(mut self, inscription_id: impl Into<String>) -> Self {
        self.inscription_id = Some(inscription_id.into());
        self
    }

    pub fn with_outpoint(mut self, outpoint: impl Into<String>) -> Self {
        self.outpoint = Some(outpoint.into());
        self
    }

    /// Price the cost estimate charges: the price, or the total price when absent
    pub fn cost_price(&self) -> u64 {
        self.price.or(self.total_price).unwrap_or(0)
    }
}

/// Amount of an offer; missing or unparsable amounts count as 1
pub fn parse_amount(raw: Option<&str>) -> u64 {
    raw.and_then(|amount| amount.trim().parse().ok()).unwrap_or(1)
}

/// Several offers of one venue bought in a single purchase
///
/// Index `i` of every array describes the same offer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketplaceBatchOffer {
    pub ticker: String,
    pub offer_id: Vec<String>,
    pub amount: Vec<String>,
    pub address: Vec<String>,
    pub marketplace: Option<Venue>,
    pub price: Vec<u64>,
    pub unit_price: Vec<u64>,
    pub total_price: Vec<u64>,
    pub outpoint: Vec<String>,
    pub inscription_id: Vec<String>,
}

/// What a venue flow purchases
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferRequest {
    Single(MarketplaceOffer),
    Batch(MarketplaceBatchOffer),
}

impl OfferRequest {
    pub fn venue(&self) -> SwapResult<Venue> {
        match self {
            OfferRequest::Single(offer) => Ok(offer.marketplace),
            OfferRequest::Batch(batch) => batch
                .marketplace
                .ok_or_else(|| SwapError::validation("Batch offer has no marketplace")),
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, OfferRequest::Batch(_))
    }

    pub fn ticker(&self) -> &str {
        match self {
            OfferRequest::Single(offer) => &offer.ticker,
            OfferRequest::Batch(batch) => &batch.ticker,
        }
    }
}

/// Group offers by venue, collapsing the venues that accept batch purchases
///
/// Groups keep the order in which their venue first appears. OKX offers
/// stay single.
pub fn batch_marketplace_offers(offers: &[MarketplaceOffer]) -> Vec<OfferRequest> {
    let mut groups: Vec<(Venue, Vec<&MarketplaceOffer>)> = Vec::new();
    for offer in offers {
        match groups.iter_mut().find(|(venue, _)| *venue == offer.marketplace) {
            Some((_, group)) => group.push(offer),
            None => groups.push((offer.marketplace, vec![offer])),
        }
    }

    groups
        .into_iter()
        .flat_map(|(venue, group)| match venue {
            Venue::Okx => group
                .into_iter()
                .map(|offer| OfferRequest::Single(offer.clone()))
                .collect::<Vec<_>>(),
            _ => vec![OfferRequest::Batch(collapse(venue, &group))],
        })
        .collect()
}

fn collapse(venue: Venue, group: &[&MarketplaceOffer]) -> MarketplaceBatchOffer {
    let mut batch = MarketplaceBatchOffer {
        ticker: group.first().map(|offer| offer.ticker.clone()).unwrap_or_default(),
        marketplace: Some(venue),
        ..Default::default()
    };

    for offer in group {
        batch.offer_id.push(offer.offer_id.clone());
        batch.price.push(offer.price.unwrap_or(0));
        batch.unit_price.push(offer.unit_price.unwrap_or(0));
        batch.total_price.push(offer.total_price.unwrap_or(0));

        match venue {
            Venue::OrdinalsWallet => {
                batch.inscription_id.push(offer.inscription_id.clone().unwrap_or_default());
                batch.outpoint.push(offer.outpoint.clone().unwrap_or_default());
            }
            _ => {
                batch.amount.push(offer.amount.clone().unwrap_or_default());
                batch.address.push(offer.address.clone().unwrap_or_default());
            }
        }
    }

    batch
}

/// Up-front cost of buying `offers`: prices plus a worst-case fee per offer
pub fn bid_cost_estimate(offers: &[MarketplaceOffer], fee_rate: Decimal) -> u64 {
    let fee_per_offer = estimate_fee_rounded(MAX_TX_SIZE_FOR_OFFERS, fee_rate);
    offers
        .iter()
        .map(|offer| offer.cost_price() + fee_per_offer)
        .sum()
}

/// Outcome of [`can_address_afford_bid`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidAffordability {
    /// Funding UTXOs followed by the reserved padding pair
    pub retrieved_utxos: Vec<Utxo>,
    pub estimated_cost: u64,
    pub can_afford: bool,
}

/// Check whether `utxos` can fund `estimated_cost` without touching padding
///
/// Confirmed UTXOs are insisted on only when every offer's venue enforces
/// them.
pub fn can_address_afford_bid(
    estimated_cost: u64,
    offers: &[MarketplaceOffer],
    utxos: &[Utxo],
) -> BidAffordability {
    let insist_confirmed = offers
        .iter()
        .all(|offer| offer.marketplace.enforces_confirmed_utxos());

    let padding: Vec<Utxo> = utxos_worth(utxos, PADDING_UTXO_VALUE)
        .into_iter()
        .take(DEFAULT_PADDING_COUNT)
        .collect();

    let mut retrieved_utxos = select_utxos(utxos, estimated_cost, &padding, insist_confirmed);
    let can_afford = !retrieved_utxos.is_empty();
    retrieved_utxos.extend(padding);

    BidAffordability {
        retrieved_utxos,
        estimated_cost,
        can_afford,
    }
}

/// An address of the wallet account and its public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountAddress {
    pub address: String,
    pub pubkey: String,
}

/// Spending addresses of a wallet account, in preference order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendAccount {
    pub taproot: Option<AccountAddress>,
    pub native_segwit: Option<AccountAddress>,
    /// Only taproot and native segwit entries are considered
    pub address_order: Vec<AddressType>,
}

impl SpendAccount {
    pub fn new(taproot: Option<AccountAddress>, native_segwit: Option<AccountAddress>) -> Self {
        Self {
            taproot,
            native_segwit,
            address_order: vec![AddressType::Taproot, AddressType::NativeSegwit],
        }
    }

    fn address_for(&self, address_type: AddressType) -> Option<&AccountAddress> {
        match address_type {
            AddressType::Taproot => self.taproot.as_ref(),
            AddressType::NativeSegwit => self.native_segwit.as_ref(),
            _ => None,
        }
    }
}

/// Address chosen to pay for a set of offers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendSelection {
    pub address: String,
    pub pubkey: String,
    pub address_type: AddressType,
    pub utxos: Vec<Utxo>,
    pub offers: Vec<MarketplaceOffer>,
}

/// Replace a negative or fractional fee rate with the next-block estimate
pub async fn sanitize_fee_rate(chain: &dyn ChainDataProvider, fee_rate: Decimal) -> SwapResult<Decimal> {
    if fee_rate >= Decimal::ZERO && fee_rate.fract().is_zero() {
        return Ok(fee_rate);
    }

    let estimates = chain.fee_estimates().await?;
    let estimate = estimates.get(NEXT_BLOCK_TARGET).copied().ok_or_else(|| {
        SwapError::chain_data(format!("No fee estimate for target {}", NEXT_BLOCK_TARGET))
    })?;

    log_marketplace(
        LogLevel::Debug,
        "replaced fee rate with next-block estimate",
        Some(json!({ "requested": fee_rate.to_string(), "estimate": estimate.to_string() })),
    );

    Ok(estimate)
}

/// Pick the first account address, in preference order, that can afford the offers
pub async fn select_spend_address(
    offers: &[MarketplaceOffer],
    chain: &dyn ChainDataProvider,
    fee_rate: Decimal,
    account: &SpendAccount,
    utxos: &[Utxo],
) -> SwapResult<SpendSelection> {
    let fee_rate = sanitize_fee_rate(chain, fee_rate).await?;
    let estimated_cost = bid_cost_estimate(offers, fee_rate);

    for address_type in &account.address_order {
        let Some(entry) = account.address_for(*address_type) else {
            continue;
        };

        let address_utxos: Vec<Utxo> = utxos
            .iter()
            .filter(|utxo| utxo.address == entry.address)
            .cloned()
            .collect();

        let affordability = can_address_afford_bid(estimated_cost, offers, &address_utxos);
        if !affordability.can_afford {
            continue;
        }

        log_marketplace(
            LogLevel::Debug,
            "selected spend address",
            Some(json!({
                "address": sanitize_for_logging(&entry.address),
                "estimated_cost": estimated_cost,
            })),
        );

        return Ok(SpendSelection {
            address: entry.address.clone(),
            pubkey: entry.pubkey.clone(),
            address_type: require_type(&entry.address)?,
            utxos: affordability.retrieved_utxos,
            offers: offers.to_vec(),
        });
    }

    Err(SwapError::insufficient_funds(
        format!(
            "Not enough (confirmed) satoshis available to buy marketplace offers, need {} sats",
            estimated_cost
        ),
        estimated_cost,
        0,
    ))
}

/// Whether `output` of a broadcast transaction returns spendable value to `blueprint`'s address
///
/// Index 1 of a swap transaction carries the purchased inscription and is
/// never spendable.
pub fn output_tx_check(blueprint: &Utxo, swap_tx: bool, output: &TxOutputTemplate, index: usize) -> bool {
    blueprint.address == output.address && output.value > UTXO_DUST && !(swap_tx && index == 1)
}
