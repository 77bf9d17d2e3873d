//! Magisat purchases
//!
//! Magisat and Magic Eden share the aggregated seller-PSBT endpoints: the
//! order list and the fetch, sign and submit sequence defined here serve
//! both.

use serde_json::json;

use super::api::{BuyOrder, GetSellerPsbtRequest, SubmitBuyerPsbtRequest};
use super::offers::{parse_amount, OfferRequest};
use super::{psbt_outpoints, AddressView, OfferProcessor, ProcessOfferOptions};
use crate::error::SwapResult;
use crate::logging::{log_marketplace, LogLevel};
use crate::types::{AddressType, AssetType, BidSession, ProcessOfferResponse, Venue};

/// Orders of an offer and the number of padding outputs the purchase needs
///
/// A batch needs one padding output per order plus one; a single offer
/// needs two. Amounts that do not parse default to 1.
pub fn build_orders(
    offer: &OfferRequest,
    fee_rate: rust_decimal::Decimal,
    with_inscriptions: bool,
) -> (Vec<BuyOrder>, usize) {
    match offer {
        OfferRequest::Single(offer) => {
            let order = BuyOrder {
                order_id: offer.offer_id.clone(),
                price: offer.total_price.unwrap_or(0),
                amount: parse_amount(offer.amount.as_deref()),
                inscription_id: offer.inscription_id.clone().filter(|_| with_inscriptions),
                fee_rate,
            };
            (vec![order], 2)
        }
        OfferRequest::Batch(batch) => {
            let orders: Vec<BuyOrder> = batch
                .offer_id
                .iter()
                .enumerate()
                .map(|(i, order_id)| BuyOrder {
                    order_id: order_id.clone(),
                    price: batch.total_price.get(i).copied().unwrap_or(0),
                    amount: parse_amount(batch.amount.get(i).map(String::as_str)),
                    inscription_id: batch
                        .inscription_id
                        .get(i)
                        .filter(|id| with_inscriptions && !id.is_empty())
                        .cloned(),
                    fee_rate,
                })
                .collect();
            let n_utxos = orders.len() + 1;
            (orders, n_utxos)
        }
    }
}

impl OfferProcessor {
    pub(crate) async fn process_magisat_offer(
        &self,
        options: &ProcessOfferOptions,
        view: &mut AddressView,
        address_type: AddressType,
    ) -> SwapResult<ProcessOfferResponse> {
        let (orders, n_utxos) = build_orders(&options.offer, options.fee_rate, true);

        let request = GetSellerPsbtRequest {
            marketplace_type: Venue::Magisat,
            asset_type: options.asset_type,
            buyer_address: options.address.clone(),
            buyer_public_key: options.pubkey.clone(),
            fee_rate: options.fee_rate,
            ticker: None,
            receive_address: options.receive_address.clone(),
            receive_public_key: None,
            orders,
        };

        self.purchase_with_seller_psbt(options, view, address_type, n_utxos, request).await
    }

    /// Padding setup, seller PSBT fetch, buyer signature and submission
    pub(crate) async fn purchase_with_seller_psbt(
        &self,
        options: &ProcessOfferOptions,
        view: &mut AddressView,
        address_type: AddressType,
        n_utxos: usize,
        request: GetSellerPsbtRequest,
    ) -> SwapResult<ProcessOfferResponse> {
        let venue = request.marketplace_type;
        let mut session = BidSession {
            selected_utxos: options.utxos.clone(),
            ..Default::default()
        };

        if options.asset_type != AssetType::Runes {
            if let Some(setup) = self.setup_dummy_utxos(options, view, address_type, n_utxos, venue).await? {
                session.dummy_tx_id = Some(setup.txid.to_string());
                session.selected_utxos = setup.utxos;
            }
        }

        log_marketplace(
            LogLevel::Debug,
            "requesting seller psbt",
            Some(json!({ "venue": venue.as_str(), "orders": request.orders.len() })),
        );
        let seller = self
            .api
            .get_seller_psbt(&request)
            .await?
            .into_data(venue, "Failed to get seller psbt")?;

        let signed = self.signer.sign_all_inputs(&seller.psbt, false).await?;
        let spent = psbt_outpoints(&signed.signed_psbt)?;

        let submission = SubmitBuyerPsbtRequest {
            marketplace_type: venue,
            asset_type: options.asset_type,
            buyer_address: options.address.clone(),
            buyer_public_key: options.pubkey.clone(),
            receive_address: options.receive_address.clone(),
            psbt: signed.signed_psbt,
            orders: request.orders,
            additional_data: seller.additional_data,
        };

        let submitted = self
            .api
            .submit_buyer_psbt(&submission)
            .await?
            .into_data(venue, "Failed to submit buyer psbt")?;
        view.record_spent(spent);

        session.purchase_tx_id = submitted.txid;
        session.finish(venue)
    }
}
