//! Unisat purchases and listings
//!
//! Unisat builds the buyer PSBT itself. The buyer proves ownership of the
//! receive address when it differs from the paying address, optionally
//! signs and broadcasts the padding PSBT the venue hands back, then
//! co-signs the bid without finalizing.

use serde_json::json;

use super::api::{
    GetListingPsbtRequest, ListingInfo, OneOrMany, SubmitListingPsbtRequest, UnisatBidRequest,
    UnisatSignedBid,
};
use super::bip322::ownership_signature;
use super::offers::OfferRequest;
use super::{
    psbt_outpoints, AddressView, OfferProcessor, ProcessListingOptions, ProcessListingResponse,
    ProcessOfferOptions,
};
use crate::error::{SwapError, SwapResult};
use crate::logging::{log_marketplace, LogLevel};
use crate::types::{BidSession, ProcessOfferResponse, Venue};

impl OfferProcessor {
    pub(crate) async fn process_unisat_offer(
        &self,
        options: &ProcessOfferOptions,
        view: &mut AddressView,
    ) -> SwapResult<ProcessOfferResponse> {
        let network = self.network()?;
        let mut session = BidSession::default();

        let (auction_id, bid_price) = match &options.offer {
            OfferRequest::Single(offer) => (
                OneOrMany::One(offer.offer_id.clone()),
                OneOrMany::One(offer.total_price.unwrap_or(0)),
            ),
            OfferRequest::Batch(batch) => (
                OneOrMany::Many(batch.offer_id.clone()),
                OneOrMany::Many(batch.total_price.clone()),
            ),
        };

        let signature = if options.address != options.receive_address {
            Some(ownership_signature(
                &options.address,
                &options.receive_address,
                self.signer.as_ref(),
                network,
            )?)
        } else {
            None
        };

        let request = UnisatBidRequest {
            address: options.address.clone(),
            auction_id: auction_id.clone(),
            bid_price,
            pub_key: options.pubkey.clone(),
            receive_address: options.receive_address.clone(),
            signature,
            feerate: options.fee_rate,
        };

        log_marketplace(LogLevel::Debug, "requesting unisat bid", Some(json!({ "auctions": auction_id.to_vec().len() })));
        let bid = self.api.unisat_init_bid(options.asset_type, &request).await?;
        if let Some(error) = bid.error {
            return Err(SwapError::venue(Venue::Unisat, error));
        }

        if let Some(psbt_dummy) = &bid.psbt_dummy {
            let signed_dummy = self.signer.sign_all_inputs(psbt_dummy, true).await?;
            let txid = self.broadcast_signed(&signed_dummy, view).await?;
            log_marketplace(
                LogLevel::Info,
                "broadcast unisat padding transaction",
                Some(json!({ "txid": txid.to_string() })),
            );
            session.dummy_tx_id = Some(txid.to_string());
        }

        let psbt_bid = bid
            .psbt_bid
            .ok_or_else(|| SwapError::venue(Venue::Unisat, "Bid PSBT is missing"))?;
        let bid_id = bid
            .bid_id
            .ok_or_else(|| SwapError::venue(Venue::Unisat, "Bid ID is missing"))?;

        let signed = self.signer.sign_all_inputs(&psbt_bid, false).await?;
        let spent = psbt_outpoints(&signed.signed_hex_psbt)?;
        let submitted = self
            .api
            .unisat_submit_bid(
                options.asset_type,
                &UnisatSignedBid {
                    psbt_bid: signed.signed_hex_psbt,
                    auction_id,
                    bid_id,
                },
            )
            .await?;

        if submitted.txid.is_some() {
            view.record_spent(spent);
        }
        session.purchase_tx_id = submitted.txid;
        session.finish(Venue::Unisat)
    }

    pub(crate) async fn process_unisat_listing(
        &self,
        options: &ProcessListingOptions,
    ) -> SwapResult<ProcessListingResponse> {
        let listing = &options.listing;
        let request = GetListingPsbtRequest {
            marketplace_type: Venue::Unisat,
            asset_type: options.asset_type,
            seller_address: options.address.clone(),
            seller_public_key: options.pubkey.clone(),
            listings: vec![ListingInfo {
                inscription_id: listing.inscription_id.clone(),
                price: listing.price,
                unit_price: listing.unit_price,
                total_price: listing.total_price,
                seller_receive_address: options.receive_btc_address.clone(),
                utxo: listing.utxo.txid.to_string(),
            }],
        };

        let listing_psbt = self
            .api
            .get_listing_psbt(&request)
            .await?
            .into_data(Venue::Unisat, "Failed to get listing psbt")?;

        let listing_id = listing_psbt
            .additional_data
            .as_ref()
            .ok_or_else(|| SwapError::venue(Venue::Unisat, "Listing PSBT additional data is missing"))?
            .get("auctionId")
            .and_then(|id| id.as_str())
            .ok_or_else(|| SwapError::venue(Venue::Unisat, "Listing auction ID is missing"))?
            .to_string();

        let signed = self.signer.sign_all_inputs(&listing_psbt.psbt, false).await?;
        let submitted = self
            .api
            .submit_listing_psbt(&SubmitListingPsbtRequest {
                marketplace_type: Venue::Unisat,
                asset_type: options.asset_type,
                seller_address: options.address.clone(),
                seller_public_key: options.pubkey.clone(),
                signed_psbt: signed.signed_hex_psbt,
                order_id: listing_id.clone(),
            })
            .await?
            .into_data(Venue::Unisat, "Failed to submit listing psbt")?;

        Ok(ProcessListingResponse {
            success: submitted.success,
            listing_id,
        })
    }
}
