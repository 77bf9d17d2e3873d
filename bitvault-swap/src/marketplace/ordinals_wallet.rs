//! Ordinals-Wallet purchases
//!
//! The venue returns a ready purchase PSBT and, when the buyer lacks
//! padding, a setup PSBT creating it. Both are signed and finalized by the
//! buyer; the venue broadcasts them together.

use bitcoin::consensus::encode::serialize_hex;
use serde_json::json;
use std::time::Duration;

use super::api::{OrdinalsWalletBidRequest, OrdinalsWalletSubmission};
use super::offers::OfferRequest;
use super::{psbt_outpoints, AddressView, OfferProcessor, ProcessOfferOptions};
use crate::error::SwapResult;
use crate::logging::{log_marketplace, LogLevel};
use crate::psbt_builder::decode_psbt;
use crate::types::{AssetType, BidSession, ProcessOfferResponse, Venue};

fn non_empty<'a>(values: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    values.into_iter().filter(|v| !v.is_empty()).cloned().collect()
}

impl OfferProcessor {
    pub(crate) async fn process_ordinals_wallet_offer(
        &self,
        options: &ProcessOfferOptions,
        view: &mut AddressView,
    ) -> SwapResult<ProcessOfferResponse> {
        let venue = Venue::OrdinalsWallet;
        let mut session = BidSession::default();
        let mut spent = Vec::new();

        let (inscriptions, outpoints) = match &options.offer {
            OfferRequest::Single(offer) => (non_empty(&offer.inscription_id), non_empty(&offer.outpoint)),
            OfferRequest::Batch(batch) => (non_empty(&batch.inscription_id), non_empty(&batch.outpoint)),
        };

        let is_rune = options.asset_type == AssetType::Runes;
        let request = OrdinalsWalletBidRequest {
            address: options.address.clone(),
            public_key: options.pubkey.clone(),
            fee_rate: options.fee_rate,
            receive_address: options.receive_address.clone(),
            inscriptions: if is_rune { None } else { Some(inscriptions) },
            outpoints: if is_rune { Some(outpoints) } else { None },
        };

        log_marketplace(LogLevel::Debug, "requesting ordinals-wallet offer psbt", Some(json!({ "rune": is_rune })));
        let offer_psbt = self
            .api
            .ordinals_wallet_offer_psbt(options.asset_type, &request)
            .await?
            .into_data(venue, "Failed to get offer psbt")?;

        let setup_psbt = match &offer_psbt.setup {
            Some(setup) => {
                let signed = self.signer.sign_all_inputs(setup, true).await?;
                let setup_tx = decode_psbt(&signed.signed_hex_psbt)?.extract_tx();
                spent.extend(setup_tx.input.iter().map(|input| input.previous_output));
                session.dummy_tx_id = Some(setup_tx.txid().to_string());
                Some(serialize_hex(&setup_tx))
            }
            None => None,
        };

        let signed = self.signer.sign_all_inputs(&offer_psbt.purchase, true).await?;
        spent.extend(psbt_outpoints(&signed.signed_hex_psbt)?);
        let result = self
            .api
            .ordinals_wallet_submit(
                options.asset_type,
                &OrdinalsWalletSubmission {
                    psbt: signed.signed_hex_psbt,
                    setup_psbt: setup_psbt.clone(),
                },
            )
            .await?
            .into_data(venue, "Failed to submit purchase")?;

        if result.success {
            view.record_spent(spent);
            session.purchase_tx_id = result.purchase;
            if setup_psbt.is_some() {
                self.sleeper
                    .sleep(Duration::from_secs(self.config.settlement.ordinals_wallet_setup_secs))
                    .await;
            }
        }

        session.finish(venue)
    }
}
