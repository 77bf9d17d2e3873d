//! Magic Eden purchases
//!
//! Same endpoints as Magisat, plus the ticker and the receive public key.
//! Collectibles delivered to another address need that key up front.

use super::api::GetSellerPsbtRequest;
use super::magisat::build_orders;
use super::{AddressView, OfferProcessor, ProcessOfferOptions};
use crate::error::{SwapError, SwapResult};
use crate::types::{AddressType, AssetType, ProcessOfferResponse, Venue};

impl OfferProcessor {
    pub(crate) async fn process_magic_eden_offer(
        &self,
        options: &ProcessOfferOptions,
        view: &mut AddressView,
        address_type: AddressType,
    ) -> SwapResult<ProcessOfferResponse> {
        if options.asset_type == AssetType::Collectible
            && options.receive_public_key.is_none()
            && options.receive_address != options.address
        {
            return Err(SwapError::venue(
                Venue::MagicEden,
                "Marketplace trade failed [magic-eden]:: Public key is required for receive address",
            ));
        }

        let (orders, n_utxos) = build_orders(&options.offer, options.fee_rate, false);

        let request = GetSellerPsbtRequest {
            marketplace_type: Venue::MagicEden,
            asset_type: options.asset_type,
            buyer_address: options.address.clone(),
            buyer_public_key: options.pubkey.clone(),
            fee_rate: options.fee_rate,
            ticker: Some(options.offer.ticker().to_string()),
            receive_address: options.receive_address.clone(),
            receive_public_key: options.receive_public_key.clone(),
            orders,
        };

        self.purchase_with_seller_psbt(options, view, address_type, n_utxos, request).await
    }
}
