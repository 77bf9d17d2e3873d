//! OKX purchases
//!
//! OKX hands out the seller's half-signed PSBT and expects the buyer to
//! build the whole purchase transaction around it. The seller input is
//! signed SINGLE|ANYONECANPAY, so it stays valid as long as its paired
//! output keeps the same index in the buyer's transaction.
//!
//! Two layouts exist:
//!
//! ```text
//! runes:        in  [payment0, seller, payment1..]
//!               out [receive <- seller value, seller <- price, change]
//!
//! inscriptions: in  [padding0, padding1, seller, payment..]
//!               out [buyer <- 1200, receive <- seller value, seller payment,
//!                    buyer <- 600, buyer <- 600, change]
//! ```

use bitcoin::psbt::{PartiallySignedTransaction as Psbt, PsbtSighashType};
use bitcoin::secp256k1::XOnlyPublicKey;
use bitcoin::sighash::EcdsaSighashType;
use bitcoin::Network;
use rust_decimal::Decimal;
use serde_json::json;

use super::api::OkxSubmission;
use super::offers::{parse_amount, OfferRequest};
use super::{psbt_outpoints, AddressView, OfferProcessor, ProcessOfferOptions};
use crate::address::address_from_script;
use crate::coin_select::{is_excluded, select_utxos, sum_value, utxos_worth};
use crate::config::PaddingConfig;
use crate::error::{SwapError, SwapResult};
use crate::fee_model::calculate_fee;
use crate::logging::{log_marketplace, LogLevel};
use crate::psbt_builder::{
    build_psbt_with_fee, decode_psbt, encode_psbt, input_templates, spend_tap_key, BuildRequest,
};
use crate::types::{
    AddressType, AssetType, BidSession, BuiltPsbt, ProcessOfferResponse, TxInputTemplate,
    TxOutputTemplate, Utxo, Venue,
};

/// Index of the seller's input in an OKX rune PSBT
pub const RUNE_SELLER_INPUT_INDEX: usize = 1;

/// Everything needed to wrap a buyer transaction around an OKX seller PSBT
#[derive(Debug, Clone)]
pub struct OkxBuyerParams<'a> {
    pub seller_psbt: &'a Psbt,
    pub price: u64,
    /// Where the seller is paid in the rune layout
    pub seller_address: &'a str,
    pub spend_address: &'a str,
    pub receive_address: &'a str,
    pub address_type: AddressType,
    pub tap_internal_key: Option<XOnlyPublicKey>,
    pub utxos: &'a [Utxo],
    pub fee_rate: Decimal,
    pub padding: &'a PaddingConfig,
    pub network: Network,
}

impl<'a> OkxBuyerParams<'a> {
    fn payment_target(&self) -> u64 {
        self.price + calculate_fee(self.padding.estimate_tx_size, self.fee_rate)
    }

    fn select_payment(&self, excluded: &[Utxo]) -> SwapResult<Vec<Utxo>> {
        let amount_needed = self.payment_target();
        let retrieved = select_utxos(self.utxos, amount_needed, excluded, false);
        if retrieved.is_empty() {
            return Err(SwapError::insufficient_funds(
                "Not enough funds to purchase this offer",
                amount_needed,
                self.spendable(excluded),
            ));
        }
        Ok(retrieved)
    }

    fn spendable(&self, excluded: &[Utxo]) -> u64 {
        self.utxos
            .iter()
            .filter(|utxo| !is_excluded(utxo, excluded))
            .map(|utxo| utxo.value)
            .sum()
    }

    fn provisional_change(&self, gathered: u64, spend_amount: u64) -> Option<TxOutputTemplate> {
        let estimate = spend_amount + calculate_fee(self.padding.estimate_tx_size, self.fee_rate);
        gathered
            .checked_sub(estimate)
            .filter(|change| *change > 0)
            .map(|change| TxOutputTemplate::new(self.spend_address, change))
    }

    fn finish(
        &self,
        inputs: Vec<TxInputTemplate>,
        outputs: Vec<TxOutputTemplate>,
        already_selected: Vec<Utxo>,
        excluded: &[Utxo],
        spend_amount: u64,
    ) -> SwapResult<BuiltPsbt> {
        let pool: Vec<Utxo> = self
            .utxos
            .iter()
            .filter(|utxo| !is_excluded(utxo, excluded))
            .cloned()
            .collect();
        let change_output = self.provisional_change(sum_value(&already_selected), spend_amount);

        build_psbt_with_fee(BuildRequest {
            inputs,
            outputs,
            change_output,
            available_utxos: &pool,
            already_selected,
            spend_address: self.spend_address,
            tap_internal_key: self.tap_internal_key,
            spend_amount,
            fee_rate: self.fee_rate,
            address_type: self.address_type,
            network: self.network,
        })
    }
}

/// Seller input `index` of `psbt`, marked SINGLE|ANYONECANPAY
pub fn seller_input(psbt: &Psbt, index: usize) -> SwapResult<TxInputTemplate> {
    let tx_in = psbt
        .unsigned_tx
        .input
        .get(index)
        .ok_or_else(|| SwapError::venue(Venue::Okx, format!("Seller PSBT has no input {}", index)))?;
    let input = psbt
        .inputs
        .get(index)
        .ok_or_else(|| SwapError::venue(Venue::Okx, format!("Seller PSBT has no input {}", index)))?;
    let utxo = input.witness_utxo.as_ref().ok_or_else(|| {
        SwapError::InvalidUtxoData(format!("Seller input {} has no witness UTXO", index))
    })?;

    Ok(TxInputTemplate {
        outpoint: tx_in.previous_output,
        witness_value: utxo.value,
        witness_script: utxo.script_pubkey.clone(),
        tap_internal_key: input.tap_internal_key,
        sighash_type: Some(PsbtSighashType::from(EcdsaSighashType::SinglePlusAnyoneCanPay)),
    })
}

/// Buyer PSBT for a rune order
pub fn build_okx_rune_psbt(params: &OkxBuyerParams<'_>) -> SwapResult<BuiltPsbt> {
    let padding = utxos_worth(params.utxos, params.padding.utxo_value);
    let excluded: Vec<Utxo> = if padding.len() >= params.padding.default_count {
        padding.into_iter().take(params.padding.default_count).collect()
    } else {
        Vec::new()
    };

    let retrieved = params.select_payment(&excluded)?;
    let seller = seller_input(params.seller_psbt, RUNE_SELLER_INPUT_INDEX)?;
    let seller_value = seller.witness_value;

    let mut payment = input_templates(&retrieved, params.address_type, params.tap_internal_key)?.into_iter();
    let mut inputs: Vec<TxInputTemplate> = payment.next().into_iter().collect();
    inputs.push(seller);
    inputs.extend(payment);

    let outputs = vec![
        TxOutputTemplate::new(params.receive_address, seller_value),
        TxOutputTemplate::new(params.seller_address, params.price),
    ];

    params.finish(inputs, outputs, retrieved, &excluded, params.price)
}

/// Buyer PSBT for an inscription or BRC-20 order
pub fn build_okx_inscription_psbt(params: &OkxBuyerParams<'_>) -> SwapResult<BuiltPsbt> {
    let count = params.padding.default_count;
    let padding = utxos_worth(params.utxos, params.padding.utxo_value);
    if padding.len() < count {
        return Err(SwapError::validation(format!(
            "not enough padding utxos ({} sat) for marketplace buy",
            params.padding.utxo_value
        )));
    }

    let seller_index = params
        .seller_psbt
        .inputs
        .len()
        .checked_sub(1)
        .ok_or(SwapError::EmptyTransaction)?;
    let seller = seller_input(params.seller_psbt, seller_index)?;
    let seller_value = seller.witness_value;
    let seller_payment = params
        .seller_psbt
        .unsigned_tx
        .output
        .get(seller_index)
        .ok_or_else(|| SwapError::venue(Venue::Okx, "Seller PSBT has no payment output"))?;
    let seller_payment = TxOutputTemplate::new(
        address_from_script(&seller_payment.script_pubkey, params.network)?,
        seller_payment.value,
    );

    // Every padding UTXO is reserved, not only the pair being spent
    let retrieved = params.select_payment(&padding)?;

    let spent_padding: Vec<Utxo> = padding.iter().take(count).cloned().collect();
    let mut inputs = input_templates(&spent_padding, params.address_type, params.tap_internal_key)?;
    inputs.push(seller);
    inputs.extend(input_templates(&retrieved, params.address_type, params.tap_internal_key)?);

    let padding_value = params.padding.utxo_value;
    let mut outputs = vec![
        TxOutputTemplate::new(params.spend_address, padding_value * count as u64),
        TxOutputTemplate::new(params.receive_address, seller_value),
        seller_payment,
    ];
    outputs.extend((0..count).map(|_| TxOutputTemplate::new(params.spend_address, padding_value)));

    let spend_amount = outputs.iter().map(|output| output.value).sum::<u64>() - seller_value;

    let mut already_selected = spent_padding;
    already_selected.extend(retrieved);

    params.finish(inputs, outputs, already_selected, &padding, spend_amount)
}

/// Copy the seller's signatures into the matching buyer inputs
///
/// Inputs are matched by outpoint; buyer inputs without a seller
/// counterpart are left untouched.
pub fn merge_seller_signatures(buyer: &mut Psbt, seller: &Psbt) {
    for (seller_in, seller_data) in seller.unsigned_tx.input.iter().zip(&seller.inputs) {
        let position = buyer
            .unsigned_tx
            .input
            .iter()
            .position(|input| input.previous_output == seller_in.previous_output);
        let Some(target) = position.and_then(|i| buyer.inputs.get_mut(i)) else {
            continue;
        };

        if seller_data.final_script_sig.is_some() {
            target.final_script_sig = seller_data.final_script_sig.clone();
        }
        if seller_data.final_script_witness.is_some() {
            target.final_script_witness = seller_data.final_script_witness.clone();
        }
        if seller_data.tap_key_sig.is_some() {
            target.tap_key_sig = seller_data.tap_key_sig.clone();
        }
        target.partial_sigs.extend(seller_data.partial_sigs.clone());
    }
}

impl OfferProcessor {
    pub(crate) async fn process_okx_offer(
        &self,
        options: &ProcessOfferOptions,
        view: &mut AddressView,
        address_type: AddressType,
    ) -> SwapResult<ProcessOfferResponse> {
        let offer = match &options.offer {
            OfferRequest::Single(offer) => offer,
            OfferRequest::Batch(_) => {
                return Err(SwapError::validation("OKX does not support batch offers"))
            }
        };
        let price = offer
            .total_price
            .ok_or_else(|| SwapError::validation("OKX offer has no total price"))?;
        let seller_address = offer
            .address
            .as_deref()
            .ok_or_else(|| SwapError::validation("OKX offer has no seller address"))?;

        let network = self.network()?;
        let is_rune = options.asset_type == AssetType::Runes;
        let mut session = BidSession {
            selected_utxos: options.utxos.clone(),
            ..Default::default()
        };

        if !is_rune {
            let count = self.config.padding.default_count;
            if let Some(setup) = self.setup_dummy_utxos(options, view, address_type, count, Venue::Okx).await? {
                session.dummy_tx_id = Some(setup.txid.to_string());
                session.selected_utxos = setup.utxos;
            }
        }

        log_marketplace(
            LogLevel::Debug,
            "requesting okx seller psbt",
            Some(json!({ "offer_id": offer.offer_id, "rune": is_rune })),
        );
        let seller = self.api.okx_offer_psbt(&offer.offer_id, is_rune).await?;
        let seller_psbt = decode_psbt(&seller.seller_psbt)?;

        let params = OkxBuyerParams {
            seller_psbt: &seller_psbt,
            price,
            seller_address,
            spend_address: &options.address,
            receive_address: &options.receive_address,
            address_type,
            tap_internal_key: spend_tap_key(address_type, &options.pubkey)?,
            utxos: &session.selected_utxos,
            fee_rate: options.fee_rate,
            padding: &self.config.padding,
            network,
        };
        let buyer = if is_rune {
            build_okx_rune_psbt(&params)?
        } else {
            build_okx_inscription_psbt(&params)?
        };

        let signed = self.signer.sign_all_inputs(&buyer.psbt_base64, false).await?;
        let final_psbt = if is_rune {
            signed.signed_psbt
        } else {
            let mut merged = decode_psbt(&signed.signed_psbt)?;
            merge_seller_signatures(&mut merged, &seller_psbt);
            encode_psbt(&merged).1
        };

        let spent = psbt_outpoints(&final_psbt)?;
        let submission = if is_rune {
            OkxSubmission::Rune {
                from_address: options.address.clone(),
                psbt: final_psbt,
                order_id: offer.offer_id.clone(),
            }
        } else {
            OkxSubmission::Inscription {
                ticker: offer.ticker.clone(),
                price,
                amount: parse_amount(offer.amount.as_deref()),
                from_address: options.address.clone(),
                to_address: seller_address.to_string(),
                inscription_id: offer.inscription_id.clone().unwrap_or_default(),
                buyer_psbt: final_psbt,
                order_id: offer.offer_id.clone(),
                brc20: options.asset_type == AssetType::Brc20,
            }
        };

        let response = self.api.okx_submit_bid(&submission).await?;
        match (&response.data, response.is_ok()) {
            (Some(txid), true) => {
                view.record_spent(spent);
                session.purchase_tx_id = Some(txid.clone());
            }
            _ => return Err(SwapError::venue(Venue::Okx, serde_json::to_string(&response)?)),
        }

        session.finish(Venue::Okx)
    }
}
