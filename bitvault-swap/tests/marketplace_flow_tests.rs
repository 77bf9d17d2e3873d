//! End-to-end offer flows against in-memory collaborators
//!
//! The mock signer returns PSBTs unchanged, so broadcast transactions are
//! the unsigned ones and their txids are known up front.


use bitcoin::consensus::encode::deserialize;
use bitcoin::psbt::PsbtSighashType;
use bitcoin::sighash::EcdsaSighashType;
use bitcoin::{Network, Transaction, Witness};
use bitvault_swap::config::{SettlementConfig, SwapConfig};
use bitvault_swap::error::SwapError;
use bitvault_swap::marketplace::api::*;
use bitvault_swap::marketplace::bip322::{ownership_message, sign_legacy_message};
use bitvault_swap::marketplace::offers::{AccountAddress, MarketplaceOffer, OfferRequest, SpendAccount};
use bitvault_swap::marketplace::{
    BuyOffersOptions, MarketplaceListing, OfferProcessor, ProcessListingOptions, ProcessOfferOptions,
};
use bitvault_swap::provider::mock::{method, MockChainData, MockMarketplaceApi, MockSigner, RecordingSleeper};
use bitvault_swap::psbt_builder::{decode_psbt, input_templates};
use bitvault_swap::types::{AddressType, AssetType, BuiltPsbt, TxOutputTemplate, Utxo, Venue};
use rust_decimal_macros::dec;
use serde_json::{json, Map};
use std::sync::Arc;
use std::time::Duration;
use test_helpers::*;

struct Harness {
    chain: Arc<MockChainData>,
    api: Arc<MockMarketplaceApi>,
    signer: Arc<MockSigner>,
    sleeper: Arc<RecordingSleeper>,
    processor: OfferProcessor,
}

fn harness(api: MockMarketplaceApi, signer: MockSigner) -> Harness {
    harness_with(MockChainData::default(), api, signer, SwapConfig::default())
}

fn harness_with(chain: MockChainData, api: MockMarketplaceApi, signer: MockSigner, config: SwapConfig) -> Harness {
    setup();
    let chain = Arc::new(chain);
    let api = Arc::new(api);
    let signer = Arc::new(signer);
    let sleeper = Arc::new(RecordingSleeper::new());
    let processor = OfferProcessor::new(chain.clone(), api.clone(), signer.clone(), sleeper.clone(), config);
    Harness {
        chain,
        api,
        signer,
        sleeper,
        processor,
    }
}

fn options(payer: &bitcoin::Address, utxos: Vec<Utxo>, offer: OfferRequest, asset_type: AssetType) -> ProcessOfferOptions {
    ProcessOfferOptions {
        address: payer.to_string(),
        pubkey: pubkey_hex(1),
        offer,
        receive_address: payer.to_string(),
        receive_public_key: None,
        utxos,
        fee_rate: dec!(5),
        asset_type,
    }
}

fn single(venue: Venue, id: &str, price: u64) -> OfferRequest {
    OfferRequest::Single(
        MarketplaceOffer::new(venue, id, "ordi")
            .with_price(price)
            .with_total_price(price)
            .with_amount("1")
            .with_address(taproot_address(9).to_string())
            .with_inscription_id(format!("{}i0", id)),
    )
}

fn broadcast_txids(chain: &MockChainData) -> Vec<String> {
    chain
        .broadcasts()
        .iter()
        .map(|raw| {
            let tx: Transaction = deserialize(&hex::decode(raw).unwrap()).unwrap();
            tx.txid().to_string()
        })
        .collect()
}

/// PSBT a venue hands back, spending a counterparty UTXO
fn venue_psbt(byte: u8) -> BuiltPsbt {
    simple_psbt(&utxo(&segwit_address(byte), byte, 0, 20_000))
}

#[tokio::test]
async fn magisat_purchase_sets_up_padding_first() {
    let payer = segwit_address(1);
    let api = MockMarketplaceApi::new()
        .with_response(
            method::GET_SELLER_PSBT,
            ApiResponse::ok(SellerPsbt {
                psbt: venue_psbt(20).psbt_base64,
                additional_data: Map::new(),
            }),
        )
        .with_response(
            method::SUBMIT_BUYER_PSBT,
            ApiResponse::ok(SubmittedPurchase { txid: Some("purchase-1".to_string()) }),
        );
    let h = harness(api, MockSigner::new());

    let utxos = vec![utxo(&payer, 1, 0, 100_000)];
    let response = h
        .processor
        .process_offer(options(&payer, utxos, single(Venue::Magisat, "m1", 10_000), AssetType::Ordinals))
        .await
        .unwrap();

    assert_eq!(response.purchase_tx_id, "purchase-1");
    let txids = broadcast_txids(&h.chain);
    assert_eq!(txids.len(), 1);
    assert_eq!(response.dummy_tx_id.as_deref(), Some(txids[0].as_str()));
    assert_eq!(h.sleeper.requested(), vec![Duration::from_secs(60)]);

    // Padding batch finalized, seller PSBT left open
    let finalize: Vec<bool> = h.signer.requests().iter().map(|(_, f)| *f).collect();
    assert_eq!(finalize, vec![true, false]);

    let request = &h.api.requests_for(method::GET_SELLER_PSBT)[0];
    assert_eq!(request["marketplaceType"], json!("magisat"));
    assert_eq!(request["orders"][0]["orderId"], json!("m1"));
    assert_eq!(request["orders"][0]["inscriptionId"], json!("m1i0"));
    assert!(request.get("ticker").is_none());
}

#[tokio::test]
async fn magisat_runes_skip_padding() {
    let payer = segwit_address(1);
    let api = MockMarketplaceApi::new()
        .with_response(
            method::GET_SELLER_PSBT,
            ApiResponse::ok(SellerPsbt {
                psbt: venue_psbt(20).psbt_hex,
                additional_data: Map::new(),
            }),
        )
        .with_response(
            method::SUBMIT_BUYER_PSBT,
            ApiResponse::ok(SubmittedPurchase { txid: Some("rune-buy".to_string()) }),
        );
    let h = harness(api, MockSigner::new());

    let response = h
        .processor
        .process_offer(options(&payer, vec![utxo(&payer, 1, 0, 100_000)], single(Venue::Magisat, "r1", 5_000), AssetType::Runes))
        .await
        .unwrap();

    assert_eq!(response.dummy_tx_id, None);
    assert!(h.chain.broadcasts().is_empty());
    assert!(h.sleeper.requested().is_empty());
}

#[tokio::test]
async fn seller_psbt_failure_is_reported_with_the_step() {
    let payer = segwit_address(1);
    let api = MockMarketplaceApi::new()
        .with_response(method::GET_SELLER_PSBT, ApiResponse::<SellerPsbt>::failure(404, "offer not found"));
    let h = harness(api, MockSigner::new());

    let result = h
        .processor
        .process_offer(options(&payer, vec![utxo(&payer, 1, 0, 100_000)], single(Venue::Magisat, "m1", 1_000), AssetType::Runes))
        .await;

    match result {
        Err(SwapError::VenueProtocol { venue, message }) => {
            assert_eq!(venue, Venue::Magisat);
            assert_eq!(message, "Failed to get seller psbt: offer not found");
        }
        other => panic!("expected VenueProtocol, got {:?}", other),
    }
    assert!(h.api.requests_for(method::SUBMIT_BUYER_PSBT).is_empty());
}

#[tokio::test]
async fn magic_eden_needs_a_receive_key_for_foreign_collectibles() {
    let payer = segwit_address(1);
    let h = harness(MockMarketplaceApi::new(), MockSigner::new());

    let mut opts = options(&payer, vec![utxo(&payer, 1, 0, 100_000)], single(Venue::MagicEden, "e1", 1_000), AssetType::Collectible);
    opts.receive_address = taproot_address(2).to_string();

    match h.processor.process_offer(opts).await {
        Err(SwapError::VenueProtocol { venue, message }) => {
            assert_eq!(venue, Venue::MagicEden);
            assert_eq!(
                message,
                "Marketplace trade failed [magic-eden]:: Public key is required for receive address"
            );
        }
        other => panic!("expected VenueProtocol, got {:?}", other),
    }
    assert!(h.api.requests().is_empty());
    assert!(h.chain.broadcasts().is_empty());
}

#[tokio::test]
async fn magic_eden_sends_ticker_and_receive_key() {
    let payer = segwit_address(1);
    let api = MockMarketplaceApi::new()
        .with_response(
            method::GET_SELLER_PSBT,
            ApiResponse::ok(SellerPsbt {
                psbt: venue_psbt(20).psbt_base64,
                additional_data: Map::new(),
            }),
        )
        .with_response(
            method::SUBMIT_BUYER_PSBT,
            ApiResponse::ok(SubmittedPurchase { txid: Some("me-buy".to_string()) }),
        );
    let h = harness(api, MockSigner::new());

    let mut opts = options(&payer, vec![utxo(&payer, 1, 0, 100_000)], single(Venue::MagicEden, "e1", 1_000), AssetType::Runes);
    opts.receive_address = taproot_address(2).to_string();
    opts.receive_public_key = Some(pubkey_hex(2));

    let response = h.processor.process_offer(opts).await.unwrap();
    assert_eq!(response.purchase_tx_id, "me-buy");

    let request = &h.api.requests_for(method::GET_SELLER_PSBT)[0];
    assert_eq!(request["ticker"], json!("ordi"));
    assert_eq!(request["receivePublicKey"], json!(pubkey_hex(2)));
    assert!(request["orders"][0].get("inscriptionId").is_none());
}

#[tokio::test]
async fn unisat_bid_with_proof_for_taproot_receive_address() {
    let payer = segwit_address(1);
    let api = MockMarketplaceApi::new()
        .with_response(
            method::UNISAT_INIT_BID,
            UnisatBidResponse {
                psbt_bid: Some(venue_psbt(20).psbt_hex),
                psbt_dummy: None,
                bid_id: Some("bid-7".to_string()),
                error: None,
            },
        )
        .with_response(method::UNISAT_SUBMIT_BID, UnisatSubmitResponse { txid: Some("unisat-buy".to_string()) });
    let h = harness(api, MockSigner::new().with_taproot_key(secret_key(2)));

    let mut opts = options(&payer, vec![utxo(&payer, 1, 0, 100_000)], single(Venue::Unisat, "auction-1", 8_000), AssetType::Brc20);
    opts.receive_address = taproot_address(2).to_string();
    let opts_receive = opts.receive_address.clone();

    let response = h.processor.process_offer(opts).await.unwrap();
    assert_eq!(response.purchase_tx_id, "unisat-buy");
    assert_eq!(response.dummy_tx_id, None);

    // A taproot proof is a one-item witness holding a bare 64-byte schnorr signature
    let request = &h.api.requests_for(method::UNISAT_INIT_BID)[0];
    let signature = request["signature"].as_str().unwrap();
    let witness: Witness = deserialize(&base64::decode(signature).unwrap()).unwrap();
    assert_eq!(witness.len(), 1);
    assert_eq!(witness.nth(0).unwrap().len(), 64);
    assert_ne!(signature, sign_legacy_message(&ownership_message(&payer.to_string(), &opts_receive), &secret_key(2)).unwrap());
    assert_eq!(request["auctionId"], json!("auction-1"));
    assert_eq!(request["bidPrice"], json!(8_000));
    assert_eq!(request["assetType"], json!("brc20"));

    let submitted = &h.api.requests_for(method::UNISAT_SUBMIT_BID)[0];
    assert_eq!(submitted["bidId"], json!("bid-7"));
    assert_eq!(h.signer.requests(), vec![(venue_psbt(20).psbt_hex, false)]);
}

#[tokio::test]
async fn unisat_broadcasts_the_venue_padding_psbt() {
    let payer = segwit_address(1);
    let dummy = simple_psbt(&utxo(&payer, 1, 0, 100_000));
    let dummy_txid = dummy.psbt().unwrap().unsigned_tx.txid().to_string();
    let api = MockMarketplaceApi::new()
        .with_response(
            method::UNISAT_INIT_BID,
            UnisatBidResponse {
                psbt_bid: Some(venue_psbt(20).psbt_base64),
                psbt_dummy: Some(dummy.psbt_base64.clone()),
                bid_id: Some("bid-8".to_string()),
                error: None,
            },
        )
        .with_response(method::UNISAT_SUBMIT_BID, UnisatSubmitResponse { txid: Some("unisat-buy".to_string()) });
    let h = harness(api, MockSigner::new());

    let response = h
        .processor
        .process_offer(options(&payer, vec![utxo(&payer, 1, 0, 100_000)], single(Venue::Unisat, "auction-2", 8_000), AssetType::Ordinals))
        .await
        .unwrap();

    assert_eq!(response.dummy_tx_id, Some(dummy_txid));
    assert!(h.api.requests_for(method::UNISAT_INIT_BID)[0].get("signature").is_none());
}

#[tokio::test]
async fn unisat_errors_surface_verbatim() {
    let payer = segwit_address(1);
    let api = MockMarketplaceApi::new().with_response(
        method::UNISAT_INIT_BID,
        UnisatBidResponse {
            error: Some("auction closed".to_string()),
            ..Default::default()
        },
    );
    let h = harness(api, MockSigner::new());

    let result = h
        .processor
        .process_offer(options(&payer, Vec::new(), single(Venue::Unisat, "auction-3", 1_000), AssetType::Brc20))
        .await;
    assert!(matches!(result, Err(SwapError::VenueProtocol { message, .. }) if message == "auction closed"));
}

#[tokio::test]
async fn okx_rejects_batches() {
    let payer = segwit_address(1);
    let h = harness(MockMarketplaceApi::new(), MockSigner::new());

    let batch = OfferRequest::Batch(Default::default());
    let mut opts = options(&payer, Vec::new(), batch, AssetType::Brc20);
    if let OfferRequest::Batch(b) = &mut opts.offer {
        b.marketplace = Some(Venue::Okx);
    }

    match h.processor.process_offer(opts).await {
        Err(SwapError::Validation(message)) => assert_eq!(message, "OKX does not support batch offers"),
        other => panic!("expected a validation error, got {:?}", other),
    }
}

/// Seller PSBT in the inscription layout: the seller input and its
/// payment output sit at index 2
fn okx_inscription_seller_psbt(seller_value: u64, price: u64) -> BuiltPsbt {
    let seller = taproot_address(9);
    let placeholders = vec![utxo(&seller, 30, 0, 600), utxo(&seller, 31, 0, 600)];
    let mut inputs = input_templates(&placeholders, AddressType::Taproot, None).unwrap();
    inputs.extend(input_templates(&[utxo(&seller, 32, 0, seller_value)], AddressType::Taproot, None).unwrap());
    let outputs = vec![
        TxOutputTemplate::new(seller.to_string(), 1_200),
        TxOutputTemplate::new(seller.to_string(), seller_value),
        TxOutputTemplate::new(seller.to_string(), price),
    ];
    BuiltPsbt::from_templates(inputs, outputs, Network::Bitcoin).unwrap()
}

#[tokio::test]
async fn okx_inscription_purchase_wraps_the_seller_input() {
    let payer = segwit_address(1);
    let seller_psbt = okx_inscription_seller_psbt(10_000, 20_000);
    let api = MockMarketplaceApi::new()
        .with_response(method::OKX_OFFER_PSBT, OkxSellerPsbt { seller_psbt: seller_psbt.psbt_base64.clone() })
        .with_response(method::OKX_SUBMIT_BID, ApiResponse::ok("okx-buy".to_string()));
    let config = SwapConfig {
        settlement: SettlementConfig::immediate(),
        ..Default::default()
    };
    let h = harness_with(MockChainData::default(), api, MockSigner::new(), config);

    let utxos = vec![
        utxo(&payer, 1, 0, 600),
        utxo(&payer, 2, 0, 600),
        utxo(&payer, 3, 0, 100_000),
    ];
    let response = h
        .processor
        .process_offer(options(&payer, utxos, single(Venue::Okx, "okx-1", 20_000), AssetType::Ordinals))
        .await
        .unwrap();

    assert_eq!(response.purchase_tx_id, "okx-buy");
    assert_eq!(response.dummy_tx_id, None);

    let submission = &h.api.requests_for(method::OKX_SUBMIT_BID)[0];
    assert_eq!(submission["orderId"], json!("okx-1"));
    assert_eq!(submission["brc20"], json!(false));
    assert_eq!(submission["price"], json!(20_000));

    let buyer = decode_psbt(submission["buyerPsbt"].as_str().unwrap()).unwrap();
    let seller = seller_psbt.psbt().unwrap();
    assert_eq!(buyer.unsigned_tx.input[2].previous_output, seller.unsigned_tx.input[2].previous_output);
    assert_eq!(
        buyer.inputs[2].sighash_type,
        Some(PsbtSighashType::from(EcdsaSighashType::SinglePlusAnyoneCanPay))
    );
    assert_eq!(buyer.unsigned_tx.output[2], seller.unsigned_tx.output[2]);
    assert_eq!(buyer.unsigned_tx.output[0].value, 1_200);
    assert_eq!(buyer.unsigned_tx.output[1].value, 10_000);
    assert_eq!(buyer.unsigned_tx.output[3].value, 600);
    assert_eq!(buyer.unsigned_tx.output[4].value, 600);
}

#[tokio::test]
async fn okx_without_padding_cannot_buy_inscriptions() {
    let payer = segwit_address(1);
    let seller_psbt = okx_inscription_seller_psbt(10_000, 20_000);
    let api = MockMarketplaceApi::new()
        .with_response(method::OKX_OFFER_PSBT, OkxSellerPsbt { seller_psbt: seller_psbt.psbt_base64 });
    let h = harness(api, MockSigner::new());

    // 1,000 sats cannot fund the padding batch
    let result = h
        .processor
        .process_offer(options(&payer, vec![utxo(&payer, 3, 0, 1_000)], single(Venue::Okx, "okx-2", 20_000), AssetType::Ordinals))
        .await;

    assert!(matches!(result, Err(SwapError::InsufficientFunds { .. })));
    assert!(h.api.requests_for(method::OKX_SUBMIT_BID).is_empty());
}

#[tokio::test]
async fn ordinals_wallet_signs_setup_and_purchase() {
    let payer = segwit_address(1);
    let setup_psbt = simple_psbt(&utxo(&payer, 1, 0, 100_000));
    let setup_txid = setup_psbt.psbt().unwrap().unsigned_tx.txid().to_string();
    let api = MockMarketplaceApi::new()
        .with_response(
            method::ORDINALS_WALLET_OFFER_PSBT,
            ApiResponse::ok(OrdinalsWalletOfferPsbt {
                setup: Some(setup_psbt.psbt_base64.clone()),
                purchase: venue_psbt(20).psbt_base64,
            }),
        )
        .with_response(
            method::ORDINALS_WALLET_SUBMIT,
            ApiResponse::ok(OrdinalsWalletSubmitResult {
                success: true,
                purchase: Some("ow-buy".to_string()),
            }),
        );
    let h = harness(api, MockSigner::new());

    let response = h
        .processor
        .process_offer(options(&payer, Vec::new(), single(Venue::OrdinalsWallet, "w1", 3_000), AssetType::Ordinals))
        .await
        .unwrap();

    assert_eq!(response.purchase_tx_id, "ow-buy");
    assert_eq!(response.dummy_tx_id, Some(setup_txid));
    assert_eq!(h.sleeper.requested(), vec![Duration::from_secs(5)]);
    assert!(h.signer.requests().iter().all(|(_, finalize)| *finalize));

    let request = &h.api.requests_for(method::ORDINALS_WALLET_OFFER_PSBT)[0];
    assert_eq!(request["inscriptions"], json!(["w1i0"]));
    assert!(request.get("outpoints").is_none());

    let submission = &h.api.requests_for(method::ORDINALS_WALLET_SUBMIT)[0];
    assert!(submission["setupPsbt"].as_str().is_some());
    // Nothing is broadcast locally; the venue does it
    assert!(h.chain.broadcasts().is_empty());
}

#[tokio::test]
async fn ordinals_wallet_rejection_has_no_purchase() {
    let payer = segwit_address(1);
    let api = MockMarketplaceApi::new()
        .with_response(
            method::ORDINALS_WALLET_OFFER_PSBT,
            ApiResponse::ok(OrdinalsWalletOfferPsbt {
                setup: None,
                purchase: venue_psbt(20).psbt_base64,
            }),
        )
        .with_response(method::ORDINALS_WALLET_SUBMIT, ApiResponse::ok(OrdinalsWalletSubmitResult::default()));
    let h = harness(api, MockSigner::new());

    let result = h
        .processor
        .process_offer(options(&payer, Vec::new(), single(Venue::OrdinalsWallet, "w2", 3_000), AssetType::Runes))
        .await;

    assert!(matches!(result, Err(SwapError::VenueProtocol { venue: Venue::OrdinalsWallet, .. })));
    assert!(h.sleeper.requested().is_empty());
}

#[tokio::test]
async fn unisat_listing_returns_the_auction_id() {
    let seller = segwit_address(1);
    let mut additional_data = Map::new();
    additional_data.insert("auctionId".to_string(), json!("auc-5"));
    let api = MockMarketplaceApi::new()
        .with_response(
            method::GET_LISTING_PSBT,
            ApiResponse::ok(ListingPsbt {
                psbt: venue_psbt(20).psbt_base64,
                additional_data: Some(additional_data),
            }),
        )
        .with_response(method::SUBMIT_LISTING_PSBT, ApiResponse::ok(SubmitListingResponse { success: true }));
    let h = harness(api, MockSigner::new());

    let listing = MarketplaceListing {
        ticker: "ordi".to_string(),
        amount: Some("100".to_string()),
        marketplace: Venue::Unisat,
        price: Some(50_000),
        unit_price: Some(500),
        total_price: Some(50_000),
        utxo: utxo(&seller, 4, 0, 546),
        inscription_id: None,
    };
    let response = h
        .processor
        .process_listing(ProcessListingOptions {
            address: seller.to_string(),
            pubkey: pubkey_hex(1),
            listing: listing.clone(),
            receive_btc_address: seller.to_string(),
            asset_type: AssetType::Brc20,
        })
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.listing_id, "auc-5");
    assert_eq!(h.api.requests_for(method::SUBMIT_LISTING_PSBT)[0]["orderId"], json!("auc-5"));

    let elsewhere = MarketplaceListing {
        marketplace: Venue::Okx,
        ..listing
    };
    let result = h
        .processor
        .process_listing(ProcessListingOptions {
            address: seller.to_string(),
            pubkey: pubkey_hex(1),
            listing: elsewhere,
            receive_btc_address: seller.to_string(),
            asset_type: AssetType::Brc20,
        })
        .await;
    assert!(matches!(result, Err(SwapError::Validation(_))));
}

#[tokio::test]
async fn buy_offers_batches_same_venue_offers() {
    let payer = segwit_address(1);
    let api = MockMarketplaceApi::new()
        .with_response(
            method::UNISAT_INIT_BID,
            UnisatBidResponse {
                psbt_bid: Some(venue_psbt(20).psbt_base64),
                bid_id: Some("bid-9".to_string()),
                ..Default::default()
            },
        )
        .with_response(method::UNISAT_SUBMIT_BID, UnisatSubmitResponse { txid: Some("batch-buy".to_string()) });
    let h = harness(api, MockSigner::new());

    let offers = vec![
        MarketplaceOffer::new(Venue::Unisat, "a1", "ordi").with_price(10_000).with_total_price(10_000),
        MarketplaceOffer::new(Venue::Unisat, "a2", "ordi").with_price(15_000).with_total_price(15_000),
    ];
    let account = SpendAccount::new(
        None,
        Some(AccountAddress { address: payer.to_string(), pubkey: pubkey_hex(1) }),
    );

    let responses = h
        .processor
        .buy_offers(BuyOffersOptions {
            offers,
            account,
            utxos: vec![utxo(&payer, 1, 0, 200_000)],
            receive_address: payer.to_string(),
            receive_public_key: None,
            fee_rate: dec!(-1),
            asset_type: AssetType::Brc20,
        })
        .await
        .unwrap();

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].purchase_tx_id, "batch-buy");

    let request = &h.api.requests_for(method::UNISAT_INIT_BID)[0];
    assert_eq!(request["auctionId"], json!(["a1", "a2"]));
    assert_eq!(request["bidPrice"], json!([10_000, 15_000]));
    // Replaced by the next-block estimate
    assert_eq!(request["feerate"], json!("20"));
}

#[tokio::test]
async fn buy_offers_fails_when_no_address_can_pay() {
    let payer = segwit_address(1);
    let h = harness(MockMarketplaceApi::new(), MockSigner::new());

    let result = h
        .processor
        .buy_offers(BuyOffersOptions {
            offers: vec![MarketplaceOffer::new(Venue::Magisat, "m1", "ordi").with_price(50_000)],
            account: SpendAccount::new(
                None,
                Some(AccountAddress { address: payer.to_string(), pubkey: pubkey_hex(1) }),
            ),
            utxos: vec![utxo(&payer, 1, 0, 10_000)],
            receive_address: payer.to_string(),
            receive_public_key: None,
            fee_rate: dec!(10),
            asset_type: AssetType::Ordinals,
        })
        .await;

    assert!(matches!(result, Err(SwapError::InsufficientFunds { .. })));
    assert!(h.api.requests().is_empty());
}

/// Seller PSBT in the rune layout: the rune UTXO is the second input
fn okx_rune_seller_psbt(seller_value: u64) -> BuiltPsbt {
    let seller = taproot_address(9);
    let seller_key = bitvault_swap::psbt_builder::x_only_from_hex(&pubkey_hex(9)).unwrap();
    let inputs = input_templates(
        &[utxo(&seller, 40, 0, 600), utxo(&seller, 41, 0, seller_value)],
        AddressType::Taproot,
        Some(seller_key),
    )
    .unwrap();
    let outputs = vec![
        TxOutputTemplate::new(seller.to_string(), 600),
        TxOutputTemplate::new(seller.to_string(), seller_value),
    ];
    BuiltPsbt::from_templates(inputs, outputs, Network::Bitcoin).unwrap()
}

#[test]
fn okx_rune_purchase_interleaves_the_seller_input() {
    use bitvault_swap::config::PaddingConfig;
    use bitvault_swap::marketplace::okx::{build_okx_rune_psbt, OkxBuyerParams};

    let payer = segwit_address(1);
    let seller = taproot_address(9).to_string();
    let seller_psbt = decode_psbt(&okx_rune_seller_psbt(10_000).psbt_base64).unwrap();
    let padding = [utxo(&payer, 1, 0, 600), utxo(&payer, 2, 0, 600)];
    let payments = [utxo(&payer, 3, 0, 50_000), utxo(&payer, 4, 0, 30_000)];
    let utxos: Vec<Utxo> = padding.iter().chain(&payments).cloned().collect();
    let payer_address = payer.to_string();
    let padding_config = PaddingConfig::default();

    let built = build_okx_rune_psbt(&OkxBuyerParams {
        seller_psbt: &seller_psbt,
        price: 60_000,
        seller_address: &seller,
        spend_address: &payer_address,
        receive_address: &payer_address,
        address_type: AddressType::NativeSegwit,
        tap_internal_key: None,
        utxos: &utxos,
        fee_rate: dec!(5),
        padding: &padding_config,
        network: Network::Bitcoin,
    })
    .unwrap();

    let seller_outpoint = seller_psbt.unsigned_tx.input[1].previous_output;
    let outpoints: Vec<_> = built.inputs.iter().map(|input| input.outpoint).collect();
    assert_eq!(outpoints, vec![payments[0].outpoint(), seller_outpoint, payments[1].outpoint()]);
    assert!(padding.iter().all(|p| !outpoints.contains(&p.outpoint())));

    let seller_input = &built.inputs[1];
    assert_eq!(
        seller_input.sighash_type,
        Some(PsbtSighashType::from(EcdsaSighashType::SinglePlusAnyoneCanPay))
    );
    assert!(seller_input.tap_internal_key.is_some());
    assert!(built.inputs[0].sighash_type.is_none());

    assert_eq!(built.outputs.len(), 3);
    assert_eq!(built.outputs[0], TxOutputTemplate::new(payer_address.clone(), 10_000));
    assert_eq!(built.outputs[1], TxOutputTemplate::new(seller.clone(), 60_000));
    assert_eq!(built.outputs[2].address, payer_address);

    // The seller's rune value passes straight through to the receive output
    let fee = 80_000 + 10_000 - built.outputs.iter().map(|o| o.value).sum::<u64>();
    assert!(fee > 0 && fee < 2_000, "fee {}", fee);
}
