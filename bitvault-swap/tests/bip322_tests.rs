//! Ownership signature tests
//!
//! Message hashes and virtual transaction ids are the published BIP322
//! vectors. Signatures are checked by verification rather than by bytes,
//! since nonce grinding differs between signers.


use bitcoin::consensus::encode::deserialize;
use bitcoin::key::TapTweak;
use bitcoin::secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use bitcoin::secp256k1::{schnorr, Message};
use bitcoin::sighash::{Prevouts, SighashCache, TapSighashType};
use bitcoin::sign_message::signed_msg_hash;
use bitcoin::hashes::Hash;
use bitcoin::{Address, Network, Witness};
use bitvault_swap::error::SwapError;
use bitvault_swap::marketplace::bip322::{
    message_hash, ownership_message, ownership_signature, sign_bip322_message, sign_legacy_message,
    to_sign_transaction, to_spend_transaction,
};
use bitvault_swap::provider::mock::MockSigner;
use std::str::FromStr;
use test_helpers::*;

const VECTOR_ADDRESS: &str = "bc1q9vza2e8x573nczrlzms0wvx3gsqjx7vavgkx0l";

#[test]
fn message_hash_vectors() {
    setup();

    assert_eq!(
        message_hash(b"").to_string(),
        "c90c269c4f8fcbe6880f72a721ddfbf1914268a794cbb21cfafee13770ae19f1"
    );
    assert_eq!(
        message_hash(b"Hello World").to_string(),
        "f0eb03b1a75ac6d9847f55c624a99169b5dccba2a31f5b23bea77ba270de0a7a"
    );
}

#[test]
fn virtual_transaction_vectors() {
    setup();
    let script = Address::from_str(VECTOR_ADDRESS)
        .unwrap()
        .require_network(Network::Bitcoin)
        .unwrap()
        .script_pubkey();

    let to_spend = to_spend_transaction(b"", script.clone());
    assert_eq!(
        to_spend.txid().to_string(),
        "c5680aa69bb8d860bf82d4e9cd3504b55dde018de765a91bb566283c545a99a7"
    );
    assert_eq!(
        to_sign_transaction(&to_spend).txid().to_string(),
        "1e9654e951a5ba44c8604c4de6c67fd78a27e81dcadcfe1edf638ba3aaebaed6"
    );

    let to_spend = to_spend_transaction(b"Hello World", script);
    assert_eq!(
        to_spend.txid().to_string(),
        "b79d196740ad5217771c1098fc4a4b51e0535c32236c71f1ea4d61a2d603352b"
    );
    assert_eq!(
        to_sign_transaction(&to_spend).txid().to_string(),
        "88737ae86f2077145f93cc4b153ae9a1cb8d56afa511988c149c5c8c9d93bddf"
    );
}

#[test]
fn segwit_signature_is_a_two_element_witness() {
    setup();
    let address = segwit_address(1).to_string();

    let encoded = sign_bip322_message("Hello World", &secret_key(1), &address, Network::Bitcoin).unwrap();
    let witness: Witness = deserialize(&base64::decode(encoded).unwrap()).unwrap();

    assert_eq!(witness.len(), 2);
    let signature = witness.nth(0).unwrap();
    assert_eq!(signature.last(), Some(&0x01));
    assert_eq!(witness.nth(1).unwrap(), public_key(1).to_bytes().as_slice());
}

#[test]
fn taproot_signature_verifies_against_the_output_key() {
    setup();
    let address = taproot_address(2);

    let encoded = sign_bip322_message("Hello World", &secret_key(2), &address.to_string(), Network::Bitcoin).unwrap();
    let witness: Witness = deserialize(&base64::decode(encoded).unwrap()).unwrap();
    assert_eq!(witness.len(), 1);
    let signature = schnorr::Signature::from_slice(witness.nth(0).unwrap()).unwrap();

    let to_spend = to_spend_transaction(b"Hello World", address.script_pubkey());
    let to_sign = to_sign_transaction(&to_spend);
    let prevouts = [to_spend.output[0].clone()];
    let sighash = SighashCache::new(&to_sign)
        .taproot_key_spend_signature_hash(0, &Prevouts::All(&prevouts), TapSighashType::Default)
        .unwrap();
    let msg = Message::from_slice(&sighash.to_byte_array()).unwrap();

    let (x_only, _) = public_key(2).inner.x_only_public_key();
    let (output_key, _) = x_only.tap_tweak(&SECP, None);
    assert!(SECP.verify_schnorr(&signature, &msg, &output_key.to_inner()).is_ok());
}

#[test]
fn nested_segwit_falls_back_to_legacy_format() {
    setup();
    let address = nested_segwit_address(3).to_string();

    let bip322 = sign_bip322_message("proof", &secret_key(3), &address, Network::Bitcoin).unwrap();
    let legacy = sign_legacy_message("proof", &secret_key(3)).unwrap();
    assert_eq!(bip322, legacy);
}

#[test]
fn legacy_signature_recovers_the_signing_key() {
    setup();

    let bytes = base64::decode(sign_legacy_message("Hello World", &secret_key(4)).unwrap()).unwrap();
    assert_eq!(bytes.len(), 65);
    assert!((35..=38).contains(&bytes[0]));

    let recovery_id = RecoveryId::from_i32(i32::from(bytes[0]) - 35).unwrap();
    let signature = RecoverableSignature::from_compact(&bytes[1..], recovery_id).unwrap();
    let msg = Message::from_slice(signed_msg_hash("Hello World").as_ref()).unwrap();

    let recovered = SECP.recover_ecdsa(&msg, &signature).unwrap();
    assert_eq!(recovered, public_key(4).inner);
}

#[test]
fn foreign_key_cannot_sign_for_an_address() {
    setup();
    let address = segwit_address(1).to_string();

    match sign_bip322_message("proof", &secret_key(2), &address, Network::Bitcoin) {
        Err(SwapError::Signing { context, .. }) => assert!(context.contains("Key does not control")),
        other => panic!("expected a signing error, got {:?}", other),
    }
}

#[test]
fn ownership_uses_the_key_of_the_receive_address_type() {
    setup();
    let payer = segwit_address(1).to_string();
    let receive = taproot_address(2).to_string();

    let signer = MockSigner::new().with_segwit_key(secret_key(1));
    match ownership_signature(&payer, &receive, &signer, Network::Bitcoin) {
        Err(SwapError::Signing { context, .. }) => assert_eq!(context, "Taproot key pair is missing"),
        other => panic!("expected a signing error, got {:?}", other),
    }

    let signer = signer.with_taproot_key(secret_key(2));
    let signature = ownership_signature(&payer, &receive, &signer, Network::Bitcoin).unwrap();
    let expected = sign_bip322_message(
        &ownership_message(&payer, &receive),
        &secret_key(2),
        &receive,
        Network::Bitcoin,
    )
    .unwrap();
    assert_eq!(signature, expected);
}

#[test]
fn ownership_message_format() {
    assert_eq!(
        ownership_message("bc1qpay", "bc1precv"),
        "Please confirm that\nPayment Address: bc1qpay\nOrdinals Address: bc1precv"
    );
}
