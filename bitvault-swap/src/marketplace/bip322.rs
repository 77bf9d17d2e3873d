//! Address-ownership signatures
//!
//! When a purchase is paid from one address and delivered to another, the
//! Unisat endpoint wants proof that the buyer controls the receive
//! address. Segwit and taproot addresses sign a BIP322 "simple" message;
//! nested segwit addresses fall back to the legacy signed-message format.

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::key::TapTweak;
use bitcoin::secp256k1::{All, KeyPair, Message, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::sign_message::signed_msg_hash;
use bitcoin::{
    ecdsa, taproot, Network, OutPoint, PublicKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut,
    Txid, Witness,
};
use once_cell::sync::Lazy;

use crate::address::{parse_address, require_type};
use crate::error::{SwapError, SwapResult};
use crate::provider::Signer;
use crate::types::AddressType;

static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

const MESSAGE_TAG: &[u8] = b"BIP0322-signed-message";

/// Message a buyer signs to bind a payment address to a receive address
pub fn ownership_message(address: &str, receive_address: &str) -> String {
    format!(
        "Please confirm that\nPayment Address: {}\nOrdinals Address: {}",
        address, receive_address
    )
}

/// Tagged hash of a message: SHA256(tag || tag || message)
pub fn message_hash(message: &[u8]) -> sha256::Hash {
    let tag = sha256::Hash::hash(MESSAGE_TAG);
    let mut engine = sha256::Hash::engine();
    engine.input(tag.as_ref());
    engine.input(tag.as_ref());
    engine.input(message);
    sha256::Hash::from_engine(engine)
}

/// Virtual transaction committing to the message and the signer's script
pub fn to_spend_transaction(message: &[u8], script_pubkey: ScriptBuf) -> Transaction {
    let mut script_sig = vec![0x00, 0x20];
    script_sig.extend_from_slice(message_hash(message).as_ref());

    Transaction {
        version: 0,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: Txid::all_zeros(),
                vout: 0xFFFF_FFFF,
            },
            script_sig: ScriptBuf::from_bytes(script_sig),
            sequence: Sequence::ZERO,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: 0,
            script_pubkey,
        }],
    }
}

/// Virtual transaction spending `to_spend` into an OP_RETURN
pub fn to_sign_transaction(to_spend: &Transaction) -> Transaction {
    Transaction {
        version: 0,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: to_spend.txid(),
                vout: 0,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ZERO,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: 0,
            script_pubkey: ScriptBuf::from_bytes(vec![0x6a]),
        }],
    }
}

/// Script `secret_key` controls for an address of `address_type`
fn owned_script(secret_key: &SecretKey, address_type: AddressType) -> SwapResult<ScriptBuf> {
    let public_key = PublicKey::new(secret_key.public_key(&SECP));
    match address_type {
        AddressType::NativeSegwit => {
            let hash = public_key
                .wpubkey_hash()
                .ok_or_else(|| SwapError::signing("Segwit keys must be compressed"))?;
            Ok(ScriptBuf::new_v0_p2wpkh(&hash))
        }
        AddressType::NestedSegwit => {
            let hash = public_key
                .wpubkey_hash()
                .ok_or_else(|| SwapError::signing("Segwit keys must be compressed"))?;
            Ok(ScriptBuf::new_p2sh(&ScriptBuf::new_v0_p2wpkh(&hash).script_hash()))
        }
        AddressType::Taproot => {
            let (x_only, _) = public_key.inner.x_only_public_key();
            Ok(ScriptBuf::new_v1_p2tr(&SECP, x_only, None))
        }
        AddressType::Legacy => Err(SwapError::UnsupportedAddressType(format!(
            "{} addresses cannot sign ownership messages",
            address_type
        ))),
    }
}

/// Check that `secret_key` controls `address`, returning the address script
fn controlled_script(
    secret_key: &SecretKey,
    address: &str,
    address_type: AddressType,
    network: Network,
) -> SwapResult<ScriptBuf> {
    let expected = parse_address(address, network)?.script_pubkey();
    if owned_script(secret_key, address_type)? != expected {
        return Err(SwapError::signing(format!(
            "Key does not control {} address",
            address_type
        )));
    }
    Ok(expected)
}

/// Sign `message` for `address`, returning the base64 signature
///
/// Native segwit and taproot produce a BIP322 simple signature (the
/// serialized witness of the virtual spend); nested segwit produces a
/// legacy recoverable signature.
pub fn sign_bip322_message(
    message: &str,
    secret_key: &SecretKey,
    address: &str,
    network: Network,
) -> SwapResult<String> {
    let address_type = require_type(address)?;
    let script_pubkey = controlled_script(secret_key, address, address_type, network)?;

    let witness = match address_type {
        AddressType::NestedSegwit => return sign_legacy_message(message, secret_key),
        AddressType::NativeSegwit => segwit_witness(message, secret_key, script_pubkey)?,
        AddressType::Taproot => taproot_witness(message, secret_key, script_pubkey)?,
        AddressType::Legacy => {
            return Err(SwapError::UnsupportedAddressType(address.to_string()))
        }
    };

    Ok(base64::encode(serialize(&witness)))
}

fn segwit_witness(message: &str, secret_key: &SecretKey, script_pubkey: ScriptBuf) -> SwapResult<Witness> {
    let to_spend = to_spend_transaction(message.as_bytes(), script_pubkey);
    let to_sign = to_sign_transaction(&to_spend);

    let public_key = PublicKey::new(secret_key.public_key(&SECP));
    let script_code = ScriptBuf::new_p2pkh(&public_key.pubkey_hash());

    let sighash = SighashCache::new(&to_sign)
        .segwit_signature_hash(0, &script_code, 0, EcdsaSighashType::All)
        .map_err(|e| SwapError::signing_with_source("BIP322 segwit sighash", e))?;
    let msg = Message::from_slice(&sighash.to_byte_array())?;
    let signature = ecdsa::Signature::sighash_all(SECP.sign_ecdsa(&msg, secret_key));

    Ok(Witness::from_slice(&[signature.to_vec(), public_key.to_bytes()]))
}

fn taproot_witness(message: &str, secret_key: &SecretKey, script_pubkey: ScriptBuf) -> SwapResult<Witness> {
    let to_spend = to_spend_transaction(message.as_bytes(), script_pubkey);
    let to_sign = to_sign_transaction(&to_spend);

    let prevouts = [to_spend.output[0].clone()];
    let sighash = SighashCache::new(&to_sign)
        .taproot_key_spend_signature_hash(0, &Prevouts::All(&prevouts), TapSighashType::Default)
        .map_err(|e| SwapError::signing_with_source("BIP322 taproot sighash", e))?;
    let msg = Message::from_slice(&sighash.to_byte_array())?;

    let tweaked = KeyPair::from_secret_key(&SECP, secret_key).tap_tweak(&SECP, None);
    let signature = taproot::Signature {
        sig: SECP.sign_schnorr_no_aux_rand(&msg, &tweaked.to_inner()),
        hash_ty: TapSighashType::Default,
    };

    Ok(Witness::from_slice(&[signature.to_vec()]))
}

/// Legacy signed-message signature with the P2SH-P2WPKH header
pub fn sign_legacy_message(message: &str, secret_key: &SecretKey) -> SwapResult<String> {
    let msg = Message::from_slice(signed_msg_hash(message).as_ref())?;
    let (recovery_id, compact) = SECP
        .sign_ecdsa_recoverable(&msg, secret_key)
        .serialize_compact();

    let mut signature = Vec::with_capacity(65);
    signature.push(27 + recovery_id.to_i32() as u8 + 8);
    signature.extend_from_slice(&compact);
    Ok(base64::encode(signature))
}

/// Ownership proof of `receive_address` for a purchase paid from `address`
///
/// The signing key is chosen by the receive address type: the signer's
/// segwit key for native and nested segwit, its taproot key for taproot.
pub fn ownership_signature(
    address: &str,
    receive_address: &str,
    signer: &dyn Signer,
    network: Network,
) -> SwapResult<String> {
    let message = ownership_message(address, receive_address);

    let key = match require_type(receive_address)? {
        AddressType::NativeSegwit | AddressType::NestedSegwit => signer
            .segwit_key()
            .ok_or_else(|| SwapError::signing("Segwit key pair is missing"))?,
        AddressType::Taproot => signer
            .taproot_key()
            .ok_or_else(|| SwapError::signing("Taproot key pair is missing"))?,
        other => {
            return Err(SwapError::UnsupportedAddressType(format!(
                "{} ({})",
                receive_address, other
            )))
        }
    };

    sign_bip322_message(&message, &key, receive_address, network)
}
