//! Address and script classification
//!
//! Both classifiers are pure and total: they never fail, and `None` means
//! the address or script is outside the four supported families. Callers
//! that need to act on the result must treat `None` as a hard error.

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Network, Script};
use std::str::FromStr;

use crate::error::{SwapError, SwapResult};
use crate::types::AddressType;

const TAPROOT_PREFIXES: [&str; 3] = ["bc1p", "tb1p", "bcrt1p"];
const NATIVE_SEGWIT_PREFIXES: [&str; 3] = ["bc1q", "tb1q", "bcrt1q"];

/// Classify an address by its human-readable prefix
pub fn classify(address: &str) -> Option<AddressType> {
    if TAPROOT_PREFIXES.iter().any(|p| address.starts_with(p)) {
        return Some(AddressType::Taproot);
    }
    if NATIVE_SEGWIT_PREFIXES.iter().any(|p| address.starts_with(p)) {
        return Some(AddressType::NativeSegwit);
    }
    if address.starts_with('3') || address.starts_with('2') {
        return Some(AddressType::NestedSegwit);
    }
    if address.starts_with('1') || address.starts_with('m') || address.starts_with('n') {
        return Some(AddressType::Legacy);
    }
    None
}

/// Classify an output script by its byte pattern
pub fn classify_script(script: &[u8]) -> Option<AddressType> {
    // OP_1 <32 bytes>
    if script.len() == 34 && script[0] == 0x51 {
        return Some(AddressType::Taproot);
    }
    // OP_0 <20 bytes>
    if script.len() == 22 && script[0] == 0x00 {
        return Some(AddressType::NativeSegwit);
    }

    let script = Script::from_bytes(script);
    if script.is_p2sh() {
        Some(AddressType::NestedSegwit)
    } else if script.is_v0_p2wpkh() {
        Some(AddressType::NativeSegwit)
    } else if script.is_p2pkh() {
        Some(AddressType::Legacy)
    } else {
        None
    }
}

/// Classify an address, failing when it is outside the supported families
pub fn require_type(address: &str) -> SwapResult<AddressType> {
    classify(address).ok_or_else(|| SwapError::UnsupportedAddressType(address.to_string()))
}

/// Classify a script, failing when it is outside the supported families
pub fn require_script_type(script: &Script) -> SwapResult<AddressType> {
    classify_script(script.as_bytes())
        .ok_or_else(|| SwapError::UnsupportedAddressType(format!("script {}", hex::encode(script.as_bytes()))))
}

/// Parse an address and check it belongs to `network`
pub fn parse_address(address: &str, network: Network) -> SwapResult<Address> {
    let unchecked = Address::<NetworkUnchecked>::from_str(address)
        .map_err(|e| SwapError::UnsupportedAddressType(format!("{}: {}", address, e)))?;
    unchecked
        .require_network(network)
        .map_err(|e| SwapError::UnsupportedAddressType(format!("{}: {}", address, e)))
}

/// Render an output script as an address on `network`
pub fn address_from_script(script: &Script, network: Network) -> SwapResult<String> {
    Address::from_script(script, network)
        .map(|address| address.to_string())
        .map_err(|e| {
            SwapError::UnsupportedAddressType(format!("script {}: {}", hex::encode(script.as_bytes()), e))
        })
}
