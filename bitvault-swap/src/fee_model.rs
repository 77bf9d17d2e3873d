//! Fee model: per-script-type vbyte costs and virtual size estimation
//!
//! The builder must know a transaction's weight before it is signed, so
//! sizes are modeled from the input and output script types rather than
//! measured. The estimate is deterministic: the same multiset of types
//! always produces the same vbyte count.
//!
//! # Weight formula
//!
//! Non-witness bytes count four times and witness bytes once:
//!
//! ```text
//! base      = Σ input + header(last input) + Σ output
//! witness   = Σ witness (+ 2 marker/flag bytes when non-zero)
//! weight    = base * 3 + (base + witness)
//! vsize     = ceil(weight / 4)
//! ```

use bitcoin::psbt::PartiallySignedTransaction as Psbt;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::address::require_script_type;
use crate::error::{SwapError, SwapResult};
use crate::types::AddressType;

/// Witness marker and flag bytes added to any transaction carrying a witness
pub const WITNESS_HEADER_SIZE: Decimal = dec!(2);

/// Modeled vbyte costs of one script type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeTable {
    pub input: Decimal,
    pub output: Decimal,
    pub header: Decimal,
    pub witness: Decimal,
}

/// Byte-cost table for an address type
pub fn size_table(address_type: AddressType) -> SizeTable {
    match address_type {
        AddressType::Taproot => SizeTable {
            input: dec!(42),
            output: dec!(43),
            header: dec!(10.5),
            witness: dec!(66),
        },
        AddressType::NativeSegwit => SizeTable {
            input: dec!(42),
            output: dec!(43),
            header: dec!(10.5),
            witness: dec!(112.5),
        },
        AddressType::NestedSegwit => SizeTable {
            input: dec!(64),
            output: dec!(32),
            header: dec!(10),
            witness: dec!(105),
        },
        // Outpoint + scriptSig with a DER signature and compressed key, no witness
        AddressType::Legacy => SizeTable {
            input: dec!(148),
            output: dec!(34),
            header: dec!(10),
            witness: dec!(0),
        },
    }
}

/// Estimate the virtual size of a transaction from its script types
///
/// `witnesses` are fully serialized witness stacks measured after signing.
/// They are only used to refine taproot key-path spends; when supplied and
/// a taproot input is present, their total length replaces the table's
/// witness cost.
pub fn estimate_virtual_size(
    inputs: &[AddressType],
    outputs: &[AddressType],
    witnesses: &[Vec<u8>],
) -> u64 {
    let mut input_size = Decimal::ZERO;
    let mut header = Decimal::ZERO;
    let mut witness = Decimal::ZERO;

    for input in inputs {
        let table = size_table(*input);
        input_size += table.input;
        // The header is charged once, priced by the last input
        header = table.header;
        witness += table.witness;
    }

    let output_size: Decimal = outputs.iter().map(|o| size_table(*o).output).sum();

    if !witnesses.is_empty() && inputs.contains(&AddressType::Taproot) {
        let measured: usize = witnesses.iter().map(Vec::len).sum();
        witness = Decimal::from(measured);
    }

    let base = input_size + header + output_size;
    let witness_total = if witness > Decimal::ZERO {
        witness + WITNESS_HEADER_SIZE
    } else {
        Decimal::ZERO
    };

    let total = base + witness_total;
    let weight = base * dec!(3) + total;

    (weight / dec!(4)).ceil().to_u64().unwrap_or(u64::MAX)
}

/// Fee for `vsize` vbytes at `fee_rate` sat/vB, rounded up to the next satoshi
pub fn calculate_fee(vsize: u64, fee_rate: Decimal) -> u64 {
    (fee_rate * Decimal::from(vsize)).ceil().to_u64().unwrap_or(0)
}

/// Fee of a fixed-size transaction rounded half-up, used for up-front cost estimates
pub fn estimate_fee_rounded(vsize: u64, fee_rate: Decimal) -> u64 {
    (fee_rate * Decimal::from(vsize))
        .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
        .to_u64()
        .unwrap_or(0)
}

/// Script types of a decoded PSBT's inputs and outputs
///
/// Inputs are classified from their witness UTXO script, outputs from the
/// unsigned transaction's output scripts.
pub fn tx_address_types(psbt: &Psbt) -> SwapResult<(Vec<AddressType>, Vec<AddressType>)> {
    if psbt.inputs.is_empty() || psbt.unsigned_tx.output.is_empty() {
        return Err(SwapError::EmptyTransaction);
    }

    let inputs = psbt
        .inputs
        .iter()
        .map(|input| {
            let utxo = input
                .witness_utxo
                .as_ref()
                .ok_or_else(|| SwapError::InvalidUtxoData("PSBT input has no witness UTXO".to_string()))?;
            require_script_type(&utxo.script_pubkey)
        })
        .collect::<SwapResult<Vec<_>>>()?;

    let outputs = psbt
        .unsigned_tx
        .output
        .iter()
        .map(|output| require_script_type(&output.script_pubkey))
        .collect::<SwapResult<Vec<_>>>()?;

    Ok((inputs, outputs))
}

/// Estimate the virtual size of a decoded PSBT
pub fn estimate_psbt_vsize(psbt: &Psbt, witnesses: &[Vec<u8>]) -> SwapResult<u64> {
    let (inputs, outputs) = tx_address_types(psbt)?;
    Ok(estimate_virtual_size(&inputs, &outputs, witnesses))
}
