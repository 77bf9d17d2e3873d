//! Greedy UTXO accumulation
//!
//! UTXOs are taken in the order the caller supplies them; any sorting
//! (largest-first and so on) is the caller's job.
//!
//! # Strict overshoot
//!
//! Accumulation stops only once the running sum is strictly greater than
//! the target. A set that sums to exactly the target does not satisfy it.
//! Callers rely on this headroom: the fee-convergence loop asks for
//! `spend + fee` and a strictly larger sum is what leaves room for change.
//!
//! # All or nothing
//!
//! When the target cannot be exceeded the result is empty, never partial.

use crate::types::Utxo;

/// Select UTXOs, in order, until their sum strictly exceeds `amount_needed`
///
/// UTXOs whose outpoint appears in `excluded` are skipped, as are
/// unconfirmed UTXOs when `confirmed_only` is set. Returns an empty vector
/// when the eligible UTXOs cannot exceed the target.
pub fn select_utxos(
    available: &[Utxo],
    amount_needed: u64,
    excluded: &[Utxo],
    confirmed_only: bool,
) -> Vec<Utxo> {
    let mut sum: u64 = 0;
    let mut selected = Vec::new();

    for utxo in available {
        if is_excluded(utxo, excluded) {
            continue;
        }
        if confirmed_only && !utxo.is_confirmed() {
            continue;
        }

        sum = sum.saturating_add(utxo.value);
        selected.push(utxo.clone());

        if sum > amount_needed {
            return selected;
        }
    }

    Vec::new()
}

/// Total value of `utxos` in satoshis
pub fn sum_value(utxos: &[Utxo]) -> u64 {
    utxos.iter().fold(0u64, |acc, utxo| acc.saturating_add(utxo.value))
}

/// Whether `utxo`'s outpoint appears in `excluded`
pub fn is_excluded(utxo: &Utxo, excluded: &[Utxo]) -> bool {
    excluded.iter().any(|e| e.same_outpoint(utxo))
}

/// Every UTXO worth exactly `value` sats, in order
pub fn utxos_worth(utxos: &[Utxo], value: u64) -> Vec<Utxo> {
    utxos.iter().filter(|utxo| utxo.value == value).cloned().collect()
}

/// UTXOs not yet in `selected`, in order
pub fn unselected<'a>(available: &'a [Utxo], selected: &'a [Utxo]) -> impl Iterator<Item = &'a Utxo> {
    available.iter().filter(move |utxo| !is_excluded(utxo, selected))
}
