//! Post-broadcast UTXO reconciliation
//!
//! After a transaction is broadcast, the local spendable set must drop the
//! outpoints it consumed and pick up the outputs it paid back to the
//! watched address. Reconciliation is idempotent: applying the same
//! transaction twice yields the same set.

use bitcoin::Txid;
use serde_json::json;

use crate::error::SwapResult;
use crate::logging::{log_transaction, sanitize_for_logging, LogLevel};
use crate::provider::{ChainDataProvider, TxInfo};
use crate::types::{Utxo, UTXO_DUST};

/// Fold a broadcast transaction into `current`
///
/// Removes every outpoint the transaction spent, then appends each output
/// paying `watched_address` more than [`UTXO_DUST`] sats. Outputs already
/// present are not appended twice.
pub async fn reconcile(
    current: Vec<Utxo>,
    txid: &Txid,
    watched_address: &str,
    chain: &dyn ChainDataProvider,
) -> SwapResult<Vec<Utxo>> {
    let info = chain.transaction_info(txid).await?;
    let updated = apply_transaction(current, &info, watched_address);

    log_transaction(
        LogLevel::Debug,
        "reconciled UTXO set",
        Some(json!({
            "txid": info.txid.to_string(),
            "address": sanitize_for_logging(watched_address),
            "utxos": updated.len(),
        })),
    );

    Ok(updated)
}

/// Pure core of [`reconcile`]
pub fn apply_transaction(current: Vec<Utxo>, info: &TxInfo, watched_address: &str) -> Vec<Utxo> {
    let mut utxos: Vec<Utxo> = current
        .into_iter()
        .filter(|utxo| !info.inputs.contains(&utxo.outpoint()))
        .collect();

    let confirmations = u32::from(info.confirmed);

    for (vout, output) in info.outputs.iter().enumerate() {
        if output.address.as_deref() != Some(watched_address) || output.value <= UTXO_DUST {
            continue;
        }

        let utxo = Utxo::new(
            info.txid,
            vout as u32,
            output.value,
            output.script_pubkey.clone(),
            watched_address,
        )
        .with_confirmations(confirmations);

        if !utxos.iter().any(|existing| existing.same_outpoint(&utxo)) {
            utxos.push(utxo);
        }
    }

    utxos
}
