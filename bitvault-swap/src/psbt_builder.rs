//! Fee-converging PSBT construction
//!
//! The builder must emit a transaction whose fee is correct before any
//! signature exists. It works as a fixed-point iteration over an
//! immutable [`CandidateBuild`]:
//!
//! 1. classify every input script and output address, model the vsize
//! 2. `required = spend_amount + ceil(vsize * fee_rate)`
//! 3. if the gathered amount covers `required`, append change for any
//!    surplus and emit the PSBT
//! 4. otherwise select more UTXOs for `required` among those not yet
//!    selected, fold them into a new candidate and go back to 1
//!
//! Every round strictly grows the selected set, so the loop ends after at
//! most `available.len()` rounds, either with a PSBT or with
//! [`SwapError::InsufficientFunds`].
//!
//! # Serialization
//!
//! The unsigned transaction is version 2 with lock time 0 and
//! `0xffffffff` sequences. [`BuiltPsbt::decode_templates`] reverses the
//! encoding, so hex and base64 both round-trip to the same templates.

use bitcoin::absolute::LockTime;
use bitcoin::psbt::PartiallySignedTransaction as Psbt;
use bitcoin::secp256k1::XOnlyPublicKey;
use bitcoin::{Network, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use rust_decimal::Decimal;
use serde_json::json;

use crate::address::{address_from_script, parse_address, require_script_type, require_type};
use crate::coin_select::{is_excluded, select_utxos, sum_value, unselected, utxos_worth};
use crate::config::PaddingConfig;
use crate::error::{SwapError, SwapResult};
use crate::fee_model::{calculate_fee, estimate_virtual_size};
use crate::logging::{log_core, LogLevel};
use crate::types::{
    AddressType, BuiltPsbt, TxInputTemplate, TxOutputTemplate, Utxo, DEFAULT_PADDING_COUNT,
    ESTIMATE_TX_SIZE, PADDING_UTXO_VALUE,
};

/// Version of every transaction the builder emits
pub const TX_VERSION: i32 = 2;

/// Decode a PSBT given as hex or base64
pub fn decode_psbt(raw: &str) -> SwapResult<Psbt> {
    let raw = raw.trim();
    let bytes = if !raw.is_empty() && raw.len() % 2 == 0 && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        hex::decode(raw)?
    } else {
        base64::decode(raw)?
    };
    Ok(Psbt::deserialize(&bytes)?)
}

/// Hex and base64 encodings of `psbt`
pub fn encode_psbt(psbt: &Psbt) -> (String, String) {
    let bytes = psbt.serialize();
    (hex::encode(&bytes), base64::encode(&bytes))
}

/// Parse a hex public key into the x-only key used as a taproot internal key
///
/// A 33-byte compressed key has its parity byte stripped; a 32-byte key is
/// taken as is.
pub fn x_only_from_hex(pubkey_hex: &str) -> SwapResult<XOnlyPublicKey> {
    let bytes = hex::decode(pubkey_hex)?;
    let x_only = match bytes.as_slice() {
        [0x02 | 0x03, rest @ ..] if rest.len() == 32 => rest,
        key if key.len() == 32 => key,
        _ => {
            return Err(SwapError::validation(format!(
                "Invalid public key length {} for a taproot internal key",
                bytes.len()
            )))
        }
    };
    XOnlyPublicKey::from_slice(x_only)
        .map_err(|e| SwapError::validation(format!("Invalid taproot internal key: {}", e)))
}

/// Internal key to attach to new inputs: only taproot spends carry one
pub fn spend_tap_key(address_type: AddressType, pubkey_hex: &str) -> SwapResult<Option<XOnlyPublicKey>> {
    match address_type {
        AddressType::Taproot => x_only_from_hex(pubkey_hex).map(Some),
        _ => Ok(None),
    }
}

/// Turn UTXOs into input templates for a spend address of `address_type`
pub fn input_templates(
    utxos: &[Utxo],
    address_type: AddressType,
    tap_internal_key: Option<XOnlyPublicKey>,
) -> SwapResult<Vec<TxInputTemplate>> {
    utxos
        .iter()
        .map(|utxo| TxInputTemplate::from_utxo(utxo, address_type, tap_internal_key))
        .collect()
}

/// Assemble an unsigned PSBT from templates
pub fn psbt_from_templates(
    inputs: &[TxInputTemplate],
    outputs: &[TxOutputTemplate],
    network: Network,
) -> SwapResult<Psbt> {
    let tx_outputs = outputs
        .iter()
        .map(|output| {
            Ok(TxOut {
                value: output.value,
                script_pubkey: parse_address(&output.address, network)?.script_pubkey(),
            })
        })
        .collect::<SwapResult<Vec<_>>>()?;

    let unsigned_tx = Transaction {
        version: TX_VERSION,
        lock_time: LockTime::ZERO,
        input: inputs
            .iter()
            .map(|input| TxIn {
                previous_output: input.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output: tx_outputs,
    };

    let mut psbt = Psbt::from_unsigned_tx(unsigned_tx)?;
    for (psbt_input, template) in psbt.inputs.iter_mut().zip(inputs) {
        psbt_input.witness_utxo = Some(TxOut {
            value: template.witness_value,
            script_pubkey: template.witness_script.clone(),
        });
        psbt_input.tap_internal_key = template.tap_internal_key;
        psbt_input.sighash_type = template.sighash_type;
    }

    Ok(psbt)
}

impl BuiltPsbt {
    /// Serialize templates into both PSBT encodings
    pub fn from_templates(
        inputs: Vec<TxInputTemplate>,
        outputs: Vec<TxOutputTemplate>,
        network: Network,
    ) -> SwapResult<Self> {
        let psbt = psbt_from_templates(&inputs, &outputs, network)?;
        let (psbt_hex, psbt_base64) = encode_psbt(&psbt);
        Ok(Self {
            psbt_hex,
            psbt_base64,
            inputs,
            outputs,
        })
    }

    /// Decode a PSBT (hex or base64) back into input and output templates
    pub fn decode_templates(
        raw: &str,
        network: Network,
    ) -> SwapResult<(Vec<TxInputTemplate>, Vec<TxOutputTemplate>)> {
        let psbt = decode_psbt(raw)?;
        templates_from_psbt(&psbt, network)
    }

    pub fn psbt(&self) -> SwapResult<Psbt> {
        decode_psbt(&self.psbt_hex)
    }
}

/// Input and output templates of a decoded PSBT
pub fn templates_from_psbt(
    psbt: &Psbt,
    network: Network,
) -> SwapResult<(Vec<TxInputTemplate>, Vec<TxOutputTemplate>)> {
    let inputs = psbt
        .unsigned_tx
        .input
        .iter()
        .zip(&psbt.inputs)
        .map(|(tx_in, psbt_input)| {
            let utxo = psbt_input.witness_utxo.as_ref().ok_or_else(|| {
                SwapError::InvalidUtxoData(format!(
                    "PSBT input {} has no witness UTXO",
                    tx_in.previous_output
                ))
            })?;
            Ok(TxInputTemplate {
                outpoint: tx_in.previous_output,
                witness_value: utxo.value,
                witness_script: utxo.script_pubkey.clone(),
                tap_internal_key: psbt_input.tap_internal_key,
                sighash_type: psbt_input.sighash_type,
            })
        })
        .collect::<SwapResult<Vec<_>>>()?;

    let outputs = psbt
        .unsigned_tx
        .output
        .iter()
        .map(|output| {
            Ok(TxOutputTemplate {
                address: address_from_script(&output.script_pubkey, network)?,
                value: output.value,
            })
        })
        .collect::<SwapResult<Vec<_>>>()?;

    Ok((inputs, outputs))
}

/// Working state of one fee-convergence round
///
/// Never mutated: each round that needs more funds produces a new
/// candidate owning the enlarged input and UTXO lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateBuild {
    pub inputs: Vec<TxInputTemplate>,
    pub outputs: Vec<TxOutputTemplate>,
    pub selected: Vec<Utxo>,
    pub amount_gathered: u64,
    /// Provisional change output, counted for size only
    pub change_output: Option<TxOutputTemplate>,
}

impl CandidateBuild {
    pub fn new(
        inputs: Vec<TxInputTemplate>,
        outputs: Vec<TxOutputTemplate>,
        selected: Vec<Utxo>,
        change_output: Option<TxOutputTemplate>,
    ) -> Self {
        let amount_gathered = sum_value(&selected);
        Self {
            inputs,
            outputs,
            selected,
            amount_gathered,
            change_output,
        }
    }

    /// Script types of the inputs and of the outputs (provisional change included)
    pub fn address_types(&self) -> SwapResult<(Vec<AddressType>, Vec<AddressType>)> {
        let inputs = self
            .inputs
            .iter()
            .map(|input| require_script_type(&input.witness_script))
            .collect::<SwapResult<Vec<_>>>()?;

        let outputs = self
            .outputs
            .iter()
            .chain(self.change_output.iter())
            .map(|output| require_type(&output.address))
            .collect::<SwapResult<Vec<_>>>()?;

        Ok((inputs, outputs))
    }

    /// Modeled vsize of the candidate
    pub fn estimate_vsize(&self) -> SwapResult<u64> {
        let (inputs, outputs) = self.address_types()?;
        Ok(estimate_virtual_size(&inputs, &outputs, &[]))
    }

    /// New candidate with `additional` UTXOs appended as inputs
    fn with_additional(
        &self,
        additional: Vec<Utxo>,
        request: &BuildRequest<'_>,
        required: u64,
    ) -> SwapResult<Self> {
        let mut inputs = self.inputs.clone();
        inputs.extend(input_templates(
            &additional,
            request.address_type,
            request.tap_internal_key,
        )?);

        let mut selected = self.selected.clone();
        selected.extend(additional);
        let amount_gathered = sum_value(&selected);

        let change_output = match amount_gathered.checked_sub(required) {
            Some(change) if change > 0 => {
                Some(TxOutputTemplate::new(request.spend_address, change))
            }
            _ => self.change_output.clone(),
        };

        Ok(Self {
            inputs,
            outputs: self.outputs.clone(),
            selected,
            amount_gathered,
            change_output,
        })
    }
}

/// Everything the fee-convergence loop needs
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    pub inputs: Vec<TxInputTemplate>,
    pub outputs: Vec<TxOutputTemplate>,
    pub change_output: Option<TxOutputTemplate>,
    /// Pool additional inputs are drawn from
    pub available_utxos: &'a [Utxo],
    /// UTXOs already behind `inputs`; their sum is the gathered amount
    pub already_selected: Vec<Utxo>,
    pub spend_address: &'a str,
    /// Attached to inputs added from the pool when the spend address is taproot
    pub tap_internal_key: Option<XOnlyPublicKey>,
    /// Amount the spend address pays into the outputs, fee excluded
    pub spend_amount: u64,
    /// sat/vB
    pub fee_rate: Decimal,
    pub address_type: AddressType,
    pub network: Network,
}

/// Build a PSBT whose modeled fee is covered, selecting more UTXOs as needed
pub fn build_psbt_with_fee(request: BuildRequest<'_>) -> SwapResult<BuiltPsbt> {
    if request.inputs.is_empty() || request.outputs.is_empty() {
        return Err(SwapError::EmptyTransaction);
    }

    let mut candidate = CandidateBuild::new(
        request.inputs.clone(),
        request.outputs.clone(),
        request.already_selected.clone(),
        request.change_output.clone(),
    );
    let mut round = 0usize;

    loop {
        round += 1;
        let vsize = candidate.estimate_vsize()?;
        let fee = calculate_fee(vsize, request.fee_rate);
        let required = request.spend_amount.saturating_add(fee);

        log_core(
            LogLevel::Debug,
            "fee convergence round",
            Some(json!({
                "round": round,
                "vsize": vsize,
                "fee": fee,
                "required": required,
                "gathered": candidate.amount_gathered,
            })),
        );

        if let Some(surplus) = candidate.amount_gathered.checked_sub(required) {
            return finish(candidate, surplus, &request);
        }

        let pool: Vec<Utxo> = unselected(request.available_utxos, &candidate.selected)
            .cloned()
            .collect();
        let additional = select_utxos(&pool, required, &candidate.selected, false);
        // `available` is the unselected pool the selector drew from
        if additional.is_empty() {
            return Err(SwapError::insufficient_funds(
                format!(
                    "unselected UTXOs cannot cover amount plus fee ({} sats already gathered)",
                    candidate.amount_gathered
                ),
                required,
                sum_value(&pool),
            ));
        }

        candidate = candidate.with_additional(additional, &request, required)?;
    }
}

fn finish(candidate: CandidateBuild, surplus: u64, request: &BuildRequest<'_>) -> SwapResult<BuiltPsbt> {
    let mut outputs = candidate.outputs;
    if surplus > 0 {
        outputs.push(TxOutputTemplate::new(request.spend_address, surplus));
    }
    BuiltPsbt::from_templates(candidate.inputs, outputs, request.network)
}

/// Parameters of a padding-UTXO batch
#[derive(Debug, Clone)]
pub struct DummyUtxoOptions<'a> {
    pub address: &'a str,
    pub pubkey: &'a str,
    pub address_type: AddressType,
    pub utxos: &'a [Utxo],
    pub fee_rate: Decimal,
    /// Number of padding outputs wanted on the address
    pub n_utxos: usize,
    pub padding_value: u64,
    /// vsize used to fund the batch before convergence
    pub estimate_tx_size: u64,
    pub network: Network,
}

impl<'a> DummyUtxoOptions<'a> {
    pub fn new(
        address: &'a str,
        pubkey: &'a str,
        address_type: AddressType,
        utxos: &'a [Utxo],
        fee_rate: Decimal,
        network: Network,
    ) -> Self {
        Self {
            address,
            pubkey,
            address_type,
            utxos,
            fee_rate,
            n_utxos: DEFAULT_PADDING_COUNT,
            padding_value: PADDING_UTXO_VALUE,
            estimate_tx_size: ESTIMATE_TX_SIZE,
            network,
        }
    }

    pub fn with_count(mut self, n_utxos: usize) -> Self {
        self.n_utxos = n_utxos;
        self
    }

    pub fn with_padding(mut self, padding: &PaddingConfig) -> Self {
        self.padding_value = padding.utxo_value;
        self.estimate_tx_size = padding.estimate_tx_size;
        self
    }
}

/// Build a transaction creating `n_utxos` padding outputs on the address
///
/// Funded once for the conservative size estimate, then handed to
/// [`build_psbt_with_fee`] for the exact fee. Existing padding UTXOs are
/// never spent to create new ones.
pub fn build_dummy_utxo_batch(options: &DummyUtxoOptions<'_>) -> SwapResult<BuiltPsbt> {
    let padding_total = options.padding_value * options.n_utxos as u64;
    let amount_needed =
        padding_total + calculate_fee(options.estimate_tx_size, options.fee_rate);

    let existing_padding = utxos_worth(options.utxos, options.padding_value);
    let retrieved = select_utxos(options.utxos, amount_needed, &existing_padding, false);
    if retrieved.is_empty() {
        let spendable: u64 = options
            .utxos
            .iter()
            .filter(|utxo| !is_excluded(utxo, &existing_padding))
            .map(|utxo| utxo.value)
            .sum();
        return Err(SwapError::insufficient_funds(
            "No utxos available",
            amount_needed,
            spendable,
        ));
    }

    let tap_internal_key = spend_tap_key(options.address_type, options.pubkey)?;
    let inputs = input_templates(&retrieved, options.address_type, tap_internal_key)?;
    let outputs = vec![TxOutputTemplate::new(options.address, options.padding_value); options.n_utxos];

    let amount_retrieved = sum_value(&retrieved);
    let change_output = amount_retrieved
        .checked_sub(amount_needed)
        .filter(|change| *change > 0)
        .map(|change| TxOutputTemplate::new(options.address, change));

    // The fee loop may only add inputs from the non-padding pool
    let pool: Vec<Utxo> = options
        .utxos
        .iter()
        .filter(|utxo| !is_excluded(utxo, &existing_padding))
        .cloned()
        .collect();

    build_psbt_with_fee(BuildRequest {
        inputs,
        outputs,
        change_output,
        available_utxos: &pool,
        already_selected: retrieved,
        spend_address: options.address,
        tap_internal_key,
        spend_amount: padding_total,
        fee_rate: options.fee_rate,
        address_type: options.address_type,
        network: options.network,
    })
}

/// Build a padding batch only when the address holds fewer than `n_utxos` padding UTXOs
///
/// Returns `None` when enough padding already exists; otherwise a batch
/// creating exactly the missing count.
pub fn prepare_address_for_dummy_utxos(options: &DummyUtxoOptions<'_>) -> SwapResult<Option<BuiltPsbt>> {
    let existing = utxos_worth(options.utxos, options.padding_value).len();
    if existing >= options.n_utxos {
        return Ok(None);
    }

    let missing = options.clone().with_count(options.n_utxos - existing);
    build_dummy_utxo_batch(&missing).map(Some)
}
