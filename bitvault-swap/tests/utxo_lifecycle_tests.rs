
use bitcoin::{OutPoint, ScriptBuf};
use bitvault_swap::provider::mock::MockChainData;
use bitvault_swap::provider::{TxInfo, TxInfoOutput};
use bitvault_swap::utxo_lifecycle::{apply_transaction, reconcile};
use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;
use test_helpers::*;

fn padding_tx(watched: &str, script: &ScriptBuf, spent: OutPoint) -> TxInfo {
    TxInfo {
        txid: txid(42),
        inputs: vec![spent],
        outputs: vec![
            TxInfoOutput { address: Some(watched.to_string()), value: 600, script_pubkey: script.clone() },
            TxInfoOutput { address: Some(watched.to_string()), value: 600, script_pubkey: script.clone() },
            TxInfoOutput { address: Some(watched.to_string()), value: 546, script_pubkey: script.clone() },
            TxInfoOutput {
                address: Some(segwit_address(9).to_string()),
                value: 10_000,
                script_pubkey: segwit_address(9).script_pubkey(),
            },
            TxInfoOutput { address: None, value: 0, script_pubkey: ScriptBuf::from_bytes(vec![0x6a]) },
            TxInfoOutput { address: Some(watched.to_string()), value: 95_000, script_pubkey: script.clone() },
        ],
        confirmed: false,
    }
}

#[test]
fn spent_outputs_leave_and_new_outputs_join() {
    setup();
    let watched = segwit_address(1);
    let address = watched.to_string();
    let funding = utxo(&watched, 1, 0, 100_000);
    let untouched = utxo(&watched, 2, 0, 5_000);
    let info = padding_tx(&address, &watched.script_pubkey(), funding.outpoint());

    let updated = apply_transaction(vec![funding, untouched.clone()], &info, &address);

    assert_eq!(updated.len(), 4);
    assert_eq!(updated[0], untouched);
    let values: Vec<u64> = updated[1..].iter().map(|u| u.value).collect();
    assert_eq!(values, vec![600, 600, 95_000]);
    let vouts: Vec<u32> = updated[1..].iter().map(|u| u.vout).collect();
    assert_eq!(vouts, vec![0, 1, 5]);
    assert!(updated[1..].iter().all(|u| u.txid == txid(42) && u.confirmations == 0));
}

#[test]
fn dust_and_foreign_outputs_are_ignored() {
    setup();
    let watched = segwit_address(1);
    let address = watched.to_string();
    let info = padding_tx(&address, &watched.script_pubkey(), utxo(&watched, 1, 0, 1).outpoint());

    let updated = apply_transaction(Vec::new(), &info, &address);
    assert!(updated.iter().all(|u| u.value > 546 && u.address == address));
}

#[test]
fn confirmed_transactions_yield_confirmed_outputs() {
    setup();
    let watched = segwit_address(1);
    let address = watched.to_string();
    let mut info = padding_tx(&address, &watched.script_pubkey(), utxo(&watched, 1, 0, 1).outpoint());
    info.confirmed = true;

    let updated = apply_transaction(Vec::new(), &info, &address);
    assert!(updated.iter().all(|u| u.confirmations == 1));
}

#[test]
fn applying_twice_changes_nothing() {
    setup();
    let watched = segwit_address(1);
    let address = watched.to_string();
    let funding = utxo(&watched, 1, 0, 100_000);
    let info = padding_tx(&address, &watched.script_pubkey(), funding.outpoint());

    let once = apply_transaction(vec![funding], &info, &address);
    let twice = apply_transaction(once.clone(), &info, &address);
    assert_eq!(once, twice);
}

#[tokio::test]
async fn reconcile_reads_the_transaction_from_chain_data() {
    setup();
    let watched = segwit_address(1);
    let address = watched.to_string();
    let funding = utxo(&watched, 1, 0, 100_000);
    let info = padding_tx(&address, &watched.script_pubkey(), funding.outpoint());
    let chain = MockChainData::default().with_transaction(info.clone());

    let updated = reconcile(vec![funding], &info.txid, &address, &chain).await.unwrap();
    assert_eq!(updated.len(), 3);

    assert!(reconcile(Vec::new(), &txid(77), &address, &chain).await.is_err());
}

#[derive(Clone, Debug)]
struct OutputValues(Vec<u64>);

impl Arbitrary for OutputValues {
    fn arbitrary(g: &mut Gen) -> Self {
        let len = usize::arbitrary(g) % 8;
        OutputValues((0..len).map(|_| u64::arbitrary(g) % 20_000).collect())
    }
}

#[quickcheck]
fn reconciliation_is_idempotent(values: OutputValues, confirmed: bool) -> bool {
    let watched = segwit_address(1);
    let address = watched.to_string();
    let funding = utxo(&watched, 1, 0, 100_000);
    let info = TxInfo {
        txid: txid(43),
        inputs: vec![funding.outpoint()],
        outputs: values
            .0
            .iter()
            .map(|value| TxInfoOutput {
                address: Some(address.clone()),
                value: *value,
                script_pubkey: watched.script_pubkey(),
            })
            .collect(),
        confirmed,
    };

    let once = apply_transaction(vec![funding], &info, &address);
    let twice = apply_transaction(once.clone(), &info, &address);
    once == twice && once.iter().all(|u| u.value > 546)
}
