use std::collections::HashMap;
use std::sync::Mutex;

use bitcoin::{Transaction, Txid};
use mpc_payee::error::Error;
use mpc_payee::TxInspector;

/// Reports the value of the first output as the quantity of a transaction
/// and, unless overridden, one missing signature.
pub struct MockTxInspector {
    bad_signature_counts: Mutex<HashMap<Txid, usize>>,
    default_bad_signature_count: usize,
}

impl MockTxInspector {
    pub fn new() -> Self {
        Self {
            bad_signature_counts: Mutex::new(HashMap::new()),
            default_bad_signature_count: 1,
        }
    }

    pub fn set_bad_signature_count(&self, txid: Txid, count: usize) {
        self.bad_signature_counts
            .lock()
            .unwrap()
            .insert(txid, count);
    }
}

impl Default for MockTxInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl TxInspector for MockTxInspector {
    fn get_bad_signature_count(&self, tx: &Transaction) -> Result<usize, Error> {
        Ok(*self
            .bad_signature_counts
            .lock()
            .unwrap()
            .get(&tx.compute_txid())
            .unwrap_or(&self.default_bad_signature_count))
    }

    fn get_quantity(&self, tx: &Transaction) -> Result<u64, Error> {
        tx.output
            .first()
            .map(|output| output.value.to_sat())
            .ok_or_else(|| Error::InvalidTransaction("Transaction has no output".to_string()))
    }
}
