use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use bitcoin::{Network, OutPoint, Script, ScriptBuf, Transaction, Txid};
use mpc::scripts::script_to_address;
use mpc_payee::error::Error;
use mpc_payee::{Blockchain, Utxo};

/// In memory view of the chain: confirmations are set by hand and utxos are
/// registered from the transactions of the test.
pub struct MockBlockchain {
    network: Network,
    confirmations: Mutex<HashMap<Txid, u32>>,
    utxos: Mutex<Vec<Utxo>>,
    spent: Mutex<HashSet<OutPoint>>,
    fail: Mutex<bool>,
}

impl MockBlockchain {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            confirmations: Mutex::new(HashMap::new()),
            utxos: Mutex::new(Vec::new()),
            spent: Mutex::new(HashSet::new()),
            fail: Mutex::new(false),
        }
    }

    pub fn set_confirmations(&self, txid: Txid, confirmations: u32) {
        self.confirmations
            .lock()
            .unwrap()
            .insert(txid, confirmations);
    }

    /// Registers every output of `tx` paying to the P2SH of `script` as
    /// unspent.
    pub fn add_script_outputs(&self, tx: &Transaction, script: &Script) {
        let address = script_to_address(script, self.network).unwrap();
        let script_pubkey = ScriptBuf::new_p2sh(&script.script_hash());
        let txid = tx.compute_txid();
        let mut utxos = self.utxos.lock().unwrap();
        for (vout, tx_out) in tx.output.iter().enumerate() {
            if tx_out.script_pubkey == script_pubkey {
                utxos.push(Utxo {
                    outpoint: OutPoint {
                        txid,
                        vout: vout as u32,
                    },
                    tx_out: tx_out.clone(),
                    address: address.clone(),
                });
            }
        }
    }

    pub fn spend_output(&self, outpoint: OutPoint) {
        self.utxos
            .lock()
            .unwrap()
            .retain(|utxo| utxo.outpoint != outpoint);
        self.spent.lock().unwrap().insert(outpoint);
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    fn check_fail(&self) -> Result<(), Error> {
        if *self.fail.lock().unwrap() {
            return Err(Error::BlockchainError("Backend unavailable".to_string()));
        }
        Ok(())
    }
}

impl Blockchain for MockBlockchain {
    fn get_network(&self) -> Result<Network, Error> {
        self.check_fail()?;
        Ok(self.network)
    }

    fn get_transaction_confirmations(&self, tx_id: &Txid) -> Result<u32, Error> {
        self.check_fail()?;
        Ok(*self.confirmations.lock().unwrap().get(tx_id).unwrap_or(&0))
    }

    fn can_spend_from(&self, address: &bitcoin::Address) -> Result<bool, Error> {
        self.check_fail()?;
        Ok(self
            .utxos
            .lock()
            .unwrap()
            .iter()
            .any(|utxo| &utxo.address == address))
    }

    fn get_utxos_for_address(&self, address: &bitcoin::Address) -> Result<Vec<Utxo>, Error> {
        self.check_fail()?;
        Ok(self
            .utxos
            .lock()
            .unwrap()
            .iter()
            .filter(|utxo| &utxo.address == address)
            .cloned()
            .collect())
    }

    fn is_output_spent(&self, txid: &Txid, vout: u32) -> Result<bool, Error> {
        self.check_fail()?;
        Ok(self.spent.lock().unwrap().contains(&OutPoint {
            txid: *txid,
            vout,
        }))
    }
}
