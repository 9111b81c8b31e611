use std::sync::{Arc, Mutex};

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::opcodes::OP_TRUE;
use bitcoin::script::Builder;
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, PrivateKey, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
};
use mpc::scripts::script_to_address;
use mpc::{Secret, SecretHash};
use mpc_payee::error::Error;
use mpc_payee::{Blockchain, CommitSigner};
use secp256k1_zkp::{All, Secp256k1};

use crate::mock_blockchain::MockBlockchain;

/// Signer producing recognizable transactions without signing anything, and
/// recording what it was asked to sign. Payouts spend the outputs the
/// blockchain reports for the commit script.
pub struct MockSigner {
    blockchain: Arc<MockBlockchain>,
    secp: Secp256k1<All>,
    fail: Mutex<bool>,
    recovered: Mutex<Vec<(ScriptBuf, SecretHash)>>,
}

impl MockSigner {
    pub fn new(blockchain: Arc<MockBlockchain>) -> Self {
        Self {
            blockchain,
            secp: Secp256k1::new(),
            fail: Mutex::new(false),
            recovered: Mutex::new(Vec::new()),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    /// Returns the scripts recovered so far, with the hash of the spend
    /// secret that was provided for each.
    pub fn get_recovered(&self) -> Vec<(ScriptBuf, SecretHash)> {
        self.recovered.lock().unwrap().clone()
    }

    fn check_fail(&self) -> Result<(), Error> {
        if *self.fail.lock().unwrap() {
            return Err(Error::SignerError("Signer unavailable".to_string()));
        }
        Ok(())
    }
}

impl CommitSigner for MockSigner {
    fn finalize_commit(
        &self,
        _payee_key: &PrivateKey,
        commit_tx: &Transaction,
        _deposit_script: &Script,
    ) -> Result<Transaction, Error> {
        self.check_fail()?;
        let mut finalized = commit_tx.clone();
        if let Some(input) = finalized.input.first_mut() {
            input.script_sig = Builder::new().push_opcode(OP_TRUE).into_script();
        }
        Ok(finalized)
    }

    fn recover_payout(
        &self,
        payee_key: &PrivateKey,
        commit_script: &Script,
        spend_secret: &Secret,
    ) -> Result<Transaction, Error> {
        self.check_fail()?;
        let address = script_to_address(commit_script, self.blockchain.get_network()?)?;
        let input = self
            .blockchain
            .get_utxos_for_address(&address)?
            .into_iter()
            .map(|utxo| TxIn {
                previous_output: utxo.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect();
        self.recovered
            .lock()
            .unwrap()
            .push((commit_script.to_owned(), spend_secret.hash()));
        let payee_pubkey = payee_key.public_key(&self.secp);
        Ok(Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input,
            output: vec![
                TxOut {
                    value: Amount::ZERO,
                    script_pubkey: ScriptBuf::new_p2pkh(&payee_pubkey.pubkey_hash()),
                },
                TxOut {
                    value: Amount::ZERO,
                    script_pubkey: ScriptBuf::new_op_return(
                        commit_script.script_hash().to_byte_array(),
                    ),
                },
            ],
        })
    }
}
