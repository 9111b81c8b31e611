//! # A [`CommitSigner`] producing the payee signatures with the channel
//! script templates.

use std::ops::Deref;

use bitcoin::{Amount, PrivateKey, Script, Transaction};
use mpc::scripts::script_to_address;
use mpc::sign::{create_payout_recover_transaction, finalize_commit_transaction};
use mpc::Secret;
use secp256k1_zkp::{All, Secp256k1};

use crate::error::Error;
use crate::{Blockchain, CommitSigner};

/// Signs channel transactions locally, looking up the outputs to recover on
/// the given blockchain and paying a fixed fee for every recovery.
pub struct ScriptSigner<B: Deref>
where
    B::Target: Blockchain,
{
    blockchain: B,
    fee: Amount,
    secp: Secp256k1<All>,
}

impl<B: Deref> ScriptSigner<B>
where
    B::Target: Blockchain,
{
    /// Creates a signer paying `fee` for each payout recovery transaction.
    pub fn new(blockchain: B, fee: Amount) -> Self {
        ScriptSigner {
            blockchain,
            fee,
            secp: Secp256k1::new(),
        }
    }
}

impl<B: Deref> CommitSigner for ScriptSigner<B>
where
    B::Target: Blockchain,
{
    fn finalize_commit(
        &self,
        payee_key: &PrivateKey,
        commit_tx: &Transaction,
        deposit_script: &Script,
    ) -> Result<Transaction, Error> {
        finalize_commit_transaction(&self.secp, commit_tx, deposit_script, payee_key).map_err(|e| {
            Error::SignerError(format!("Could not finalize commit transaction: {}", e))
        })
    }

    fn recover_payout(
        &self,
        payee_key: &PrivateKey,
        commit_script: &Script,
        spend_secret: &Secret,
    ) -> Result<Transaction, Error> {
        let network = self.blockchain.get_network()?;
        let address = script_to_address(commit_script, network)?;
        let utxos = self
            .blockchain
            .get_utxos_for_address(&address)?
            .into_iter()
            .map(|utxo| (utxo.outpoint, utxo.tx_out))
            .collect::<Vec<_>>();
        if utxos.is_empty() {
            return Err(Error::SignerError(format!(
                "No output to recover at {}",
                address
            )));
        }

        create_payout_recover_transaction(
            &self.secp,
            commit_script,
            &utxos,
            payee_key,
            spend_secret,
            self.fee,
        )
        .map_err(|e| Error::SignerError(format!("Could not create payout transaction: {}", e)))
    }
}
