//! #PayeeChannel a component driving the payee side of a channel.

use std::collections::HashSet;
use std::ops::Deref;
use std::sync::{Mutex, MutexGuard};

use bitcoin::{OutPoint, PrivateKey, PublicKey, Script, ScriptBuf, Transaction, Txid};
use log::{debug, info, warn};
use mpc::scripts::{get_commit_delay_time, script_to_address, CommitScript, DepositScript};
use mpc::{Secret, SecretHash};
use secp256k1_zkp::{All, Secp256k1};

use crate::channel::utils::{all_confirmed, is_commit_spent};
use crate::channel::{ChannelState, ChannelStatus, Commit, CommitRequest, Deposit};
use crate::error::Error;
use crate::{
    Blockchain, CommitSigner, TxInspector, COMMIT_BAD_SIGNATURE_COUNT,
    DEPOSIT_BAD_SIGNATURE_COUNT,
};

/// Drives the payee side of a single channel. Every operation holds the
/// channel lock for its whole duration.
pub struct PayeeChannel<B: Deref, I: Deref, S: Deref>
where
    B::Target: Blockchain,
    I::Target: TxInspector,
    S::Target: CommitSigner,
{
    state: Mutex<ChannelState>,
    blockchain: B,
    inspector: I,
    signer: S,
    secp: Secp256k1<All>,
}

impl<B: Deref, I: Deref, S: Deref> PayeeChannel<B, I, S>
where
    B::Target: Blockchain,
    I::Target: TxInspector,
    S::Target: CommitSigner,
{
    /// Create a new channel in the empty state.
    pub fn new(blockchain: B, inspector: I, signer: S) -> Self {
        Self::from_state(ChannelState::new(), blockchain, inspector, signer)
    }

    /// Rebuild a channel from a previously saved state.
    pub fn from_state(state: ChannelState, blockchain: B, inspector: I, signer: S) -> Self {
        PayeeChannel {
            state: Mutex::new(state),
            blockchain,
            inspector,
            signer,
            secp: Secp256k1::new(),
        }
    }

    /// Returns a copy of the current channel state.
    pub fn get_state(&self) -> Result<ChannelState, Error> {
        Ok(self.lock()?.clone())
    }

    /// Returns the status of the channel.
    pub fn status(&self) -> Result<ChannelStatus, Error> {
        Ok(self.lock()?.status())
    }

    /// Resets the channel with the given payee key and a fresh spend secret.
    /// Returns the payee public key and the spend secret hash to include in
    /// the deposit script.
    pub fn setup(&self, payee_key: PrivateKey) -> Result<(PublicKey, SecretHash), Error> {
        let mut state = self.lock()?;
        if !state.is_unopened() {
            return Err(Error::InvalidState(
                "Cannot setup a channel that was already opened.".to_string(),
            ));
        }

        let mut new_state = ChannelState::new();
        new_state.payee_key = Some(payee_key);
        let payee_pubkey = payee_key.public_key(&self.secp);
        let spend_secret_hash = new_state.spend_secret.hash();
        *state = new_state;

        info!(
            "Channel setup for payee {} with spend secret hash {}",
            payee_pubkey, spend_secret_hash
        );
        Ok((payee_pubkey, spend_secret_hash))
    }

    /// Validates and records the deposit transaction of the channel.
    pub fn set_deposit(&self, tx: Transaction, script: ScriptBuf) -> Result<(), Error> {
        let mut state = self.lock()?;
        if !state.is_unopened() {
            return Err(Error::InvalidState(
                "A deposit can only be set on an unopened channel.".to_string(),
            ));
        }
        let payee_pubkey = state.get_payee_key()?.public_key(&self.secp);

        self.check_bad_signature_count(&tx, DEPOSIT_BAD_SIGNATURE_COUNT)?;
        let deposit_script = DepositScript::from_script(&script)
            .map_err(|e| Error::ScriptMismatch(format!("Not a deposit script: {}", e)))?;
        check_spend_secret_hash(&state, &deposit_script.spend_secret_hash)?;
        check_payee_pubkey(&payee_pubkey, &deposit_script.payee_pubkey)?;
        if !pays_to_script(&tx, &script) {
            return Err(Error::ScriptMismatch(
                "Deposit transaction does not pay to the deposit script.".to_string(),
            ));
        }

        info!(
            "Accepted deposit {} from payer {}",
            tx.compute_txid(),
            deposit_script.payer_pubkey
        );
        state.payer_pubkey = Some(deposit_script.payer_pubkey);
        state.deposit = Some(Deposit { tx, script });
        Ok(())
    }

    /// Creates a revoke secret for a transfer of `quantity`. Returns the
    /// quantity and the revoke secret hash to include in the commit script.
    pub fn request_commit(&self, quantity: u64) -> Result<(u64, SecretHash), Error> {
        let mut state = self.lock()?;
        state.check_not_closing()?;
        let deposit_quantity = self.get_deposit_quantity(&state)?;
        let transferred = state.transferred_amount(&*self.inspector)?;
        if quantity < transferred {
            return Err(Error::QuantityBelowTransferred {
                given: quantity,
                transferred,
            });
        }
        if quantity > deposit_quantity {
            return Err(Error::QuantityAboveDeposit {
                given: quantity,
                deposit: deposit_quantity,
            });
        }

        let revoke_secret = Secret::new();
        let revoke_secret_hash = revoke_secret.hash();
        state.commits_requested.push(CommitRequest {
            quantity,
            revoke_secret,
        });
        debug!(
            "Requested commit of {} with revoke secret hash {}",
            quantity, revoke_secret_hash
        );
        Ok((quantity, revoke_secret_hash))
    }

    /// Validates a commit sent by the payer and, if its revoke secret hash
    /// matches a requested commit, records it and returns the new transferred
    /// amount. Returns `None` without modifying the channel otherwise. A
    /// matching commit must transfer exactly the requested quantity, and no
    /// less than the amount already transferred.
    pub fn set_commit(&self, tx: Transaction, script: ScriptBuf) -> Result<Option<u64>, Error> {
        let mut state = self.lock()?;
        state.check_not_closing()?;
        let deposit_txid = state.get_deposit()?.tx.compute_txid();
        let payee_pubkey = state.get_payee_key()?.public_key(&self.secp);

        self.check_bad_signature_count(&tx, COMMIT_BAD_SIGNATURE_COUNT)?;
        let commit_script = CommitScript::from_script(&script)
            .map_err(|e| Error::ScriptMismatch(format!("Not a commit script: {}", e)))?;
        check_spend_secret_hash(&state, &commit_script.spend_secret_hash)?;
        check_payee_pubkey(&payee_pubkey, &commit_script.payee_pubkey)?;
        if state.payer_pubkey != Some(commit_script.payer_pubkey) {
            return Err(Error::ScriptMismatch(
                "Commit script payer key differs from the deposit one.".to_string(),
            ));
        }
        if !tx
            .input
            .iter()
            .any(|input| input.previous_output.txid == deposit_txid)
        {
            return Err(Error::ScriptMismatch(
                "Commit transaction does not spend the deposit.".to_string(),
            ));
        }
        if !pays_to_script(&tx, &script) {
            return Err(Error::ScriptMismatch(
                "Commit transaction does not pay to the commit script.".to_string(),
            ));
        }

        let position = match state
            .commits_requested
            .iter()
            .position(|r| r.revoke_secret.hash() == commit_script.revoke_secret_hash)
        {
            Some(position) => position,
            None => {
                info!(
                    "Ignoring commit {} with unknown revoke secret hash {}",
                    tx.compute_txid(),
                    commit_script.revoke_secret_hash
                );
                return Ok(None);
            }
        };

        let quantity = self.inspector.get_quantity(&tx)?;
        let requested = state.commits_requested[position].quantity;
        if quantity != requested {
            warn!(
                "Rejecting commit {} transferring {} while {} was requested",
                tx.compute_txid(),
                quantity,
                requested
            );
            return Err(Error::QuantityMismatch {
                given: quantity,
                expected: requested,
            });
        }
        let transferred = state.transferred_amount(&*self.inspector)?;
        if quantity < transferred {
            return Err(Error::QuantityBelowTransferred {
                given: quantity,
                transferred,
            });
        }

        state.order_active(&*self.inspector)?;
        let request = state.commits_requested.remove(position);
        info!("Accepted commit {} of {}", tx.compute_txid(), quantity);
        state.commits_active.push(Commit {
            tx,
            script,
            revoke_secret: request.revoke_secret,
        });
        Ok(Some(quantity))
    }

    /// Discloses the revoke secrets of every active commit transferring more
    /// than `quantity`, moving them to the revoked commits.
    pub fn revoke_until(&self, quantity: u64) -> Result<Vec<Secret>, Error> {
        let mut state = self.lock()?;
        state.get_deposit()?;
        state.check_not_closing()?;
        let quantities = state.order_active(&*self.inspector)?;

        let secrets = state
            .commits_active
            .iter()
            .zip(quantities.iter())
            .rev()
            .take_while(|(_, commit_quantity)| quantity < **commit_quantity)
            .map(|(commit, _)| commit.revoke_secret.clone())
            .collect::<Vec<_>>();

        state.revoke_all(&secrets);
        info!(
            "Revoked {} commit(s) above {}, {} remaining active",
            secrets.len(),
            quantity,
            state.commits_active.len()
        );
        Ok(secrets)
    }

    /// Moves the active commits whose revoke secret is listed to the revoked
    /// commits.
    pub fn revoke_all(&self, secrets: &[Secret]) -> Result<(), Error> {
        let mut state = self.lock()?;
        state.get_deposit()?;
        state.check_not_closing()?;
        state.revoke_all(secrets);
        Ok(())
    }

    /// Countersigns the highest active commit and returns its id. The caller
    /// is responsible for broadcasting the finalized transaction.
    pub fn close_channel(&self) -> Result<Txid, Error> {
        let mut state = self.lock()?;
        let deposit_script = state.get_deposit()?.script.clone();
        let payee_key = *state.get_payee_key()?;
        state.check_not_closing()?;
        state.order_active(&*self.inspector)?;

        let commit_tx = match state.commits_active.last() {
            Some(commit) => commit.tx.clone(),
            None => {
                return Err(Error::InvalidState(
                    "No active commit to close the channel with.".to_string(),
                ))
            }
        };
        let finalized = self
            .signer
            .finalize_commit(&payee_key, &commit_tx, &deposit_script)?;
        let txid = finalized.compute_txid();

        if let Some(commit) = state.commits_active.last_mut() {
            commit.tx = finalized;
        }
        state.closing_txid = Some(txid);
        info!("Closing channel with commit {}", txid);
        Ok(txid)
    }

    /// Recovers every timed out commit output and returns the recovery
    /// transactions to broadcast.
    pub fn update(&self) -> Result<Vec<Transaction>, Error> {
        let mut state = self.lock()?;
        let scripts = self.get_payout_recoverable_internal(&state)?;
        if scripts.is_empty() {
            return Ok(Vec::new());
        }
        self.payout_recover_internal(&mut state, &scripts)
    }

    /// Returns the scripts of the commits, active or revoked, holding outputs
    /// whose relative timeout has elapsed.
    pub fn get_payout_recoverable(&self) -> Result<Vec<ScriptBuf>, Error> {
        let state = self.lock()?;
        self.get_payout_recoverable_internal(&state)
    }

    /// Creates and records transactions recovering the outputs of the given
    /// commit scripts. This discloses the spend secret.
    pub fn payout_recover(&self, scripts: &[ScriptBuf]) -> Result<Vec<Transaction>, Error> {
        let mut state = self.lock()?;
        self.payout_recover_internal(&mut state, scripts)
    }

    /// Returns whether every recorded payout transaction has at least
    /// `min_confirmations`.
    pub fn payout_confirmed(&self, min_confirmations: u32) -> Result<bool, Error> {
        let state = self.lock()?;
        all_confirmed(
            &*self.blockchain,
            &state.payout_transactions,
            min_confirmations,
        )
    }

    /// Returns the quantity of the highest active commit, or zero.
    pub fn transferred_amount(&self) -> Result<u64, Error> {
        let state = self.lock()?;
        state.transferred_amount(&*self.inspector)
    }

    /// Returns the quantity of the deposit.
    pub fn deposit_quantity(&self) -> Result<u64, Error> {
        let state = self.lock()?;
        self.get_deposit_quantity(&state)
    }

    /// Returns the active commits by ascending quantity.
    pub fn commits_active(&self) -> Result<Vec<Commit>, Error> {
        Ok(self.lock()?.commits_active.clone())
    }

    /// Returns the revoked commits.
    pub fn commits_revoked(&self) -> Result<Vec<Commit>, Error> {
        Ok(self.lock()?.commits_revoked.clone())
    }

    /// Returns the recorded payout transactions.
    pub fn payout_transactions(&self) -> Result<Vec<Transaction>, Error> {
        Ok(self.lock()?.payout_transactions.clone())
    }

    fn lock(&self) -> Result<MutexGuard<ChannelState>, Error> {
        self.state
            .lock()
            .map_err(|_| Error::InvalidState("Channel lock was poisoned.".to_string()))
    }

    fn get_deposit_quantity(&self, state: &ChannelState) -> Result<u64, Error> {
        self.inspector.get_quantity(&state.get_deposit()?.tx)
    }

    fn check_bad_signature_count(&self, tx: &Transaction, expected: usize) -> Result<(), Error> {
        let count = self.inspector.get_bad_signature_count(tx)?;
        if count != expected {
            return Err(Error::InvalidTransaction(format!(
                "Expected {} missing signature(s) in {}, got {}",
                expected,
                tx.compute_txid(),
                count
            )));
        }
        Ok(())
    }

    fn get_payout_recoverable_internal(&self, state: &ChannelState) -> Result<Vec<ScriptBuf>, Error> {
        let network = self.blockchain.get_network()?;
        let mut scripts: Vec<ScriptBuf> = Vec::new();
        let recovered: HashSet<OutPoint> = state
            .payout_transactions
            .iter()
            .flat_map(|tx| tx.input.iter().map(|input| input.previous_output))
            .collect();

        for commit in state
            .commits_active
            .iter()
            .chain(state.commits_revoked.iter())
        {
            if scripts.contains(&commit.script) || is_commit_spent(&*self.blockchain, commit)? {
                continue;
            }
            let address = script_to_address(&commit.script, network)?;
            if !self.blockchain.can_spend_from(&address)? {
                continue;
            }
            let delay = get_commit_delay_time(&commit.script)?;
            for utxo in self.blockchain.get_utxos_for_address(&address)? {
                if recovered.contains(&utxo.outpoint) {
                    continue;
                }
                let confirmations = self
                    .blockchain
                    .get_transaction_confirmations(&utxo.outpoint.txid)?;
                if confirmations >= delay {
                    debug!(
                        "Output {} of {} timed out after {} confirmations",
                        utxo.outpoint, address, confirmations
                    );
                    scripts.push(commit.script.clone());
                    break;
                }
            }
        }

        Ok(scripts)
    }

    fn payout_recover_internal(
        &self,
        state: &mut ChannelState,
        scripts: &[ScriptBuf],
    ) -> Result<Vec<Transaction>, Error> {
        let payee_key = *state.get_payee_key()?;
        let txs = scripts
            .iter()
            .map(|script| {
                self.signer
                    .recover_payout(&payee_key, script, &state.spend_secret)
            })
            .collect::<Result<Vec<_>, Error>>()?;

        for tx in &txs {
            info!("Recovered payout {}", tx.compute_txid());
        }
        state.payout_transactions.extend(txs.iter().cloned());
        Ok(txs)
    }
}

fn check_spend_secret_hash(state: &ChannelState, given: &SecretHash) -> Result<(), Error> {
    let expected = state.spend_secret.hash();
    if *given != expected {
        return Err(Error::IncorrectSpendSecretHash {
            given: *given,
            expected,
        });
    }
    Ok(())
}

fn check_payee_pubkey(expected: &PublicKey, given: &PublicKey) -> Result<(), Error> {
    if given != expected {
        return Err(Error::IncorrectPayeePubkey {
            given: *given,
            expected: *expected,
        });
    }
    Ok(())
}

fn pays_to_script(tx: &Transaction, script: &Script) -> bool {
    let script_pubkey = ScriptBuf::new_p2sh(&script.script_hash());
    tx.output.iter().any(|o| o.script_pubkey == script_pubkey)
}
