//! # Module containing the payee view of a channel and the bookkeeping of its
//! commits.

use bitcoin::{PrivateKey, PublicKey, ScriptBuf, Transaction, Txid};
use mpc::Secret;

use crate::error::Error;
use crate::TxInspector;

pub(crate) mod utils;

/// The funding transaction of a channel together with its locking script.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "use-serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct Deposit {
    /// The deposit transaction, signed by the payer.
    pub tx: Transaction,
    /// The deposit script the transaction pays to.
    pub script: ScriptBuf,
}

/// A revoke secret generated for a requested transfer, waiting for the payer
/// to send the matching commit.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "use-serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct CommitRequest {
    /// The quantity the payer asked to transfer.
    pub quantity: u64,
    /// The secret whose hash must appear in the commit script.
    pub revoke_secret: Secret,
}

/// A payer signed transaction transferring funds from the deposit to the
/// payee.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "use-serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct Commit {
    /// The commit transaction. Replaced by its finalized version when the
    /// channel is closed with it.
    pub tx: Transaction,
    /// The commit script the transaction pays to.
    pub script: ScriptBuf,
    /// The secret revoking this commit once disclosed to the payer.
    pub revoke_secret: Secret,
}

/// The possible states a channel can be in, from the payee point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelStatus {
    /// No payee key was provided yet.
    Empty,
    /// The channel is set up and waiting for a deposit.
    Unopened,
    /// A deposit was accepted, commits can be exchanged.
    Deposited,
    /// The highest commit was finalized to close the channel.
    Closing,
}

/// The authoritative payee view of one channel.
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "use-serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct ChannelState {
    /// The key of the payee, used to countersign commits and recover payouts.
    pub payee_key: Option<PrivateKey>,
    /// The public key of the payer, learned from the deposit script.
    pub payer_pubkey: Option<PublicKey>,
    /// The secret proving the right of the payee to claim the channel funds.
    pub spend_secret: Secret,
    /// The channel deposit.
    pub deposit: Option<Deposit>,
    /// Revoke secrets waiting for a matching commit.
    pub commits_requested: Vec<CommitRequest>,
    /// Commits that can still be used to close the channel, by ascending
    /// quantity.
    pub commits_active: Vec<Commit>,
    /// Commits whose revoke secret was disclosed.
    pub commits_revoked: Vec<Commit>,
    /// Transactions recovering timed out commit outputs.
    pub payout_transactions: Vec<Transaction>,
    /// Id of the finalized commit used to close the channel.
    pub closing_txid: Option<Txid>,
}

impl ChannelState {
    /// Creates the state of a channel without any key material, with a
    /// freshly generated spend secret.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        ChannelState {
            payee_key: None,
            payer_pubkey: None,
            spend_secret: Secret::new(),
            deposit: None,
            commits_requested: Vec::new(),
            commits_active: Vec::new(),
            commits_revoked: Vec::new(),
            payout_transactions: Vec::new(),
            closing_txid: None,
        }
    }

    /// Returns the status of the channel.
    pub fn status(&self) -> ChannelStatus {
        if self.payee_key.is_none() {
            ChannelStatus::Empty
        } else if self.deposit.is_none() {
            ChannelStatus::Unopened
        } else if self.closing_txid.is_some() {
            ChannelStatus::Closing
        } else {
            ChannelStatus::Deposited
        }
    }

    /// Returns whether no payer key material, deposit or commit was recorded.
    pub fn is_unopened(&self) -> bool {
        self.payer_pubkey.is_none()
            && self.deposit.is_none()
            && self.commits_requested.is_empty()
            && self.commits_active.is_empty()
            && self.commits_revoked.is_empty()
    }

    /// Returns the deposit, or an error if none was set.
    pub fn get_deposit(&self) -> Result<&Deposit, Error> {
        self.deposit
            .as_ref()
            .ok_or_else(|| Error::InvalidState("No deposit was set for the channel.".to_string()))
    }

    /// Returns an error if a closing transaction was already broadcast.
    pub fn check_not_closing(&self) -> Result<(), Error> {
        match self.closing_txid {
            Some(txid) => Err(Error::InvalidState(format!(
                "The channel is closing with commit {}.",
                txid
            ))),
            None => Ok(()),
        }
    }

    /// Returns the payee key, or an error if the channel was not set up.
    pub fn get_payee_key(&self) -> Result<&PrivateKey, Error> {
        self.payee_key
            .as_ref()
            .ok_or_else(|| Error::InvalidState("The channel was not set up.".to_string()))
    }

    /// Sorts the active commits by ascending quantity, keeping the relative
    /// order of commits with equal quantities, and returns their quantities.
    /// The state is left untouched if a quantity cannot be computed.
    pub fn order_active<I: TxInspector + ?Sized>(
        &mut self,
        inspector: &I,
    ) -> Result<Vec<u64>, Error> {
        let quantities = self
            .commits_active
            .iter()
            .map(|c| inspector.get_quantity(&c.tx))
            .collect::<Result<Vec<_>, Error>>()?;

        let mut keyed = quantities
            .into_iter()
            .zip(self.commits_active.drain(..))
            .collect::<Vec<_>>();
        keyed.sort_by_key(|(quantity, _)| *quantity);

        let (quantities, commits): (Vec<u64>, Vec<Commit>) = keyed.into_iter().unzip();
        self.commits_active = commits;
        Ok(quantities)
    }

    /// Returns the quantity of the highest active commit, or zero if there
    /// is none.
    pub fn transferred_amount<I: TxInspector + ?Sized>(&self, inspector: &I) -> Result<u64, Error> {
        self.commits_active
            .iter()
            .map(|c| inspector.get_quantity(&c.tx))
            .try_fold(0, |max, quantity| quantity.map(|q| max.max(q)))
    }

    /// Moves every active commit whose revoke secret is listed to the revoked
    /// commits. Unknown secrets are ignored.
    pub fn revoke_all(&mut self, secrets: &[Secret]) {
        let (revoked, active) = self
            .commits_active
            .drain(..)
            .partition::<Vec<_>, _>(|c| secrets.contains(&c.revoke_secret));
        self.commits_active = active;
        self.commits_revoked.extend(revoked);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, TxOut};

    struct OutputValueInspector {}

    impl TxInspector for OutputValueInspector {
        fn get_bad_signature_count(&self, _tx: &Transaction) -> Result<usize, Error> {
            Ok(0)
        }

        fn get_quantity(&self, tx: &Transaction) -> Result<u64, Error> {
            Ok(tx.output[0].value.to_sat())
        }
    }

    fn get_commit(quantity: u64, lock_time: u32) -> Commit {
        Commit {
            tx: Transaction {
                version: Version::TWO,
                lock_time: LockTime::from_consensus(lock_time),
                input: Vec::new(),
                output: vec![TxOut {
                    value: Amount::from_sat(quantity),
                    script_pubkey: ScriptBuf::new(),
                }],
            },
            script: ScriptBuf::new(),
            revoke_secret: Secret::new(),
        }
    }

    #[test]
    fn new_state_is_empty_and_unopened_test() {
        let state = ChannelState::new();
        assert_eq!(ChannelStatus::Empty, state.status());
        assert!(state.is_unopened());
        assert!(state.get_deposit().is_err());
        assert!(state.get_payee_key().is_err());
    }

    #[test]
    fn order_active_is_stable_test() {
        let mut state = ChannelState::new();
        let first_equal = get_commit(200, 1);
        let second_equal = get_commit(200, 2);
        state.commits_active = vec![
            get_commit(300, 0),
            first_equal.clone(),
            get_commit(100, 0),
            second_equal.clone(),
        ];

        let quantities = state.order_active(&OutputValueInspector {}).unwrap();

        assert_eq!(vec![100, 200, 200, 300], quantities);
        assert_eq!(first_equal, state.commits_active[1]);
        assert_eq!(second_equal, state.commits_active[2]);

        let before = state.commits_active.clone();
        state.order_active(&OutputValueInspector {}).unwrap();
        assert_eq!(before, state.commits_active);
    }

    #[test]
    fn transferred_amount_test() {
        let mut state = ChannelState::new();
        assert_eq!(0, state.transferred_amount(&OutputValueInspector {}).unwrap());
        state.commits_active = vec![get_commit(100, 0), get_commit(250, 0)];
        assert_eq!(250, state.transferred_amount(&OutputValueInspector {}).unwrap());
    }

    #[test]
    fn revoke_all_ignores_unknown_secrets_test() {
        let mut state = ChannelState::new();
        let kept = get_commit(100, 0);
        let revoked = get_commit(200, 0);
        state.commits_active = vec![kept.clone(), revoked.clone()];

        state.revoke_all(&[revoked.revoke_secret.clone(), Secret::new()]);

        assert_eq!(vec![kept], state.commits_active);
        assert_eq!(vec![revoked], state.commits_revoked);
    }
}
