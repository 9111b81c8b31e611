//! # Library providing the payee side of hash-locked, time-locked micropayment
//! channels: deposit acceptance, commit request and acceptance, revocation,
//! closing and timeout based payout recovery.

#![crate_name = "mpc_payee"]
// Coding conventions
#![forbid(unsafe_code)]
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(missing_docs)]

extern crate bitcoin;
extern crate log;
extern crate mpc;
extern crate secp256k1_zkp;
#[cfg(feature = "use-serde")]
extern crate serde;

pub mod channel;
pub mod error;
pub mod payee;
pub mod script_signer;

use bitcoin::{Address, Network, OutPoint, PrivateKey, Script, Transaction, TxOut, Txid};
use error::Error;
use mpc::Secret;

pub use channel::{ChannelState, ChannelStatus, Commit, CommitRequest, Deposit};
pub use payee::PayeeChannel;
pub use script_signer::ScriptSigner;

/// The number of confirmations a payout transaction needs by default to be
/// considered confirmed.
pub const DEFAULT_PAYOUT_CONFIRMATIONS: u32 = 1;
/// The number of missing signatures expected in a deposit transaction handed
/// to the payee.
pub const DEPOSIT_BAD_SIGNATURE_COUNT: usize = 1;
/// The number of missing signatures expected in a commit transaction handed
/// to the payee (the payee slot of the deposit multisig).
pub const COMMIT_BAD_SIGNATURE_COUNT: usize = 1;

/// An unspent output of the blockchain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Utxo {
    /// The outpoint containing the txid and vout of the referenced output.
    pub outpoint: OutPoint,
    /// The TxOut containing the value and script pubkey of the referenced output.
    pub tx_out: TxOut,
    /// The address associated with the referenced output.
    pub address: Address,
}

/// Blockchain trait provides access to the bitcoin blockchain.
pub trait Blockchain {
    /// Returns the network currently used (mainnet, testnet or regtest).
    fn get_network(&self) -> Result<Network, Error>;
    /// Get the number of confirmation for the transaction with given id.
    fn get_transaction_confirmations(&self, tx_id: &Txid) -> Result<u32, Error>;
    /// Returns whether the given address currently holds spendable value.
    fn can_spend_from(&self, address: &Address) -> Result<bool, Error>;
    /// Returns the unspent outputs paying to the given address.
    fn get_utxos_for_address(&self, address: &Address) -> Result<Vec<Utxo>, Error>;
    /// Returns whether the output `vout` of the transaction `txid` was spent.
    fn is_output_spent(&self, txid: &Txid, vout: u32) -> Result<bool, Error>;
}

/// Inspects channel transactions handed over by the payer.
pub trait TxInspector {
    /// Returns the number of inputs of the transaction lacking a valid
    /// signature.
    fn get_bad_signature_count(&self, tx: &Transaction) -> Result<usize, Error>;
    /// Returns the quantity transferred by the transaction.
    fn get_quantity(&self, tx: &Transaction) -> Result<u64, Error>;
}

/// Produces the payee signatures needed to close a channel or recover its
/// funds.
pub trait CommitSigner {
    /// Countersigns a payer signed commit transaction spending the deposit.
    fn finalize_commit(
        &self,
        payee_key: &PrivateKey,
        commit_tx: &Transaction,
        deposit_script: &Script,
    ) -> Result<Transaction, Error>;
    /// Creates a transaction sweeping the timed out outputs of the commit
    /// script to the payee, disclosing the spend secret.
    fn recover_payout(
        &self,
        payee_key: &PrivateKey,
        commit_script: &Script,
        spend_secret: &Secret,
    ) -> Result<Transaction, Error>;
}
