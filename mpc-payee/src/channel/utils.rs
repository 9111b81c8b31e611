use bitcoin::{ScriptBuf, Transaction};

use super::Commit;
use crate::error::Error;
use crate::Blockchain;

/// Returns whether every output of the commit transaction paying to the
/// commit script was spent. A commit without such output is not spent.
pub(crate) fn is_commit_spent<B: Blockchain + ?Sized>(
    blockchain: &B,
    commit: &Commit,
) -> Result<bool, Error> {
    let script_pubkey = ScriptBuf::new_p2sh(&commit.script.script_hash());
    let txid = commit.tx.compute_txid();
    let mut found = false;
    for (vout, output) in commit.tx.output.iter().enumerate() {
        if output.script_pubkey != script_pubkey {
            continue;
        }
        found = true;
        if !blockchain.is_output_spent(&txid, vout as u32)? {
            return Ok(false);
        }
    }
    Ok(found)
}

/// Returns whether every given transaction has at least `min_confirmations`.
pub(crate) fn all_confirmed<B: Blockchain + ?Sized>(
    blockchain: &B,
    txs: &[Transaction],
    min_confirmations: u32,
) -> Result<bool, Error> {
    for tx in txs {
        if blockchain.get_transaction_confirmations(&tx.compute_txid())? < min_confirmations {
            return Ok(false);
        }
    }
    Ok(true)
}

