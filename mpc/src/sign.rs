//! Signatures spending the outputs of a channel.
//!
//! Channel scripts are spent through P2SH, so the signatures commit to a
//! legacy `SIGHASH_ALL` digest using the redeem script as script code.

use std::convert::TryFrom;

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::OP_PUSHNUM_1;
use bitcoin::script::{Builder, Instruction, PushBytesBuf, Script, ScriptBuf};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, PrivateKey, Sequence, Transaction, TxIn, TxOut, Witness};
use secp256k1_zkp::{Message, Secp256k1, Signing};

use crate::scripts::CommitScript;
use crate::{Error, Secret};

/// Generate a DER encoded signature with appended `SIGHASH_ALL` for the given
/// P2SH input of the transaction.
pub fn get_sig_for_p2sh_input<C: Signing>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    input_index: usize,
    redeem_script: &Script,
    key: &PrivateKey,
) -> Result<Vec<u8>, Error> {
    let sighash = SighashCache::new(tx)
        .legacy_signature_hash(input_index, redeem_script, EcdsaSighashType::All.to_u32())
        .map_err(|_| Error::InvalidArgument)?;
    let message = Message::from_digest(sighash.to_byte_array());
    let signature = secp.sign_ecdsa(&message, &key.inner);
    Ok(bitcoin::ecdsa::Signature {
        signature,
        sighash_type: EcdsaSighashType::All,
    }
    .to_vec())
}

/// Adds the payer signature to the first input of a commit transaction,
/// leaving the payee slot of the deposit multisig empty:
/// `OP_0 <payer_sig> OP_0 OP_1 <deposit_script>`.
pub fn sign_commit_as_payer<C: Signing>(
    secp: &Secp256k1<C>,
    commit_tx: &Transaction,
    deposit_script: &Script,
    payer_key: &PrivateKey,
) -> Result<Transaction, Error> {
    if commit_tx.input.is_empty() {
        return Err(Error::InvalidArgument);
    }
    let payer_sig = get_sig_for_p2sh_input(secp, commit_tx, 0, deposit_script, payer_key)?;
    let mut signed = commit_tx.clone();
    signed.input[0].script_sig = multisig_script_sig(payer_sig, Vec::new(), deposit_script)?;
    Ok(signed)
}

/// Countersigns a commit transaction previously signed by the payer, filling
/// the empty payee slot of the deposit multisig with a signature from
/// `payee_key`.
pub fn finalize_commit_transaction<C: Signing>(
    secp: &Secp256k1<C>,
    commit_tx: &Transaction,
    deposit_script: &Script,
    payee_key: &PrivateKey,
) -> Result<Transaction, Error> {
    let input = commit_tx.input.first().ok_or(Error::InvalidArgument)?;
    let instructions = input
        .script_sig
        .instructions()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| Error::InvalidArgument)?;

    let payer_sig = match instructions.as_slice() {
        [Instruction::PushBytes(dummy), Instruction::PushBytes(payer_sig), Instruction::PushBytes(payee_slot), Instruction::Op(branch), Instruction::PushBytes(redeem_script)]
            if dummy.is_empty()
                && !payer_sig.is_empty()
                && payee_slot.is_empty()
                && *branch == OP_PUSHNUM_1
                && redeem_script.as_bytes() == deposit_script.as_bytes() =>
        {
            payer_sig.as_bytes().to_vec()
        }
        _ => return Err(Error::InvalidArgument),
    };

    let payee_sig = get_sig_for_p2sh_input(secp, commit_tx, 0, deposit_script, payee_key)?;
    let mut finalized = commit_tx.clone();
    finalized.input[0].script_sig = multisig_script_sig(payer_sig, payee_sig, deposit_script)?;
    Ok(finalized)
}

/// Creates a transaction sweeping the given commit outputs to the P2PKH of
/// the payee, through the delayed branch of the commit script. The spend
/// secret is disclosed in every input. `fee` is deducted from the total value.
pub fn create_payout_recover_transaction<C: Signing>(
    secp: &Secp256k1<C>,
    commit_script: &Script,
    utxos: &[(OutPoint, TxOut)],
    payee_key: &PrivateKey,
    spend_secret: &Secret,
    fee: Amount,
) -> Result<Transaction, Error> {
    if utxos.is_empty() {
        return Err(Error::InvalidArgument);
    }

    let commit = CommitScript::from_script(commit_script)?;
    let delay = u16::try_from(commit.delay_time).map_err(|_| Error::InvalidArgument)?;

    let total = utxos
        .iter()
        .try_fold(Amount::ZERO, |acc, (_, tx_out)| acc.checked_add(tx_out.value))
        .ok_or(Error::InvalidArgument)?;
    if fee >= total {
        return Err(Error::InvalidArgument);
    }

    let payee_pubkey = payee_key.public_key(secp);
    let mut tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: utxos
            .iter()
            .map(|(outpoint, _)| TxIn {
                previous_output: *outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::from_height(delay),
                witness: Witness::new(),
            })
            .collect(),
        output: vec![TxOut {
            value: total - fee,
            script_pubkey: ScriptBuf::new_p2pkh(&payee_pubkey.pubkey_hash()),
        }],
    };

    for input_index in 0..tx.input.len() {
        let sig = get_sig_for_p2sh_input(secp, &tx, input_index, commit_script, payee_key)?;
        tx.input[input_index].script_sig = Builder::new()
            .push_slice(to_push_bytes(sig)?)
            .push_slice(spend_secret.as_bytes())
            .push_int(1)
            .push_slice(to_push_bytes(commit_script.to_bytes())?)
            .into_script();
    }

    Ok(tx)
}

fn multisig_script_sig(
    payer_sig: Vec<u8>,
    payee_sig: Vec<u8>,
    deposit_script: &Script,
) -> Result<ScriptBuf, Error> {
    Ok(Builder::new()
        .push_int(0)
        .push_slice(to_push_bytes(payer_sig)?)
        .push_slice(to_push_bytes(payee_sig)?)
        .push_int(1)
        .push_slice(to_push_bytes(deposit_script.to_bytes())?)
        .into_script())
}

fn to_push_bytes(data: Vec<u8>) -> Result<PushBytesBuf, Error> {
    PushBytesBuf::try_from(data).map_err(|_| Error::InvalidArgument)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts::{compile_commit_script, compile_deposit_script};
    use bitcoin::{Network, PublicKey, Txid};
    use secp256k1_zkp::{ecdsa::Signature, SecretKey};
    use std::str::FromStr;

    fn get_key(seed: u8) -> PrivateKey {
        PrivateKey::new(SecretKey::from_slice(&[seed; 32]).unwrap(), Network::Regtest)
    }

    fn get_commit_tx(deposit_txid: Txid) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: deposit_txid,
                    vout: 0,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(100_000),
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    fn verify_sig(
        secp: &Secp256k1<secp256k1_zkp::All>,
        tx: &Transaction,
        input_index: usize,
        redeem_script: &Script,
        der_sig: &[u8],
        pubkey: &PublicKey,
    ) {
        let sighash = SighashCache::new(tx)
            .legacy_signature_hash(input_index, redeem_script, EcdsaSighashType::All.to_u32())
            .unwrap();
        let message = Message::from_digest(sighash.to_byte_array());
        let (sighash_type, der) = der_sig.split_last().unwrap();
        assert_eq!(EcdsaSighashType::All.to_u32() as u8, *sighash_type);
        let sig = Signature::from_der(der).unwrap();
        secp.verify_ecdsa(&message, &sig, &pubkey.inner)
            .expect("a valid signature");
    }

    fn get_pushes(script: &Script) -> Vec<Vec<u8>> {
        script
            .instructions()
            .map(|i| match i.unwrap() {
                Instruction::PushBytes(b) => b.as_bytes().to_vec(),
                Instruction::Op(op) => vec![op.to_u8()],
            })
            .collect()
    }

    #[test]
    fn finalize_commit_transaction_test() {
        let secp = Secp256k1::new();
        let payer = get_key(1);
        let payee = get_key(2);
        let deposit_script = compile_deposit_script(
            &payer.public_key(&secp),
            &payee.public_key(&secp),
            &Secret::new().hash(),
            100,
        );
        let txid = Txid::from_str("5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456")
            .unwrap();
        let commit_tx = get_commit_tx(txid);

        let half_signed = sign_commit_as_payer(&secp, &commit_tx, &deposit_script, &payer)
            .expect("to be able to sign as payer");
        let finalized = finalize_commit_transaction(&secp, &half_signed, &deposit_script, &payee)
            .expect("to be able to finalize");

        let pushes = get_pushes(&finalized.input[0].script_sig);
        assert_eq!(5, pushes.len());
        assert!(pushes[0].is_empty());
        verify_sig(&secp, &commit_tx, 0, &deposit_script, &pushes[1], &payer.public_key(&secp));
        verify_sig(&secp, &commit_tx, 0, &deposit_script, &pushes[2], &payee.public_key(&secp));
        assert_eq!(deposit_script.to_bytes(), pushes[4]);
        assert_eq!(commit_tx.output, finalized.output);
    }

    #[test]
    fn finalize_unsigned_commit_fails_test() {
        let secp = Secp256k1::new();
        let payer = get_key(1);
        let payee = get_key(2);
        let deposit_script = compile_deposit_script(
            &payer.public_key(&secp),
            &payee.public_key(&secp),
            &Secret::new().hash(),
            100,
        );
        let commit_tx = get_commit_tx(Txid::all_zeros());

        assert_eq!(
            Error::InvalidArgument,
            finalize_commit_transaction(&secp, &commit_tx, &deposit_script, &payee).unwrap_err()
        );
    }

    #[test]
    fn finalize_with_other_deposit_script_fails_test() {
        let secp = Secp256k1::new();
        let payer = get_key(1);
        let payee = get_key(2);
        let spend_secret_hash = Secret::new().hash();
        let deposit_script = compile_deposit_script(
            &payer.public_key(&secp),
            &payee.public_key(&secp),
            &spend_secret_hash,
            100,
        );
        let other_script = compile_deposit_script(
            &payer.public_key(&secp),
            &payee.public_key(&secp),
            &spend_secret_hash,
            101,
        );
        let half_signed =
            sign_commit_as_payer(&secp, &get_commit_tx(Txid::all_zeros()), &deposit_script, &payer)
                .unwrap();

        assert!(finalize_commit_transaction(&secp, &half_signed, &other_script, &payee).is_err());
    }

    #[test]
    fn create_payout_recover_transaction_test() {
        let secp = Secp256k1::new();
        let payer = get_key(1);
        let payee = get_key(2);
        let spend_secret = Secret::new();
        let commit_script = compile_commit_script(
            &payer.public_key(&secp),
            &payee.public_key(&secp),
            &spend_secret.hash(),
            &Secret::new().hash(),
            6,
        );
        let utxos = vec![
            (
                OutPoint {
                    txid: Txid::all_zeros(),
                    vout: 0,
                },
                TxOut {
                    value: Amount::from_sat(60_000),
                    script_pubkey: ScriptBuf::new_p2sh(&commit_script.script_hash()),
                },
            ),
            (
                OutPoint {
                    txid: Txid::all_zeros(),
                    vout: 1,
                },
                TxOut {
                    value: Amount::from_sat(40_000),
                    script_pubkey: ScriptBuf::new_p2sh(&commit_script.script_hash()),
                },
            ),
        ];

        let tx = create_payout_recover_transaction(
            &secp,
            &commit_script,
            &utxos,
            &payee,
            &spend_secret,
            Amount::from_sat(1_000),
        )
        .expect("to be able to create the payout transaction");

        assert_eq!(Version::TWO, tx.version);
        assert_eq!(2, tx.input.len());
        assert_eq!(Amount::from_sat(99_000), tx.output[0].value);
        assert_eq!(
            ScriptBuf::new_p2pkh(&payee.public_key(&secp).pubkey_hash()),
            tx.output[0].script_pubkey
        );

        for (i, input) in tx.input.iter().enumerate() {
            assert_eq!(Sequence::from_height(6), input.sequence);
            let pushes = get_pushes(&input.script_sig);
            assert_eq!(4, pushes.len());
            assert_eq!(spend_secret.as_bytes().to_vec(), pushes[1]);
            assert_eq!(commit_script.to_bytes(), pushes[3]);

            let mut unsigned = tx.clone();
            unsigned.input.iter_mut().for_each(|x| x.script_sig = ScriptBuf::new());
            verify_sig(&secp, &unsigned, i, &commit_script, &pushes[0], &payee.public_key(&secp));
        }
    }

    #[test]
    fn create_payout_recover_transaction_fee_too_high_test() {
        let secp = Secp256k1::new();
        let payee = get_key(2);
        let spend_secret = Secret::new();
        let commit_script = compile_commit_script(
            &get_key(1).public_key(&secp),
            &payee.public_key(&secp),
            &spend_secret.hash(),
            &Secret::new().hash(),
            6,
        );
        let utxos = vec![(
            OutPoint::null(),
            TxOut {
                value: Amount::from_sat(1_000),
                script_pubkey: ScriptBuf::new_p2sh(&commit_script.script_hash()),
            },
        )];

        assert_eq!(
            Error::InvalidArgument,
            create_payout_recover_transaction(
                &secp,
                &commit_script,
                &utxos,
                &payee,
                &spend_secret,
                Amount::from_sat(1_000),
            )
            .unwrap_err()
        );
        assert_eq!(
            Error::InvalidArgument,
            create_payout_recover_transaction(
                &secp,
                &commit_script,
                &[],
                &payee,
                &spend_secret,
                Amount::ZERO,
            )
            .unwrap_err()
        );
    }
}
