//! Deposit and commit scripts of a micropayment channel.
//!
//! Deposit script, locking the funds of the payer:
//! ```text
//! OP_IF
//!     2 <payer_pubkey> <payee_pubkey> 2 OP_CHECKMULTISIG
//! OP_ELSE
//!     OP_IF
//!         OP_HASH160 <spend_secret_hash> OP_EQUALVERIFY
//!         <payer_pubkey> OP_CHECKSIG
//!     OP_ELSE
//!         <expire_time> OP_CHECKSEQUENCEVERIFY OP_DROP
//!         <payer_pubkey> OP_CHECKSIG
//!     OP_ENDIF
//! OP_ENDIF
//! ```
//!
//! Commit script, paying the payee once the delay elapsed unless the payer
//! learned the revoke secret:
//! ```text
//! OP_IF
//!     <delay_time> OP_CHECKSEQUENCEVERIFY OP_DROP
//!     OP_HASH160 <spend_secret_hash> OP_EQUALVERIFY
//!     <payee_pubkey> OP_CHECKSIG
//! OP_ELSE
//!     OP_HASH160 <revoke_secret_hash> OP_EQUALVERIFY
//!     <payer_pubkey> OP_CHECKSIG
//! OP_ENDIF
//! ```

use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::{
    OP_CHECKMULTISIG, OP_CHECKSIG, OP_CSV, OP_DROP, OP_ELSE, OP_ENDIF, OP_EQUALVERIFY,
    OP_HASH160, OP_IF, OP_PUSHNUM_1, OP_PUSHNUM_16, OP_PUSHNUM_2,
};
use bitcoin::opcodes::Opcode;
use bitcoin::script::{Builder, Instruction, Script, ScriptBuf};
use bitcoin::{Address, Network, PublicKey};

use crate::{Error, SecretHash};

// Script numbers consumed by OP_CHECKSEQUENCEVERIFY are at most 4 bytes wide.
const MAX_SCRIPT_NUM_SIZE: usize = 4;

#[derive(Clone, Copy)]
enum Token {
    Op(Opcode),
    Number,
    PubKey,
    Hash,
}

enum Capture {
    Number(i64),
    PubKey(PublicKey),
    Hash(SecretHash),
}

const DEPOSIT_TEMPLATE: [Token; 21] = [
    Token::Op(OP_IF),
    Token::Op(OP_PUSHNUM_2),
    Token::PubKey,
    Token::PubKey,
    Token::Op(OP_PUSHNUM_2),
    Token::Op(OP_CHECKMULTISIG),
    Token::Op(OP_ELSE),
    Token::Op(OP_IF),
    Token::Op(OP_HASH160),
    Token::Hash,
    Token::Op(OP_EQUALVERIFY),
    Token::PubKey,
    Token::Op(OP_CHECKSIG),
    Token::Op(OP_ELSE),
    Token::Number,
    Token::Op(OP_CSV),
    Token::Op(OP_DROP),
    Token::PubKey,
    Token::Op(OP_CHECKSIG),
    Token::Op(OP_ENDIF),
    Token::Op(OP_ENDIF),
];

const COMMIT_TEMPLATE: [Token; 16] = [
    Token::Op(OP_IF),
    Token::Number,
    Token::Op(OP_CSV),
    Token::Op(OP_DROP),
    Token::Op(OP_HASH160),
    Token::Hash,
    Token::Op(OP_EQUALVERIFY),
    Token::PubKey,
    Token::Op(OP_CHECKSIG),
    Token::Op(OP_ELSE),
    Token::Op(OP_HASH160),
    Token::Hash,
    Token::Op(OP_EQUALVERIFY),
    Token::PubKey,
    Token::Op(OP_CHECKSIG),
    Token::Op(OP_ENDIF),
];

/// The values embedded in a deposit script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepositScript {
    /// The key of the party funding the channel.
    pub payer_pubkey: PublicKey,
    /// The key of the party receiving payments.
    pub payee_pubkey: PublicKey,
    /// Commitment to the spend secret of the payee.
    pub spend_secret_hash: SecretHash,
    /// Relative lock (in blocks) after which the payer can take back the deposit.
    pub expire_time: u32,
}

impl DepositScript {
    /// Extracts the channel parameters from a deposit script, failing if the
    /// script does not follow the deposit template.
    pub fn from_script(script: &Script) -> Result<Self, Error> {
        let captures = match_template(script, &DEPOSIT_TEMPLATE)?;
        match captures.as_slice() {
            [Capture::PubKey(payer_pubkey), Capture::PubKey(payee_pubkey), Capture::Hash(spend_secret_hash), Capture::PubKey(change_pubkey), Capture::Number(expire_time), Capture::PubKey(expire_pubkey)] =>
            {
                if payer_pubkey != change_pubkey || payer_pubkey != expire_pubkey {
                    return Err(Error::InvalidScript("deposit script payer keys differ"));
                }
                Ok(DepositScript {
                    payer_pubkey: *payer_pubkey,
                    payee_pubkey: *payee_pubkey,
                    spend_secret_hash: *spend_secret_hash,
                    expire_time: to_relative_lock(*expire_time)?,
                })
            }
            _ => Err(Error::InvalidScript("unexpected deposit script layout")),
        }
    }

    /// Builds the script matching these parameters.
    pub fn to_script(&self) -> ScriptBuf {
        compile_deposit_script(
            &self.payer_pubkey,
            &self.payee_pubkey,
            &self.spend_secret_hash,
            self.expire_time,
        )
    }
}

/// The values embedded in a commit script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitScript {
    /// Relative lock (in blocks) after which the payee can claim the output.
    pub delay_time: u32,
    /// Commitment to the spend secret of the payee.
    pub spend_secret_hash: SecretHash,
    /// The key of the party receiving payments.
    pub payee_pubkey: PublicKey,
    /// Commitment to the revoke secret invalidating this commit.
    pub revoke_secret_hash: SecretHash,
    /// The key of the party funding the channel.
    pub payer_pubkey: PublicKey,
}

impl CommitScript {
    /// Extracts the commit parameters from a commit script, failing if the
    /// script does not follow the commit template.
    pub fn from_script(script: &Script) -> Result<Self, Error> {
        let captures = match_template(script, &COMMIT_TEMPLATE)?;
        match captures.as_slice() {
            [Capture::Number(delay_time), Capture::Hash(spend_secret_hash), Capture::PubKey(payee_pubkey), Capture::Hash(revoke_secret_hash), Capture::PubKey(payer_pubkey)] => {
                Ok(CommitScript {
                    delay_time: to_relative_lock(*delay_time)?,
                    spend_secret_hash: *spend_secret_hash,
                    payee_pubkey: *payee_pubkey,
                    revoke_secret_hash: *revoke_secret_hash,
                    payer_pubkey: *payer_pubkey,
                })
            }
            _ => Err(Error::InvalidScript("unexpected commit script layout")),
        }
    }

    /// Builds the script matching these parameters.
    pub fn to_script(&self) -> ScriptBuf {
        compile_commit_script(
            &self.payer_pubkey,
            &self.payee_pubkey,
            &self.spend_secret_hash,
            &self.revoke_secret_hash,
            self.delay_time,
        )
    }
}

/// Create the deposit script locking the funds of a channel.
pub fn compile_deposit_script(
    payer_pubkey: &PublicKey,
    payee_pubkey: &PublicKey,
    spend_secret_hash: &SecretHash,
    expire_time: u32,
) -> ScriptBuf {
    Builder::new()
        .push_opcode(OP_IF)
        .push_int(2)
        .push_key(payer_pubkey)
        .push_key(payee_pubkey)
        .push_int(2)
        .push_opcode(OP_CHECKMULTISIG)
        .push_opcode(OP_ELSE)
        .push_opcode(OP_IF)
        .push_opcode(OP_HASH160)
        .push_slice(spend_secret_hash.to_byte_array())
        .push_opcode(OP_EQUALVERIFY)
        .push_key(payer_pubkey)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ELSE)
        .push_int(expire_time as i64)
        .push_opcode(OP_CSV)
        .push_opcode(OP_DROP)
        .push_key(payer_pubkey)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ENDIF)
        .push_opcode(OP_ENDIF)
        .into_script()
}

/// Create the commit script paying the payee.
pub fn compile_commit_script(
    payer_pubkey: &PublicKey,
    payee_pubkey: &PublicKey,
    spend_secret_hash: &SecretHash,
    revoke_secret_hash: &SecretHash,
    delay_time: u32,
) -> ScriptBuf {
    Builder::new()
        .push_opcode(OP_IF)
        .push_int(delay_time as i64)
        .push_opcode(OP_CSV)
        .push_opcode(OP_DROP)
        .push_opcode(OP_HASH160)
        .push_slice(spend_secret_hash.to_byte_array())
        .push_opcode(OP_EQUALVERIFY)
        .push_key(payee_pubkey)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ELSE)
        .push_opcode(OP_HASH160)
        .push_slice(revoke_secret_hash.to_byte_array())
        .push_opcode(OP_EQUALVERIFY)
        .push_key(payer_pubkey)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ENDIF)
        .into_script()
}

/// Returns the spend secret hash embedded in a deposit script.
pub fn get_deposit_spend_secret_hash(script: &Script) -> Result<SecretHash, Error> {
    Ok(DepositScript::from_script(script)?.spend_secret_hash)
}

/// Returns the payee public key embedded in a deposit script.
pub fn get_deposit_payee_pubkey(script: &Script) -> Result<PublicKey, Error> {
    Ok(DepositScript::from_script(script)?.payee_pubkey)
}

/// Returns the spend secret hash embedded in a commit script.
pub fn get_commit_spend_secret_hash(script: &Script) -> Result<SecretHash, Error> {
    Ok(CommitScript::from_script(script)?.spend_secret_hash)
}

/// Returns the payee public key embedded in a commit script.
pub fn get_commit_payee_pubkey(script: &Script) -> Result<PublicKey, Error> {
    Ok(CommitScript::from_script(script)?.payee_pubkey)
}

/// Returns the revoke secret hash embedded in a commit script.
pub fn get_commit_revoke_secret_hash(script: &Script) -> Result<SecretHash, Error> {
    Ok(CommitScript::from_script(script)?.revoke_secret_hash)
}

/// Returns the relative delay (in blocks) embedded in a commit script.
pub fn get_commit_delay_time(script: &Script) -> Result<u32, Error> {
    Ok(CommitScript::from_script(script)?.delay_time)
}

/// Returns the P2SH address of the given redeem script.
pub fn script_to_address(script: &Script, network: Network) -> Result<Address, Error> {
    Address::p2sh(script, network).map_err(|_| Error::InvalidArgument)
}

fn match_template(script: &Script, template: &[Token]) -> Result<Vec<Capture>, Error> {
    let mut captures = Vec::new();
    let mut instructions = script.instructions();

    for token in template {
        let instruction = match instructions.next() {
            Some(Ok(instruction)) => instruction,
            Some(Err(_)) => return Err(Error::InvalidScript("malformed script")),
            None => return Err(Error::InvalidScript("script is too short")),
        };
        match (token, instruction) {
            (Token::Op(expected), Instruction::Op(op)) if *expected == op => {}
            (Token::Number, instruction) => {
                captures.push(Capture::Number(read_number(&instruction)?));
            }
            (Token::PubKey, Instruction::PushBytes(bytes)) => {
                let key = PublicKey::from_slice(bytes.as_bytes())
                    .map_err(|_| Error::InvalidScript("invalid public key"))?;
                captures.push(Capture::PubKey(key));
            }
            (Token::Hash, Instruction::PushBytes(bytes)) => {
                let hash = SecretHash::from_slice(bytes.as_bytes())
                    .map_err(|_| Error::InvalidScript("invalid secret hash"))?;
                captures.push(Capture::Hash(hash));
            }
            _ => return Err(Error::InvalidScript("unexpected instruction")),
        }
    }

    if instructions.next().is_some() {
        return Err(Error::InvalidScript("script is too long"));
    }

    Ok(captures)
}

fn read_number(instruction: &Instruction) -> Result<i64, Error> {
    match instruction {
        Instruction::Op(op) => {
            let code = op.to_u8();
            if code >= OP_PUSHNUM_1.to_u8() && code <= OP_PUSHNUM_16.to_u8() {
                Ok((code - OP_PUSHNUM_1.to_u8() + 1) as i64)
            } else {
                Err(Error::InvalidScript("expected a number"))
            }
        }
        Instruction::PushBytes(bytes) => decode_script_num(bytes.as_bytes()),
    }
}

fn decode_script_num(data: &[u8]) -> Result<i64, Error> {
    if data.len() > MAX_SCRIPT_NUM_SIZE {
        return Err(Error::InvalidScript("number is too large"));
    }
    let last = match data.last() {
        Some(last) => *last,
        None => return Ok(0),
    };

    let mut value: i64 = 0;
    for (i, byte) in data.iter().enumerate() {
        value |= (*byte as i64) << (8 * i);
    }
    if last & 0x80 != 0 {
        value &= !(0x80_i64 << (8 * (data.len() - 1)));
        value = -value;
    }
    Ok(value)
}

fn to_relative_lock(value: i64) -> Result<u32, Error> {
    if value < 0 || value > u32::MAX as i64 {
        return Err(Error::InvalidScript("invalid relative lock time"));
    }
    Ok(value as u32)
}
